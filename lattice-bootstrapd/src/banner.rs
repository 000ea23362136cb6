use console::Style;

const BANNER: &str = r#"
 ██╗      █████╗ ████████╗████████╗██╗ ██████╗███████╗
 ██║     ██╔══██╗╚══██╔══╝╚══██╔══╝██║██╔════╝██╔════╝
 ██║     ███████║   ██║      ██║   ██║██║     █████╗
 ██║     ██╔══██║   ██║      ██║   ██║██║     ██╔══╝
 ███████╗██║  ██║   ██║      ██║   ██║╚██████╗███████╗
 ╚══════╝╚═╝  ╚═╝   ╚═╝      ╚═╝   ╚═╝ ╚═════╝╚══════╝"#;

/// Print the startup banner with version info.
pub fn print_banner() {
    let cyan = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!("{}", cyan.apply_to(BANNER));
    println!(
        "  {}",
        dim.apply_to(format!(
            "v{} — bootstrap daemon for the Lattice DHT overlay",
            env!("CARGO_PKG_VERSION")
        ))
    );
    println!();
}
