use clap::Parser;
use tracing_subscriber::EnvFilter;

mod banner;
mod bootstrap;
mod cli;
mod config;
mod daemonize;
mod error;
mod keys;
mod node;

fn main() {
    let cli = cli::Cli::parse();

    let backend = cli.log_backend.unwrap_or_else(cli::default_log_backend);
    init_logging(backend);

    if backend == cli::LogBackend::Stdout {
        banner::print_banner();
    }
    tracing::info!(
        "running {} version {}",
        config::DAEMON_NAME,
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = cli::run(cli, backend) {
        tracing::error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing on the selected backend, with the level
/// configurable via the RUST_LOG env var.
fn init_logging(backend: cli::LogBackend) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match backend {
        cli::LogBackend::Stdout => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        cli::LogBackend::Syslog => {
            let identity = std::ffi::CStr::from_bytes_with_nul(b"lattice-bootstrapd\0")
                .expect("identity is nul-terminated");
            let (options, facility) = Default::default();
            match syslog_tracing::Syslog::new(identity, options, facility) {
                Some(syslog) => {
                    tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_ansi(false)
                        .with_writer(syslog)
                        .init();
                }
                None => {
                    tracing_subscriber::fmt().with_env_filter(filter).init();
                    tracing::warn!("couldn't open syslog, logging to stdout instead");
                }
            }
        }
    }
}
