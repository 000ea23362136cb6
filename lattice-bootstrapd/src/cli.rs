use clap::{Parser, ValueEnum};

use crate::config::Config;
use crate::error::DaemonError;
use crate::node::Node;
use crate::{bootstrap, daemonize, keys};

#[derive(Parser)]
#[command(
    name = "lattice-bootstrapd",
    about = "Lattice DHT bootstrap daemon",
    version
)]
pub struct Cli {
    /// Path to the config file. Point it at an empty file to run with
    /// default settings.
    #[arg(long, value_name = "FILE_PATH")]
    pub config: String,

    /// Logging backend. Defaults to syslog unless stdout is attached
    /// to a terminal.
    #[arg(long, value_enum, value_name = "BACKEND")]
    pub log_backend: Option<LogBackend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogBackend {
    Syslog,
    Stdout,
}

pub fn default_log_backend() -> LogBackend {
    if console::user_attended() {
        LogBackend::Stdout
    } else {
        LogBackend::Syslog
    }
}

/// Drive the whole startup sequence, ending in the perpetual service
/// loop. Only ever returns with an error; on success the process
/// either exits from the daemonizer (parent) or loops forever (child).
pub fn run(cli: Cli, backend: LogBackend) -> Result<(), DaemonError> {
    let config = Config::load(&cli.config)?;
    let pid_file_path = config.pid_file_path.clone();

    // A stale PID file only warns; single-instance enforcement is left
    // to the operator.
    if std::path::Path::new(&pid_file_path).exists() {
        tracing::warn!(
            "another instance of the daemon may already be running, PID file '{}' exists",
            pid_file_path
        );
    }

    let keypair = keys::establish_identity(&config.keys_file_path)?;

    let mut node = Node::new(config, keypair)?;

    let ipv6_enabled = node.ipv6_enabled();
    bootstrap::seed_from_file(&cli.config, node.dht_mut(), ipv6_enabled)?;
    tracing::info!("list of bootstrap nodes read successfully");
    tracing::info!("public key: {}", hex::encode_upper(node.public_key()));

    daemonize::detach(&pid_file_path, backend == LogBackend::Stdout)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    rt.block_on(node.run())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_flag_is_rejected() {
        let result = Cli::try_parse_from(["lattice-bootstrapd"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_flag_parsed() {
        let cli = Cli::try_parse_from(["lattice-bootstrapd", "--config=/etc/lattice.toml"])
            .unwrap();
        assert_eq!(cli.config, "/etc/lattice.toml");
        assert!(cli.log_backend.is_none());
    }

    #[test]
    fn test_log_backend_values() {
        let cli = Cli::try_parse_from([
            "lattice-bootstrapd",
            "--config=x.toml",
            "--log-backend=stdout",
        ])
        .unwrap();
        assert_eq!(cli.log_backend, Some(LogBackend::Stdout));

        let cli = Cli::try_parse_from([
            "lattice-bootstrapd",
            "--config=x.toml",
            "--log-backend=syslog",
        ])
        .unwrap();
        assert_eq!(cli.log_backend, Some(LogBackend::Syslog));
    }

    #[test]
    fn test_invalid_log_backend_rejected() {
        let result = Cli::try_parse_from([
            "lattice-bootstrapd",
            "--config=x.toml",
            "--log-backend=journald",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let result =
            Cli::try_parse_from(["lattice-bootstrapd", "--config=x.toml", "--frobnicate"]);
        assert!(result.is_err());
    }
}
