use lattice_dht::error::EngineError;
use thiserror::Error;

/// Errors that can occur while starting or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("validation error: {reason}")]
    Validation { reason: String },

    #[error("identity key error: {reason}")]
    IdentityIo { reason: String },

    #[error("network init error: {0}")]
    NetworkInit(#[from] EngineError),

    #[error("daemonize error: {reason}")]
    Daemonize { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
