use std::net::SocketAddr;

use thiserror::Error;

/// Errors reported by the engine surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("couldn't bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't bind any TCP relay port (last attempt {addr}: {source})")]
    RelayBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no TCP relay ports were given")]
    NoRelayPorts,

    #[error("MOTD is {len} bytes, maximum is {max}")]
    MotdTooLong { len: usize, max: usize },
}
