use std::io::{self, Read};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};

use crate::dht::Dht;
use crate::error::EngineError;
use crate::keys::PublicKey;

/// TCP relay server handle: owns the listening sockets and the accepted
/// client connections, keyed to the node identity of the DHT core it
/// was constructed from. Clients are accepted and drained per tick; the
/// relay conversation itself is carried out behind the core.
pub struct TcpRelay {
    listeners: Vec<TcpListener>,
    connections: Vec<TcpStream>,
    node_key: PublicKey,
}

impl TcpRelay {
    /// Bind a listener on every given port. Fails when no port could be
    /// bound at all; individual failed ports are only warned about.
    pub fn new(use_ipv6: bool, ports: &[u16], dht: &Dht) -> Result<Self, EngineError> {
        if ports.is_empty() {
            return Err(EngineError::NoRelayPorts);
        }

        let mut listeners = Vec::with_capacity(ports.len());
        let mut last_err: Option<(SocketAddr, io::Error)> = None;
        for &port in ports {
            let addr: SocketAddr = if use_ipv6 {
                (Ipv6Addr::UNSPECIFIED, port).into()
            } else {
                (Ipv4Addr::UNSPECIFIED, port).into()
            };
            match TcpListener::bind(addr).and_then(|l| {
                l.set_nonblocking(true)?;
                Ok(l)
            }) {
                Ok(listener) => {
                    tracing::debug!(%addr, "TCP relay listening");
                    listeners.push(listener);
                }
                Err(e) => {
                    tracing::warn!(%addr, "couldn't bind TCP relay port: {}", e);
                    last_err = Some((addr, e));
                }
            }
        }

        if listeners.is_empty() {
            return match last_err {
                Some((addr, source)) => Err(EngineError::RelayBind { addr, source }),
                None => Err(EngineError::NoRelayPorts),
            };
        }

        Ok(Self {
            listeners,
            connections: Vec::new(),
            node_key: dht.public_key(),
        })
    }

    /// Advance the relay's processing step: accept pending clients and
    /// drain incoming bytes, dropping dead connections.
    pub fn tick(&mut self) {
        for listener in &self.listeners {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        if stream.set_nonblocking(true).is_ok() {
                            tracing::debug!(%peer, "TCP relay connection accepted");
                            self.connections.push(stream);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::trace!("accept failed: {}", e);
                        break;
                    }
                }
            }
        }

        let mut buf = [0u8; 1024];
        self.connections.retain_mut(|conn| loop {
            match conn.read(&mut buf) {
                Ok(0) => return false,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        });
    }

    /// Number of currently open relay connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Ports the relay actually listens on.
    pub fn bound_ports(&self) -> Vec<u16> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .map(|a| a.port())
            .collect()
    }

    /// Identity key of the node this relay serves for.
    pub fn node_key(&self) -> PublicKey {
        self.node_key
    }
}
