use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use crate::error::EngineError;
use crate::keys::{Keypair, PublicKey, PUBLIC_KEY_LEN};

/// Maximum MOTD length in bytes, including the trailing terminator byte
/// of the info response.
pub const MAX_MOTD_LENGTH: usize = 256;

/// How long a peer counts as live after we last heard from it.
const PEER_TIMEOUT: Duration = Duration::from_secs(70);

/// Minimum spacing between ping rounds.
const PING_INTERVAL: Duration = Duration::from_secs(1);

const PACKET_PING: u8 = 0x00;
const PACKET_PONG: u8 = 0x01;
const PACKET_LAN_DISCOVERY: u8 = 0x21;
const PACKET_ANNOUNCE: u8 = 0x83;
const PACKET_INFO_REQUEST: u8 = 0xf0;
const PACKET_INFO_RESPONSE: u8 = 0xf1;

/// Address family the core binds its socket under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
}

struct Peer {
    public_key: PublicKey,
    last_heard: Option<Instant>,
}

/// Handle to the DHT core: the bound UDP socket, the peer table and the
/// node identity. All operations are non-blocking polls; the caller is
/// expected to drive `tick` and `poll` from its own scheduler.
pub struct Dht {
    socket: UdpSocket,
    keypair: Keypair,
    peers: HashMap<SocketAddr, Peer>,
    motd: Option<Vec<u8>>,
    announce_enabled: bool,
    announces_seen: u64,
    last_ping_round: Option<Instant>,
}

impl Dht {
    /// Bind the core socket under the given address family and port.
    /// Port 0 asks the OS for an ephemeral port.
    pub fn new(family: AddrFamily, port: u16, keypair: Keypair) -> Result<Self, EngineError> {
        let bind_addr: SocketAddr = match family {
            AddrFamily::Ipv4 => (Ipv4Addr::UNSPECIFIED, port).into(),
            AddrFamily::Ipv6 => (Ipv6Addr::UNSPECIFIED, port).into(),
        };
        let socket = UdpSocket::bind(bind_addr).map_err(|source| EngineError::Bind {
            addr: bind_addr,
            source,
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| EngineError::Bind {
                addr: bind_addr,
                source,
            })?;
        // Needed for the LAN discovery broadcast; harmless otherwise.
        let _ = socket.set_broadcast(true);

        Ok(Self {
            socket,
            keypair,
            peers: HashMap::new(),
            motd: None,
            announce_enabled: false,
            announces_seen: 0,
            last_ping_round: None,
        })
    }

    /// The node's public identity key.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// The address the core socket is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Advance the core's internal processing step: ping every known
    /// peer, at most once per `PING_INTERVAL`.
    pub fn tick(&mut self) {
        let due = self
            .last_ping_round
            .map_or(true, |t| t.elapsed() >= PING_INTERVAL);
        if !due {
            return;
        }
        self.last_ping_round = Some(Instant::now());

        let ping = self.packet(PACKET_PING);
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            if let Err(e) = self.socket.send_to(&ping, addr) {
                tracing::trace!(%addr, "ping send failed: {}", e);
            }
        }
    }

    /// Drain pending datagrams into the peer table.
    pub fn poll(&mut self) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::trace!("recv error: {}", e);
                    break;
                }
            };
            self.handle_packet(&buf[..len], from);
        }
    }

    /// Seed the peer table from an address string, resolving host names
    /// through the system resolver. IPv6 results are only considered
    /// when `use_ipv6` is set. Returns false when the address does not
    /// resolve to a usable socket address.
    pub fn seed_peer(
        &mut self,
        address: &str,
        use_ipv6: bool,
        port: u16,
        public_key: &PublicKey,
    ) -> bool {
        let resolved = match (address, port).to_socket_addrs() {
            Ok(mut iter) => iter.find(|a| use_ipv6 || a.is_ipv4()),
            Err(_) => None,
        };
        let addr = match resolved {
            Some(addr) => addr,
            None => return false,
        };

        self.peers.insert(
            addr,
            Peer {
                public_key: *public_key,
                last_heard: None,
            },
        );
        let ping = self.packet(PACKET_PING);
        let _ = self.socket.send_to(&ping, addr);
        true
    }

    /// Number of peers heard from within the liveness window.
    pub fn connected_peers(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.last_heard.map_or(false, |t| t.elapsed() < PEER_TIMEOUT))
            .count()
    }

    /// Whether at least one live connection has been observed.
    pub fn is_connected(&self) -> bool {
        self.connected_peers() > 0
    }

    /// Total number of peers in the table, live or not.
    pub fn known_peers(&self) -> usize {
        self.peers.len()
    }

    /// Broadcast a discovery packet on the local network.
    pub fn send_lan_discovery(&self, port: u16) {
        let packet = self.packet(PACKET_LAN_DISCOVERY);
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, port));
        if let Err(e) = self.socket.send_to(&packet, target) {
            tracing::trace!("LAN discovery send failed: {}", e);
        }
    }

    /// Install the message of the day served in info responses. The
    /// stored text must leave room for the terminator byte.
    pub fn set_motd(&mut self, motd: &str) -> Result<(), EngineError> {
        if motd.len() > MAX_MOTD_LENGTH - 1 {
            return Err(EngineError::MotdTooLong {
                len: motd.len(),
                max: MAX_MOTD_LENGTH - 1,
            });
        }
        self.motd = Some(motd.as_bytes().to_vec());
        Ok(())
    }

    pub(crate) fn enable_announce(&mut self) {
        self.announce_enabled = true;
    }

    /// Number of announce packets observed since startup.
    pub fn announces_seen(&self) -> u64 {
        self.announces_seen
    }

    fn packet(&self, kind: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + PUBLIC_KEY_LEN);
        buf.push(kind);
        buf.extend_from_slice(&self.keypair.public_key());
        buf
    }

    fn handle_packet(&mut self, packet: &[u8], from: SocketAddr) {
        let (&kind, rest) = match packet.split_first() {
            Some(v) => v,
            None => return,
        };
        match kind {
            PACKET_PING | PACKET_LAN_DISCOVERY => {
                if let Some(key) = read_key(rest) {
                    self.note_peer(from, key);
                    let pong = self.packet(PACKET_PONG);
                    let _ = self.socket.send_to(&pong, from);
                }
            }
            PACKET_PONG => {
                if let Some(key) = read_key(rest) {
                    self.note_peer(from, key);
                }
            }
            PACKET_INFO_REQUEST => {
                if let Some(motd) = &self.motd {
                    let mut resp = Vec::with_capacity(1 + motd.len() + 1);
                    resp.push(PACKET_INFO_RESPONSE);
                    resp.extend_from_slice(motd);
                    resp.push(0);
                    let _ = self.socket.send_to(&resp, from);
                }
            }
            PACKET_ANNOUNCE if self.announce_enabled => {
                self.announces_seen += 1;
            }
            _ => {}
        }
    }

    fn note_peer(&mut self, addr: SocketAddr, public_key: PublicKey) {
        let peer = self.peers.entry(addr).or_insert(Peer {
            public_key,
            last_heard: None,
        });
        peer.public_key = public_key;
        peer.last_heard = Some(Instant::now());
    }
}

fn read_key(bytes: &[u8]) -> Option<PublicKey> {
    if bytes.len() < PUBLIC_KEY_LEN {
        return None;
    }
    let mut key = [0u8; PUBLIC_KEY_LEN];
    key.copy_from_slice(&bytes[..PUBLIC_KEY_LEN]);
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost_dht() -> Dht {
        Dht::new(AddrFamily::Ipv4, 0, Keypair::generate()).unwrap()
    }

    fn port_of(dht: &Dht) -> u16 {
        dht.local_addr().unwrap().port()
    }

    /// Drive both ends until `predicate` holds or the attempts run out.
    fn pump(a: &mut Dht, b: &mut Dht, predicate: impl Fn(&Dht, &Dht) -> bool) -> bool {
        for _ in 0..100 {
            a.tick();
            b.tick();
            a.poll();
            b.poll();
            if predicate(a, b) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let dht = localhost_dht();
        assert_ne!(port_of(&dht), 0);
        assert!(!dht.is_connected());
        assert_eq!(dht.known_peers(), 0);
    }

    #[test]
    fn test_seed_peer_literal_address() {
        let mut dht = localhost_dht();
        let key = Keypair::generate().public_key();
        assert!(dht.seed_peer("127.0.0.1", false, 33445, &key));
        assert_eq!(dht.known_peers(), 1);
        // Seeded but never heard from: not connected yet.
        assert!(!dht.is_connected());
    }

    #[test]
    fn test_seed_peer_unresolvable_address() {
        let mut dht = localhost_dht();
        let key = Keypair::generate().public_key();
        assert!(!dht.seed_peer("", false, 33445, &key));
        assert_eq!(dht.known_peers(), 0);
    }

    #[test]
    fn test_seed_peer_ipv6_literal_filtered_without_preference() {
        let mut dht = localhost_dht();
        let key = Keypair::generate().public_key();
        assert!(!dht.seed_peer("::1", false, 33445, &key));
        assert!(dht.seed_peer("::1", true, 33445, &key));
    }

    #[test]
    fn test_two_nodes_become_connected() {
        let mut a = localhost_dht();
        let mut b = localhost_dht();
        let a_port = port_of(&a);

        assert!(b.seed_peer("127.0.0.1", false, a_port, &a.public_key()));
        let connected = pump(&mut a, &mut b, |a, b| a.is_connected() && b.is_connected());
        assert!(connected, "ping/pong exchange never completed");
        assert_eq!(b.connected_peers(), 1);
    }

    #[test]
    fn test_info_request_serves_motd() {
        let mut dht = localhost_dht();
        dht.set_motd("hello from lattice").unwrap();
        let port = port_of(&dht);

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 512];
        for _ in 0..20 {
            client
                .send_to(&[PACKET_INFO_REQUEST], ("127.0.0.1", port))
                .unwrap();
            dht.poll();
            if let Ok((len, _)) = client.recv_from(&mut buf) {
                assert_eq!(buf[0], PACKET_INFO_RESPONSE);
                assert_eq!(&buf[1..len - 1], b"hello from lattice");
                assert_eq!(buf[len - 1], 0);
                return;
            }
        }
        panic!("no info response received");
    }

    #[test]
    fn test_motd_length_limit() {
        let mut dht = localhost_dht();
        let at_limit = "x".repeat(MAX_MOTD_LENGTH - 1);
        assert!(dht.set_motd(&at_limit).is_ok());
        let over_limit = "x".repeat(MAX_MOTD_LENGTH);
        assert!(matches!(
            dht.set_motd(&over_limit),
            Err(EngineError::MotdTooLong { .. })
        ));
    }

    #[test]
    fn test_announce_packets_counted_once_enabled() {
        let mut dht = localhost_dht();
        let port = port_of(&dht);
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();

        client.send_to(&[PACKET_ANNOUNCE], ("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        dht.poll();
        assert_eq!(dht.announces_seen(), 0);

        dht.enable_announce();
        client.send_to(&[PACKET_ANNOUNCE], ("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        dht.poll();
        assert_eq!(dht.announces_seen(), 1);
    }
}
