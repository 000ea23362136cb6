use std::time::{Duration, Instant};

use lattice_dht::announce::Announce;
use lattice_dht::dht::{AddrFamily, Dht};
use lattice_dht::keys::{Keypair, PublicKey};
use lattice_dht::relay::TcpRelay;

use crate::config::{Config, DAEMON_NAME};
use crate::error::DaemonError;

/// Nominal spacing between scheduler ticks. Not a hard deadline; a
/// slow engine tick simply delays the next pass.
const TICK_INTERVAL: Duration = Duration::from_millis(30);

/// Spacing between LAN discovery broadcasts.
const LAN_DISCOVERY_INTERVAL: Duration = Duration::from_secs(10);

/// The running node: engine handles plus the lifecycle state the
/// scheduler tracks. Single-threaded; every engine call per tick is a
/// non-blocking poll.
pub struct Node {
    config: Config,
    dht: Dht,
    _announce: Announce,
    relay: Option<TcpRelay>,
    ipv6_enabled: bool,
    connected: bool,
    last_lan_discovery: Option<Instant>,
}

impl Node {
    /// Construct the engine subsystems from identity and config: bind
    /// the core (with one IPv6 to IPv4 fallback attempt if configured),
    /// enable onion announce, install the MOTD and bring up the TCP
    /// relay.
    pub fn new(config: Config, keypair: Keypair) -> Result<Self, DaemonError> {
        let (mut dht, ipv6_enabled) = bind_dht(&config, keypair)?;
        let announce = Announce::new(&mut dht);

        if config.enable_motd {
            let motd = config.motd.as_deref().unwrap_or(DAEMON_NAME);
            dht.set_motd(motd)?;
            tracing::info!("set MOTD successfully: {}", motd);
        }

        let relay = if config.enable_tcp_relay {
            if config.tcp_relay_ports.is_empty() {
                return Err(DaemonError::Validation {
                    reason: "no TCP relay ports read".to_string(),
                });
            }
            let relay = TcpRelay::new(ipv6_enabled, &config.tcp_relay_ports, &dht)?;
            tracing::info!("initialized TCP relay server successfully");
            Some(relay)
        } else {
            None
        };

        if config.enable_lan_discovery {
            tracing::info!("initialized LAN discovery");
        }

        Ok(Self {
            config,
            dht,
            _announce: announce,
            relay,
            ipv6_enabled,
            connected: false,
            last_lan_discovery: None,
        })
    }

    pub fn dht_mut(&mut self) -> &mut Dht {
        &mut self.dht
    }

    pub fn public_key(&self) -> PublicKey {
        self.dht.public_key()
    }

    /// Whether the node ended up on an IPv6 socket (false after the
    /// IPv4 fallback kicked in).
    pub fn ipv6_enabled(&self) -> bool {
        self.ipv6_enabled
    }

    /// Whether the node has observed an external connection yet.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// One scheduler pass: advance the core, broadcast LAN discovery
    /// when the interval elapsed, advance the relay, drain pending I/O
    /// and track the one-way connected transition.
    pub fn tick(&mut self) {
        self.dht.tick();

        if self.config.enable_lan_discovery {
            let due = self
                .last_lan_discovery
                .map_or(true, |t| t.elapsed() >= LAN_DISCOVERY_INTERVAL);
            if due {
                self.dht.send_lan_discovery(self.config.port);
                self.last_lan_discovery = Some(Instant::now());
            }
        }

        if let Some(relay) = self.relay.as_mut() {
            relay.tick();
        }

        self.dht.poll();

        if !self.connected && self.dht.is_connected() {
            tracing::info!("connected to another bootstrap node successfully");
            self.connected = true;
        }
    }

    /// Run the perpetual service loop. There is no exit condition;
    /// termination is by external process signal only.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick();
        }
    }
}

fn bind_dht(config: &Config, keypair: Keypair) -> Result<(Dht, bool), DaemonError> {
    if !config.enable_ipv6 {
        let dht = Dht::new(AddrFamily::Ipv4, config.port, keypair)?;
        return Ok((dht, false));
    }

    match Dht::new(AddrFamily::Ipv6, config.port, keypair.clone()) {
        Ok(dht) => Ok((dht, true)),
        Err(e) if config.enable_ipv4_fallback => {
            tracing::warn!(
                "couldn't initialize IPv6 networking ({}), falling back to IPv4",
                e
            );
            let dht = Dht::new(AddrFamily::Ipv4, config.port, keypair)?;
            Ok((dht, false))
        }
        Err(e) => Err(e.into()),
    }
}
