use std::fmt;

use lattice_dht::dht::Dht;
use lattice_dht::keys::{PublicKey, PUBLIC_KEY_LEN};

use crate::config::{MAX_ALLOWED_PORT, MIN_ALLOWED_PORT};
use crate::error::DaemonError;

const NAME_BOOTSTRAP_NODES: &str = "bootstrap_nodes";
const NAME_PUBLIC_KEY: &str = "public_key";
const NAME_PORT: &str = "port";
const NAME_ADDRESS: &str = "address";

/// Outcome of processing a single bootstrap entry.
#[derive(Debug)]
enum SeedOutcome {
    Added {
        address: String,
        port: u16,
        public_key: PublicKey,
    },
    Skipped(SkipReason),
}

#[derive(Debug)]
enum SkipReason {
    MissingField(&'static str),
    InvalidPublicKey(String),
    InvalidPort(i64),
    Unresolved(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField(name) => {
                write!(f, "couldn't find '{}' setting", name)
            }
            SkipReason::InvalidPublicKey(key) => {
                write!(f, "invalid '{}': {}", NAME_PUBLIC_KEY, key)
            }
            SkipReason::InvalidPort(port) => write!(
                f,
                "invalid '{}': {}, should be in [{}, {}]",
                NAME_PORT, port, MIN_ALLOWED_PORT, MAX_ALLOWED_PORT
            ),
            SkipReason::Unresolved(address) => {
                write!(f, "invalid '{}': {}", NAME_ADDRESS, address)
            }
        }
    }
}

struct BootstrapEntry {
    public_key: PublicKey,
    port: u16,
    address: String,
}

/// Seed the DHT with every peer listed in the configuration file. The
/// file is parsed independently of the general configuration pass.
/// Individual bad entries are skipped with a warning; only a file that
/// cannot be parsed at all is an error.
pub fn seed_from_file(path: &str, dht: &mut Dht, use_ipv6: bool) -> Result<(), DaemonError> {
    let contents = std::fs::read_to_string(path).map_err(|e| DaemonError::Config {
        reason: format!("failed to read config file '{}': {}", path, e),
    })?;
    let mut root: toml::Value =
        contents
            .parse()
            .map_err(|e: toml::de::Error| DaemonError::Config {
                reason: format!("failed to parse config file: {}", e),
            })?;

    // Take the node list out of the document so entries can be consumed
    // by value, one at a time.
    let node_list = root
        .as_table_mut()
        .and_then(|table| table.remove(NAME_BOOTSTRAP_NODES));
    let nodes = match node_list {
        None => {
            tracing::warn!(
                "no '{}' setting in the configuration file, skipping bootstrapping",
                NAME_BOOTSTRAP_NODES
            );
            return Ok(());
        }
        Some(toml::Value::Array(nodes)) if nodes.is_empty() => {
            tracing::warn!("no bootstrap nodes found, skipping bootstrapping");
            return Ok(());
        }
        Some(toml::Value::Array(nodes)) => nodes,
        Some(_) => {
            tracing::warn!(
                "'{}' setting is not a list, skipping bootstrapping",
                NAME_BOOTSTRAP_NODES
            );
            return Ok(());
        }
    };

    for (i, node) in nodes.into_iter().enumerate() {
        match seed_entry(&node, dht, use_ipv6) {
            SeedOutcome::Added {
                address,
                port,
                public_key,
            } => {
                tracing::info!(
                    "successfully added bootstrap node #{}: {}:{} {}",
                    i,
                    address,
                    port,
                    hex::encode_upper(public_key)
                );
            }
            SeedOutcome::Skipped(reason) => {
                tracing::warn!("bootstrap node #{}: {}, skipping the node", i, reason);
            }
        }
    }

    Ok(())
}

fn seed_entry(node: &toml::Value, dht: &mut Dht, use_ipv6: bool) -> SeedOutcome {
    let entry = match parse_entry(node) {
        Ok(entry) => entry,
        Err(reason) => return SeedOutcome::Skipped(reason),
    };

    if dht.seed_peer(&entry.address, use_ipv6, entry.port, &entry.public_key) {
        SeedOutcome::Added {
            address: entry.address,
            port: entry.port,
            public_key: entry.public_key,
        }
    } else {
        SeedOutcome::Skipped(SkipReason::Unresolved(entry.address))
    }
}

/// Validate one entry: field presence first, then key shape, then port
/// range. Resolution is left to the engine.
fn parse_entry(node: &toml::Value) -> Result<BootstrapEntry, SkipReason> {
    let key_str = node
        .get(NAME_PUBLIC_KEY)
        .and_then(toml::Value::as_str)
        .ok_or(SkipReason::MissingField(NAME_PUBLIC_KEY))?;
    let port = node
        .get(NAME_PORT)
        .and_then(toml::Value::as_integer)
        .ok_or(SkipReason::MissingField(NAME_PORT))?;
    let address = node
        .get(NAME_ADDRESS)
        .and_then(toml::Value::as_str)
        .ok_or(SkipReason::MissingField(NAME_ADDRESS))?;

    if key_str.len() != PUBLIC_KEY_LEN * 2 {
        return Err(SkipReason::InvalidPublicKey(key_str.to_string()));
    }
    let key_bytes = hex::decode(key_str)
        .map_err(|_| SkipReason::InvalidPublicKey(key_str.to_string()))?;
    let mut public_key = [0u8; PUBLIC_KEY_LEN];
    public_key.copy_from_slice(&key_bytes);

    if !(MIN_ALLOWED_PORT..=MAX_ALLOWED_PORT).contains(&port) {
        return Err(SkipReason::InvalidPort(port));
    }

    Ok(BootstrapEntry {
        public_key,
        port: port as u16,
        address: address.to_string(),
    })
}
