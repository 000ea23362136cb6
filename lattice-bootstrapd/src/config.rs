use std::fmt;

use lattice_dht::MAX_MOTD_LENGTH;

use crate::error::DaemonError;

pub const DAEMON_NAME: &str = "lattice-bootstrapd";

const NAME_PORT: &str = "port";
const NAME_PID_FILE_PATH: &str = "pid_file_path";
const NAME_KEYS_FILE_PATH: &str = "keys_file_path";
const NAME_ENABLE_IPV6: &str = "enable_ipv6";
const NAME_ENABLE_IPV4_FALLBACK: &str = "enable_ipv4_fallback";
const NAME_ENABLE_LAN_DISCOVERY: &str = "enable_lan_discovery";
const NAME_ENABLE_TCP_RELAY: &str = "enable_tcp_relay";
const NAME_TCP_RELAY_PORTS: &str = "tcp_relay_ports";
const NAME_ENABLE_MOTD: &str = "enable_motd";
const NAME_MOTD: &str = "motd";

const DEFAULT_PORT: i64 = 33445;
const DEFAULT_PID_FILE_PATH: &str = "lattice-bootstrapd.pid";
const DEFAULT_KEYS_FILE_PATH: &str = "lattice-bootstrapd.keys";
const DEFAULT_ENABLE_IPV6: bool = true;
const DEFAULT_ENABLE_IPV4_FALLBACK: bool = true;
const DEFAULT_ENABLE_LAN_DISCOVERY: bool = true;
const DEFAULT_ENABLE_TCP_RELAY: bool = true;
const DEFAULT_TCP_RELAY_PORTS: [u16; 3] = [443, 3389, 33445];
const DEFAULT_ENABLE_MOTD: bool = true;

pub const MIN_ALLOWED_PORT: i64 = 1;
pub const MAX_ALLOWED_PORT: i64 = 65535;

/// Immutable configuration snapshot, created once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub pid_file_path: String,
    pub keys_file_path: String,
    pub enable_ipv6: bool,
    pub enable_ipv4_fallback: bool,
    pub enable_lan_discovery: bool,
    pub enable_tcp_relay: bool,
    pub tcp_relay_ports: Vec<u16>,
    pub enable_motd: bool,
    pub motd: Option<String>,
}

/// Where a resolved option came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Configured,
    Default,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Configured => write!(f, "configured"),
            Source::Default => write!(f, "default"),
        }
    }
}

impl Config {
    /// Load the configuration from a TOML file. An empty file yields
    /// the documented defaults for every option.
    pub fn load(path: &str) -> Result<Self, DaemonError> {
        let contents = std::fs::read_to_string(path).map_err(|e| DaemonError::Config {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        Self::from_toml_str(&contents)
    }

    fn from_toml_str(contents: &str) -> Result<Self, DaemonError> {
        let root: toml::Value =
            contents
                .parse()
                .map_err(|e: toml::de::Error| DaemonError::Config {
                    reason: format!("failed to parse config file: {}", e),
                })?;
        Self::from_value(&root)
    }

    fn from_value(root: &toml::Value) -> Result<Self, DaemonError> {
        let (port_raw, port_src) = lookup_int(root, NAME_PORT, DEFAULT_PORT);
        if !(MIN_ALLOWED_PORT..=MAX_ALLOWED_PORT).contains(&port_raw) {
            return Err(DaemonError::Validation {
                reason: format!(
                    "invalid '{}': {}, should be in [{}, {}]",
                    NAME_PORT, port_raw, MIN_ALLOWED_PORT, MAX_ALLOWED_PORT
                ),
            });
        }
        let port = port_raw as u16;

        let (pid_file_path, pid_src) =
            lookup_string(root, NAME_PID_FILE_PATH, DEFAULT_PID_FILE_PATH);
        let (keys_file_path, keys_src) =
            lookup_string(root, NAME_KEYS_FILE_PATH, DEFAULT_KEYS_FILE_PATH);
        let (enable_ipv6, ipv6_src) = lookup_bool(root, NAME_ENABLE_IPV6, DEFAULT_ENABLE_IPV6);
        let (enable_ipv4_fallback, fallback_src) = lookup_bool(
            root,
            NAME_ENABLE_IPV4_FALLBACK,
            DEFAULT_ENABLE_IPV4_FALLBACK,
        );
        let (enable_lan_discovery, lan_src) = lookup_bool(
            root,
            NAME_ENABLE_LAN_DISCOVERY,
            DEFAULT_ENABLE_LAN_DISCOVERY,
        );
        let (enable_tcp_relay, relay_src) =
            lookup_bool(root, NAME_ENABLE_TCP_RELAY, DEFAULT_ENABLE_TCP_RELAY);

        let tcp_relay_ports = if enable_tcp_relay {
            parse_tcp_relay_ports(root)?
        } else {
            Vec::new()
        };

        let (enable_motd, motd_enable_src) =
            lookup_bool(root, NAME_ENABLE_MOTD, DEFAULT_ENABLE_MOTD);
        let motd = if enable_motd {
            let (text, src) = lookup_string(root, NAME_MOTD, DAEMON_NAME);
            Some((clamp_motd(text), src))
        } else {
            None
        };

        tracing::info!("successfully read:");
        tracing::info!("'{}': {} ({})", NAME_PID_FILE_PATH, pid_file_path, pid_src);
        tracing::info!("'{}': {} ({})", NAME_KEYS_FILE_PATH, keys_file_path, keys_src);
        tracing::info!("'{}': {} ({})", NAME_PORT, port, port_src);
        tracing::info!("'{}': {} ({})", NAME_ENABLE_IPV6, enable_ipv6, ipv6_src);
        tracing::info!(
            "'{}': {} ({})",
            NAME_ENABLE_IPV4_FALLBACK,
            enable_ipv4_fallback,
            fallback_src
        );
        tracing::info!(
            "'{}': {} ({})",
            NAME_ENABLE_LAN_DISCOVERY,
            enable_lan_discovery,
            lan_src
        );
        tracing::info!(
            "'{}': {} ({})",
            NAME_ENABLE_TCP_RELAY,
            enable_tcp_relay,
            relay_src
        );
        if enable_tcp_relay {
            if tcp_relay_ports.is_empty() {
                tracing::error!("no TCP relay ports could be read");
            } else {
                tracing::info!("read {} TCP relay ports:", tcp_relay_ports.len());
                for (i, p) in tcp_relay_ports.iter().enumerate() {
                    tracing::info!("port #{}: {}", i, p);
                }
            }
        }
        tracing::info!(
            "'{}': {} ({})",
            NAME_ENABLE_MOTD,
            enable_motd,
            motd_enable_src
        );
        if let Some((text, src)) = &motd {
            tracing::info!("'{}': {} ({})", NAME_MOTD, text, src);
        }

        Ok(Self {
            port,
            pid_file_path,
            keys_file_path,
            enable_ipv6,
            enable_ipv4_fallback,
            enable_lan_discovery,
            enable_tcp_relay,
            tcp_relay_ports,
            enable_motd,
            motd: motd.map(|(text, _)| text),
        })
    }
}

fn lookup_int(root: &toml::Value, name: &str, default: i64) -> (i64, Source) {
    match root.get(name) {
        Some(toml::Value::Integer(v)) => (*v, Source::Configured),
        Some(_) => {
            tracing::warn!(
                "'{}' setting has the wrong type, using default: {}",
                name,
                default
            );
            (default, Source::Default)
        }
        None => {
            tracing::warn!(
                "no '{}' setting in the configuration file, using default: {}",
                name,
                default
            );
            (default, Source::Default)
        }
    }
}

fn lookup_bool(root: &toml::Value, name: &str, default: bool) -> (bool, Source) {
    match root.get(name) {
        Some(toml::Value::Boolean(v)) => (*v, Source::Configured),
        Some(_) => {
            tracing::warn!(
                "'{}' setting has the wrong type, using default: {}",
                name,
                default
            );
            (default, Source::Default)
        }
        None => {
            tracing::warn!(
                "no '{}' setting in the configuration file, using default: {}",
                name,
                default
            );
            (default, Source::Default)
        }
    }
}

fn lookup_string(root: &toml::Value, name: &str, default: &str) -> (String, Source) {
    match root.get(name) {
        Some(toml::Value::String(v)) => (v.clone(), Source::Configured),
        Some(_) => {
            tracing::warn!(
                "'{}' setting has the wrong type, using default: {}",
                name,
                default
            );
            (default.to_string(), Source::Default)
        }
        None => {
            tracing::warn!(
                "no '{}' setting in the configuration file, using default: {}",
                name,
                default
            );
            (default.to_string(), Source::Default)
        }
    }
}

/// Parse the relay port list. A missing setting falls back to the
/// default port set; a present setting of the wrong type is a hard
/// failure, since the operator explicitly declared intent. Individual
/// bad elements are skipped with a warning, preserving the order (and
/// duplicates) of the surviving ones.
fn parse_tcp_relay_ports(root: &toml::Value) -> Result<Vec<u16>, DaemonError> {
    let array = match root.get(NAME_TCP_RELAY_PORTS) {
        None => {
            tracing::warn!(
                "no '{}' setting in the configuration file, using default: {:?}",
                NAME_TCP_RELAY_PORTS,
                DEFAULT_TCP_RELAY_PORTS
            );
            return Ok(DEFAULT_TCP_RELAY_PORTS.to_vec());
        }
        Some(toml::Value::Array(a)) => a,
        Some(_) => {
            return Err(DaemonError::Config {
                reason: format!(
                    "'{}' setting should be an array of ports, e.g. {} = [443, 3389, 33445]",
                    NAME_TCP_RELAY_PORTS, NAME_TCP_RELAY_PORTS
                ),
            });
        }
    };

    let mut ports = Vec::with_capacity(array.len());
    for (i, elem) in array.iter().enumerate() {
        let value = match elem {
            toml::Value::Integer(v) => *v,
            _ => {
                tracing::warn!("port #{}: not a number, skipping", i);
                continue;
            }
        };
        if !(MIN_ALLOWED_PORT..=MAX_ALLOWED_PORT).contains(&value) {
            tracing::warn!(
                "port #{}: invalid port: {}, should be in [{}, {}], skipping",
                i,
                value,
                MIN_ALLOWED_PORT,
                MAX_ALLOWED_PORT
            );
            continue;
        }
        ports.push(value as u16);
    }
    Ok(ports)
}

/// Clamp the MOTD so a terminator byte still fits into the engine's
/// info response, truncating on a char boundary.
fn clamp_motd(motd: String) -> String {
    let max = MAX_MOTD_LENGTH - 1;
    if motd.len() <= max {
        return motd;
    }
    let mut end = max;
    while !motd.is_char_boundary(end) {
        end -= 1;
    }
    tracing::warn!("'{}' is longer than {} bytes, truncating", NAME_MOTD, max);
    motd[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.port, 33445);
        assert_eq!(config.pid_file_path, DEFAULT_PID_FILE_PATH);
        assert_eq!(config.keys_file_path, DEFAULT_KEYS_FILE_PATH);
        assert!(config.enable_ipv6);
        assert!(config.enable_ipv4_fallback);
        assert!(config.enable_lan_discovery);
        assert!(config.enable_tcp_relay);
        assert_eq!(config.tcp_relay_ports, vec![443, 3389, 33445]);
        assert!(config.enable_motd);
        assert_eq!(config.motd.as_deref(), Some(DAEMON_NAME));
    }

    #[test]
    fn test_configured_values_respected() {
        let config = Config::from_toml_str(
            r#"
            port = 12345
            pid_file_path = "/var/run/lattice.pid"
            keys_file_path = "/var/lib/lattice.keys"
            enable_ipv6 = false
            enable_ipv4_fallback = false
            enable_lan_discovery = false
            enable_tcp_relay = true
            tcp_relay_ports = [8080]
            enable_motd = true
            motd = "welcome"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 12345);
        assert_eq!(config.pid_file_path, "/var/run/lattice.pid");
        assert!(!config.enable_ipv6);
        assert!(!config.enable_lan_discovery);
        assert_eq!(config.tcp_relay_ports, vec![8080]);
        assert_eq!(config.motd.as_deref(), Some("welcome"));
    }

    #[test]
    fn test_wrong_type_scalar_falls_back_to_default() {
        let config = Config::from_toml_str(
            r#"
            port = "not a number"
            enable_ipv6 = 5
            pid_file_path = 17
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 33445);
        assert!(config.enable_ipv6);
        assert_eq!(config.pid_file_path, DEFAULT_PID_FILE_PATH);
    }

    #[test]
    fn test_listen_port_range() {
        assert!(matches!(
            Config::from_toml_str("port = 0"),
            Err(DaemonError::Validation { .. })
        ));
        assert!(matches!(
            Config::from_toml_str("port = 65536"),
            Err(DaemonError::Validation { .. })
        ));
        assert_eq!(Config::from_toml_str("port = 1").unwrap().port, 1);
        assert_eq!(Config::from_toml_str("port = 65535").unwrap().port, 65535);
    }

    #[test]
    fn test_relay_ports_missing_uses_default_set() {
        let config = Config::from_toml_str("enable_tcp_relay = true").unwrap();
        assert_eq!(config.tcp_relay_ports, vec![443, 3389, 33445]);
    }

    #[test]
    fn test_relay_ports_wrong_type_is_hard_error() {
        let result = Config::from_toml_str(r#"tcp_relay_ports = "oops""#);
        assert!(matches!(result, Err(DaemonError::Config { .. })));
    }

    #[test]
    fn test_relay_ports_present_but_empty() {
        let config = Config::from_toml_str("tcp_relay_ports = []").unwrap();
        assert!(config.enable_tcp_relay);
        assert!(config.tcp_relay_ports.is_empty());
    }

    #[test]
    fn test_relay_ports_skip_invalid_preserve_order_and_duplicates() {
        let config = Config::from_toml_str(
            r#"tcp_relay_ports = [443, "x", 70000, 3389, 0, 443, -1]"#,
        )
        .unwrap();
        assert_eq!(config.tcp_relay_ports, vec![443, 3389, 443]);
    }

    #[test]
    fn test_relay_disabled_collects_no_ports() {
        let config = Config::from_toml_str(
            r#"
            enable_tcp_relay = false
            tcp_relay_ports = [443]
            "#,
        )
        .unwrap();
        assert!(config.tcp_relay_ports.is_empty());
    }

    #[test]
    fn test_motd_absent_uses_daemon_name() {
        let config = Config::from_toml_str("enable_motd = true").unwrap();
        assert_eq!(config.motd.as_deref(), Some(DAEMON_NAME));
    }

    #[test]
    fn test_motd_disabled_is_none() {
        let config = Config::from_toml_str("enable_motd = false").unwrap();
        assert!(config.motd.is_none());
    }

    #[test]
    fn test_motd_clamped_to_limit() {
        let long = "a".repeat(MAX_MOTD_LENGTH * 2);
        let config =
            Config::from_toml_str(&format!("motd = \"{}\"", long)).unwrap();
        assert_eq!(config.motd.unwrap().len(), MAX_MOTD_LENGTH - 1);
    }

    #[test]
    fn test_motd_truncation_respects_char_boundaries() {
        // 'é' is two bytes; truncation must not split one in half.
        let long = "é".repeat(MAX_MOTD_LENGTH);
        let config =
            Config::from_toml_str(&format!("motd = \"{}\"", long)).unwrap();
        let motd = config.motd.unwrap();
        assert!(motd.len() <= MAX_MOTD_LENGTH - 1);
        assert!(motd.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_unparseable_file_is_config_error() {
        let result = Config::from_toml_str("port = = 3");
        assert!(matches!(result, Err(DaemonError::Config { .. })));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("/nonexistent/path/lattice.toml");
        assert!(matches!(result, Err(DaemonError::Config { .. })));
    }

    #[test]
    fn test_load_valid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lattice.toml");
        std::fs::write(&path, "port = 4000\n").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.port, 4000);
    }
}
