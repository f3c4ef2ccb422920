use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::IpAddr;

/// INI-style configuration file: global key/value pairs plus one level of
/// named sections.
#[derive(Debug, Default)]
pub struct Config {
    /// Global key-value pairs.
    pub globals: HashMap<String, String>,
    /// Section-specific key-value pairs.
    pub sections: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    BadValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::BadValue {
                section,
                key,
                value,
            } => write!(f, "bad value for {section}.{key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads a configuration from a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("reading {path}: {e}")))?;
        Ok(Self::parse(&content))
    }

    /// Parses configuration text. Lines starting with `#` or `;` are comments.
    pub fn parse(content: &str) -> Self {
        let mut globals = HashMap::new();
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current_section: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = &line[1..line.len() - 1];
                current_section = Some(name.to_string());
                continue;
            }

            if let Some(pos) = line.find('=') {
                let key = line[..pos].trim().to_string();
                let value = line[pos + 1..].trim().trim_matches('"').to_string();

                match &current_section {
                    None => {
                        globals.insert(key, value);
                    }
                    Some(sec) => {
                        sections.entry(sec.clone()).or_default().insert(key, value);
                    }
                }
            }
        }
        Config { globals, sections }
    }

    /// Creates an empty configuration.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Gets a value from a section.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|sec| sec.get(key))
            .map(|s| s.as_str())
    }

    /// Gets a non-empty value from a section.
    #[must_use]
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).filter(|s| !s.is_empty())
    }

    /// Gets a global value.
    #[must_use]
    pub fn get_global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(|s| s.as_str())
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_non_empty(section, key)
            .map(|v| matches!(v, "true" | "yes" | "1" | "on"))
            .unwrap_or(default)
    }

    fn get_u16(&self, section: &str, key: &str, default: u16) -> u16 {
        self.get_non_empty(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_usize(&self, section: &str, key: &str, default: usize) -> usize {
        self.get_non_empty(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_u64(&self, section: &str, key: &str, default: u64) -> u64 {
        self.get_non_empty(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// TURN relay transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnType {
    Udp,
    Tcp,
    Tls,
}

/// Typed, immutable snapshot of the gateway configuration.
///
/// The snapshot is built once from a [`Config`] and published as a whole
/// behind an `Arc`; updating the configuration at runtime means building a new
/// snapshot and swapping the `Arc` under the server lock, so readers on the
/// media path never see a half-updated view.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // [general]
    pub stun_server: Option<String>,
    pub stun_port: u16,
    pub turn_server: Option<String>,
    pub turn_port: u16,
    pub turn_type: TurnType,
    pub turn_user: Option<String>,
    pub turn_pwd: Option<String>,
    pub turn_rest_api: Option<String>,
    pub api_secret: Option<String>,

    // [media]
    pub rtp_port_min: u16,
    pub rtp_port_max: u16,
    pub ipv6: bool,
    pub ice_lite: bool,
    pub ice_tcp: bool,
    pub full_trickle: bool,
    /// Retransmit buffer depth, in packets per handle per direction.
    pub nack_queue: usize,
    /// Seconds without media before a no-media notification (0 disables).
    pub no_media_timer: u64,
    /// Whether the no-media timer hangs the connection up instead of only
    /// notifying.
    pub no_media_hangup: bool,
    pub rfc4588: bool,
    /// Seconds between per-handle media statistics events (0 disables).
    pub event_stats_period: u64,

    // [nat]
    pub enforce_interfaces: Vec<String>,
    pub ignore_interfaces: Vec<String>,
    pub nat_1_1_mapping: Option<IpAddr>,

    // [auth]
    pub token_auth: bool,
    pub token_secret: Option<String>,

    // [plugins] / [transports]
    pub plugins_disabled: Vec<String>,
    pub transports_disabled: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            stun_server: None,
            stun_port: 3478,
            turn_server: None,
            turn_port: 3478,
            turn_type: TurnType::Udp,
            turn_user: None,
            turn_pwd: None,
            turn_rest_api: None,
            api_secret: None,
            rtp_port_min: 10000,
            rtp_port_max: 60000,
            ipv6: false,
            ice_lite: false,
            ice_tcp: false,
            full_trickle: false,
            nack_queue: 300,
            no_media_timer: 0,
            no_media_hangup: false,
            rfc4588: false,
            event_stats_period: 0,
            enforce_interfaces: Vec::new(),
            ignore_interfaces: Vec::new(),
            nat_1_1_mapping: None,
            token_auth: false,
            token_secret: None,
            plugins_disabled: Vec::new(),
            transports_disabled: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Builds a typed snapshot from a raw INI config, applying defaults for
    /// anything not set.
    ///
    /// # Errors
    /// Returns an error for values that are present but unparseable where
    /// silently ignoring them would change behavior (port range, NAT mapping).
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let mut out = Self::default();

        out.stun_server = cfg.get_non_empty("general", "stun_server").map(String::from);
        out.stun_port = cfg.get_u16("general", "stun_port", out.stun_port);
        out.turn_server = cfg.get_non_empty("general", "turn_server").map(String::from);
        out.turn_port = cfg.get_u16("general", "turn_port", out.turn_port);
        out.turn_type = match cfg.get_non_empty("general", "turn_type") {
            None | Some("udp") => TurnType::Udp,
            Some("tcp") => TurnType::Tcp,
            Some("tls") => TurnType::Tls,
            Some(other) => {
                return Err(ConfigError::BadValue {
                    section: "general",
                    key: "turn_type",
                    value: other.to_string(),
                });
            }
        };
        out.turn_user = cfg.get_non_empty("general", "turn_user").map(String::from);
        out.turn_pwd = cfg.get_non_empty("general", "turn_pwd").map(String::from);
        out.turn_rest_api = cfg
            .get_non_empty("general", "turn_rest_api")
            .map(String::from);
        out.api_secret = cfg.get_non_empty("general", "api_secret").map(String::from);

        if let Some(range) = cfg.get_non_empty("media", "rtp_port_range") {
            let (min, max) = range
                .split_once('-')
                .and_then(|(a, b)| Some((a.trim().parse().ok()?, b.trim().parse().ok()?)))
                .filter(|(min, max)| min <= max && *min > 0)
                .ok_or(ConfigError::BadValue {
                    section: "media",
                    key: "rtp_port_range",
                    value: range.to_string(),
                })?;
            out.rtp_port_min = min;
            out.rtp_port_max = max;
        }
        out.ipv6 = cfg.get_bool("media", "ipv6", out.ipv6);
        out.ice_lite = cfg.get_bool("media", "ice_lite", out.ice_lite);
        out.ice_tcp = cfg.get_bool("media", "ice_tcp", out.ice_tcp);
        out.full_trickle = cfg.get_bool("media", "full_trickle", out.full_trickle);
        out.nack_queue = cfg.get_usize("media", "nack_queue", out.nack_queue);
        out.no_media_timer = cfg.get_u64("media", "no_media_timer", out.no_media_timer);
        out.no_media_hangup = cfg.get_bool("media", "no_media_hangup", out.no_media_hangup);
        out.rfc4588 = cfg.get_bool("media", "rfc4588", out.rfc4588);
        out.event_stats_period = cfg.get_u64("media", "event_stats_period", out.event_stats_period);

        out.enforce_interfaces = list_value(cfg.get_non_empty("nat", "enforce_interface"));
        out.ignore_interfaces = list_value(cfg.get_non_empty("nat", "ignore_interface"));
        if let Some(addr) = cfg.get_non_empty("nat", "nat_1_1_mapping") {
            let parsed = addr.parse().map_err(|_| ConfigError::BadValue {
                section: "nat",
                key: "nat_1_1_mapping",
                value: addr.to_string(),
            })?;
            out.nat_1_1_mapping = Some(parsed);
        }

        out.token_auth = cfg.get_bool("auth", "token_auth", out.token_auth);
        out.token_secret = cfg.get_non_empty("auth", "token_secret").map(String::from);

        out.plugins_disabled = list_value(cfg.get_non_empty("plugins", "disable"));
        out.transports_disabled = list_value(cfg.get_non_empty("transports", "disable"));

        Ok(out)
    }
}

fn list_value(raw: Option<&str>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# gateway config
[general]
stun_server = stun.example.org
stun_port = 3478
api_secret = "sup3rsecret"

[media]
rtp_port_range = 20000-40000
nack_queue = 500
rfc4588 = true
no_media_timer = 5

[nat]
ignore_interface = vmnet, docker0
nat_1_1_mapping = 203.0.113.7

[auth]
token_auth = yes
"#;

    #[test]
    fn parses_sections_and_globals() {
        let cfg = Config::parse(SAMPLE);
        assert_eq!(cfg.get("general", "stun_server"), Some("stun.example.org"));
        assert_eq!(cfg.get("general", "api_secret"), Some("sup3rsecret"));
        assert_eq!(cfg.get("media", "nack_queue"), Some("500"));
        assert!(cfg.get("media", "missing").is_none());
    }

    #[test]
    fn typed_snapshot_applies_values_and_defaults() {
        let cfg = Config::parse(SAMPLE);
        let gw = GatewayConfig::from_config(&cfg).unwrap();
        assert_eq!(gw.stun_server.as_deref(), Some("stun.example.org"));
        assert_eq!(gw.rtp_port_min, 20000);
        assert_eq!(gw.rtp_port_max, 40000);
        assert_eq!(gw.nack_queue, 500);
        assert!(gw.rfc4588);
        assert_eq!(gw.no_media_timer, 5);
        assert!(!gw.no_media_hangup);
        assert!(gw.token_auth);
        assert_eq!(gw.ignore_interfaces, vec!["vmnet", "docker0"]);
        assert_eq!(
            gw.nat_1_1_mapping,
            Some("203.0.113.7".parse::<IpAddr>().unwrap())
        );
        // untouched defaults
        assert_eq!(gw.turn_type, TurnType::Udp);
        assert!(!gw.ice_lite);
        assert_eq!(gw.event_stats_period, 0);
    }

    #[test]
    fn bad_port_range_is_rejected() {
        let cfg = Config::parse("[media]\nrtp_port_range = 5000-100\n");
        assert!(GatewayConfig::from_config(&cfg).is_err());
    }

    #[test]
    fn bad_turn_type_is_rejected() {
        let cfg = Config::parse("[general]\nturn_type = quic\n");
        assert!(GatewayConfig::from_config(&cfg).is_err());
    }
}
