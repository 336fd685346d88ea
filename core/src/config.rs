//! Shared configuration knobs (§6.5).
//!
//! Plain serde-derived structs loaded from YAML by each binary's `main`.
//! Durations are represented as seconds/milliseconds fields (not
//! `std::time::Duration` directly — serde has no built-in mapping for it)
//! and converted at the point of use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_keepalive_ack_timeout_factor() -> u32 {
    2
}

fn default_dial_timeout_secs() -> u64 {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_carrier_write_timeout_secs() -> u64 {
    10
}

fn default_carrier_read_timeout_secs() -> u64 {
    0
}

fn default_reassembly_budget_bytes() -> usize {
    1 << 20
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_max_streams_per_session() -> usize {
    1_000
}

/// Core knobs shared by both the entry and exit binaries (§6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub session_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub keepalive_ack_timeout_factor: u32,
    pub dial_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub carrier_write_timeout_secs: u64,
    pub carrier_read_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
    pub reassembly_budget_bytes: usize,
    pub stall: StallConfig,
    pub max_sessions: usize,
    pub max_streams_per_session: usize,
    pub socks5: Socks5Config,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            session_timeout_secs: default_session_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            keepalive_ack_timeout_factor: default_keepalive_ack_timeout_factor(),
            dial_timeout_secs: default_dial_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            carrier_write_timeout_secs: default_carrier_write_timeout_secs(),
            carrier_read_timeout_secs: default_carrier_read_timeout_secs(),
            reconnect: ReconnectConfig::default(),
            reassembly_budget_bytes: default_reassembly_budget_bytes(),
            stall: StallConfig::default(),
            max_sessions: default_max_sessions(),
            max_streams_per_session: default_max_streams_per_session(),
            socks5: Socks5Config::default(),
        }
    }
}

impl CoreConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// `0` means "no timeout" (§5).
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn carrier_write_timeout(&self) -> Duration {
        Duration::from_secs(self.carrier_write_timeout_secs)
    }

    pub fn carrier_read_timeout(&self) -> Duration {
        Duration::from_secs(self.carrier_read_timeout_secs)
    }

    pub fn keepalive_ack_timeout(&self) -> Duration {
        self.ping_interval() * self.keepalive_ack_timeout_factor
    }

    pub fn load_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            enabled: true,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StallAction {
    Log,
    Restart,
    Shutdown,
}

impl Default for StallAction {
    fn default() -> Self {
        StallAction::Restart
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StallConfig {
    pub check_interval_secs: u64,
    pub threshold_secs: u64,
    pub action: StallAction,
}

impl Default for StallConfig {
    fn default() -> Self {
        StallConfig {
            check_interval_secs: 30,
            threshold_secs: 120,
            action: StallAction::Restart,
        }
    }
}

impl StallConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Socks5Config {
    pub enabled: bool,
    pub listen_addr: String,
    pub auth: Option<Socks5Auth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Socks5Auth {
    pub user: String,
    pub pass: String,
}

/// A single static `{listen_host:listen_port -> remote_host:remote_port}`
/// forward rule (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForwardConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub listen_host: String,
    pub listen_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    #[serde(default)]
    pub exit_on_port_in_use: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.session_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.ping_interval(), Duration::from_secs(30));
        assert_eq!(cfg.keepalive_ack_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.reconnect.multiplier, 2.0);
        assert_eq!(cfg.stall.action, StallAction::Restart);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg = CoreConfig::load_yaml("ping_interval_secs: 5\n").unwrap();
        assert_eq!(cfg.ping_interval_secs, 5);
        assert_eq!(cfg.session_timeout_secs, default_session_timeout_secs());
    }

    #[test]
    fn socks5_auth_parses() {
        let yaml = "socks5:\n  enabled: true\n  listen_addr: \"127.0.0.1:1080\"\n  auth:\n    user: bob\n    pass: s3cret\n";
        let cfg = CoreConfig::load_yaml(yaml).unwrap();
        let auth = cfg.socks5.auth.unwrap();
        assert_eq!(auth.user, "bob");
        assert_eq!(auth.pass, "s3cret");
    }

    #[test]
    fn port_forward_rule_without_a_name_parses() {
        let yaml = "listen_host: 0.0.0.0\nlisten_port: 2222\nremote_host: 10.0.0.5\nremote_port: 22\n";
        let rule: PortForwardConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.name.is_none());
        assert_eq!(rule.remote_port, 22);
    }
}
