//! Entry client configuration: the shared [`CoreConfig`] plus the two
//! carrier addresses to dial and the local front ends to bind (§6.3, §6.4).

use halftunnel_core::config::{CoreConfig, PortForwardConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub upstream_addr: String,
    pub downstream_addr: String,
    pub port_forwards: Vec<PortForwardConfig>,
    #[serde(flatten)]
    pub core: CoreConfig,
}

impl Default for EntryConfig {
    fn default() -> Self {
        EntryConfig {
            upstream_addr: "127.0.0.1:9001".to_string(),
            downstream_addr: "127.0.0.1:9002".to_string(),
            port_forwards: Vec::new(),
            core: CoreConfig::default(),
        }
    }
}

impl EntryConfig {
    pub fn load_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = EntryConfig::default();
        assert!(!cfg.upstream_addr.is_empty());
        assert!(cfg.port_forwards.is_empty());
    }

    #[test]
    fn yaml_overrides_merge_with_core_defaults() {
        let yaml = "upstream_addr: \"10.0.0.1:9001\"\ndownstream_addr: \"10.0.0.2:9002\"\nping_interval_secs: 5\n";
        let cfg = EntryConfig::load_yaml(yaml).unwrap();
        assert_eq!(cfg.upstream_addr, "10.0.0.1:9001");
        assert_eq!(cfg.core.ping_interval_secs, 5);
    }
}
