//! Exit server configuration: the shared [`CoreConfig`] plus the two
//! carrier bind addresses (§4.8).

use halftunnel_core::config::CoreConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub upstream_bind_addr: String,
    pub downstream_bind_addr: String,
    #[serde(flatten)]
    pub core: CoreConfig,
}

impl Default for ExitConfig {
    fn default() -> Self {
        ExitConfig {
            upstream_bind_addr: "0.0.0.0:9001".to_string(),
            downstream_bind_addr: "0.0.0.0:9002".to_string(),
            core: CoreConfig::default(),
        }
    }
}

impl ExitConfig {
    pub fn load_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_both_carriers_on_distinct_ports() {
        let cfg = ExitConfig::default();
        assert_ne!(cfg.upstream_bind_addr, cfg.downstream_bind_addr);
    }
}
