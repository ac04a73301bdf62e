//! Agent-side configuration: which relay to dial, the shared credential,
//! this agent's identity, and the forwarders it will serve `connect`
//! requests for (spec §3 "Forwarder definition", §6 "Configuration
//! surface" — loading is the same `toml` + env-override shape the relay
//! uses, adapted to the agent's side of the schema).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use tunnel_core::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// `ws://host:port/tunnel` or `wss://host:port/tunnel`.
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderEntry {
    pub name: String,
    pub target: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub warn_on_fail: bool,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub relay: RelayConfig,
    #[serde(default)]
    pub forwarders: Vec<ForwarderEntry>,
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: AgentConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.resolve_placeholders()?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_placeholders(&mut self) -> Result<(), ConfigError> {
        if let Some(var) = self
            .relay
            .token
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            self.relay.token =
                std::env::var(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        for fwd in &self.forwarders {
            if fwd.enabled && fwd.target.trim().is_empty() {
                return Err(ConfigError::MissingTarget(fwd.name.clone()));
            }
        }
        Ok(())
    }

    pub fn enabled_forwarders(&self) -> impl Iterator<Item = &ForwarderEntry> {
        self.forwarders.iter().filter(|f| f.enabled)
    }

    /// The `name -> target` map declared at registration (spec §4.3 step 3
    /// resolution, see [`tunnel_protocol::Message::Register`]).
    pub fn forwarder_targets(&self) -> BTreeMap<String, String> {
        self.enabled_forwarders()
            .map(|f| (f.name.clone(), f.target.clone()))
            .collect()
    }

    pub fn target_for(&self, name: &str) -> Option<&str> {
        self.enabled_forwarders()
            .find(|f| f.name == name)
            .map(|f| f.target.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AgentConfig {
        AgentConfig {
            agent_id: "a-web".into(),
            relay: RelayConfig {
                url: "ws://127.0.0.1:8443/tunnel".into(),
                token: "t".into(),
            },
            forwarders: vec![ForwarderEntry {
                name: "web".into(),
                target: "webapp:80".into(),
                enabled: true,
                warn_on_fail: false,
                description: String::new(),
            }],
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_target_on_enabled_forwarder_rejected() {
        let mut config = base_config();
        config.forwarders[0].target = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTarget(_))
        ));
    }

    #[test]
    fn disabled_forwarder_with_empty_target_is_ignored() {
        let mut config = base_config();
        config.forwarders[0].target = String::new();
        config.forwarders[0].enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn forwarder_targets_only_includes_enabled_entries() {
        let mut config = base_config();
        config.forwarders.push(ForwarderEntry {
            name: "disabled".into(),
            target: "x:1".into(),
            enabled: false,
            warn_on_fail: false,
            description: String::new(),
        });
        let targets = config.forwarder_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets.get("web").map(String::as_str), Some("webapp:80"));
    }
}
