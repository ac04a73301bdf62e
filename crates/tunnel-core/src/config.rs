//! Configuration model and validation (spec §4.7).
//!
//! Loading a config file and applying environment overrides is a thin,
//! intentionally boring `serde`/`toml` read (CLI argument parsing proper is
//! out of scope per spec §1) — the binaries take a single config file path
//! as their only argument.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub token: String,
    /// Reserved for a future TLS-terminating listener; setting it currently
    /// fails validation rather than being silently ignored (spec §1 places
    /// TLS issuance out of scope, but a config that names a cert and is
    /// quietly served in plaintext anyway is worse than one that's rejected).
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub use_improved: bool,
}

fn default_listen() -> String {
    ":8443".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub target: String,
    pub client_id: String,
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
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub forwarders: Vec<ForwarderConfig>,
}

impl Config {
    /// Loads and validates a config file, applying `FORWARDER_<NAME>_*`
    /// environment overrides and `${VAR}` placeholder resolution first
    /// (spec §4.7, §6).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.resolve_placeholders()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolves a `${VAR}` placeholder in `server.token` from the
    /// environment (spec §6 `server.token`).
    fn resolve_placeholders(&mut self) -> Result<(), ConfigError> {
        if let Some(var) = placeholder_var(&self.server.token) {
            let value = std::env::var(var)
                .map_err(|_| ConfigError::MissingEnvVar(var.to_string()))?;
            self.server.token = value;
        }
        Ok(())
    }

    /// Applies `FORWARDER_<UPPERCASE_NAME>_{PORT,TARGET,ENABLED}`
    /// environment overrides before validation (spec §4.7).
    fn apply_env_overrides(&mut self) {
        for fwd in &mut self.forwarders {
            let prefix = format!("FORWARDER_{}_", fwd.name.to_uppercase());
            if let Ok(v) = std::env::var(format!("{prefix}PORT")) {
                if let Ok(port) = v.parse() {
                    fwd.port = port;
                }
            }
            if let Ok(v) = std::env::var(format!("{prefix}TARGET")) {
                fwd.target = v;
            }
            if let Ok(v) = std::env::var(format!("{prefix}ENABLED")) {
                if let Ok(enabled) = v.parse() {
                    fwd.enabled = enabled;
                }
            }
        }
    }

    /// Validation rules from spec §4.7. Disabled forwarders are skipped
    /// silently (not validated, not started).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.token.trim().is_empty() || is_placeholder(&self.server.token) {
            return Err(ConfigError::MissingToken);
        }
        if self.server.tls.is_some() {
            return Err(ConfigError::TlsNotSupported);
        }

        let mut seen_ports: HashSet<u16> = HashSet::new();
        for fwd in &self.forwarders {
            if !fwd.enabled {
                continue;
            }
            if fwd.port == 0 {
                return Err(ConfigError::PortOutOfRange(fwd.port));
            }
            if !seen_ports.insert(fwd.port) {
                return Err(ConfigError::DuplicatePort(fwd.port));
            }
            if fwd.target.trim().is_empty() {
                return Err(ConfigError::MissingTarget(fwd.name.clone()));
            }
        }
        Ok(())
    }

    pub fn enabled_forwarders(&self) -> impl Iterator<Item = &ForwarderConfig> {
        self.forwarders.iter().filter(|f| f.enabled)
    }
}

fn placeholder_var(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
}

fn is_placeholder(value: &str) -> bool {
    placeholder_var(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                listen: default_listen(),
                token: "t".into(),
                tls: None,
                use_improved: true,
            },
            forwarders: vec![ForwarderConfig {
                name: "web".into(),
                port: 8080,
                target: "webapp:80".into(),
                client_id: "a-web".into(),
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
    fn duplicate_ports_across_enabled_entries_rejected() {
        let mut config = base_config();
        let mut dup = config.forwarders[0].clone();
        dup.name = "web2".into();
        dup.client_id = "a-web2".into();
        config.forwarders.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePort(8080))
        ));
    }

    #[test]
    fn duplicate_port_on_disabled_entry_is_ignored() {
        let mut config = base_config();
        let mut dup = config.forwarders[0].clone();
        dup.name = "web2".into();
        dup.enabled = false;
        config.forwarders.push(dup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_target_on_enabled_entry_rejected() {
        let mut config = base_config();
        config.forwarders[0].target = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTarget(_))
        ));
    }

    #[test]
    fn placeholder_token_rejected() {
        let mut config = base_config();
        config.server.token = "${TUNNEL_TOKEN}".into();
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));
    }

    #[test]
    fn configured_tls_is_rejected_rather_than_silently_ignored() {
        let mut config = base_config();
        config.server.tls = Some(TlsConfig {
            cert: "cert.pem".into(),
            key: "key.pem".into(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TlsNotSupported)
        ));
    }

    #[test]
    fn env_override_changes_port_and_target() {
        std::env::set_var("FORWARDER_WEB_PORT", "9090");
        std::env::set_var("FORWARDER_WEB_TARGET", "otherhost:81");
        let mut config = base_config();
        config.apply_env_overrides();
        assert_eq!(config.forwarders[0].port, 9090);
        assert_eq!(config.forwarders[0].target, "otherhost:81");
        std::env::remove_var("FORWARDER_WEB_PORT");
        std::env::remove_var("FORWARDER_WEB_TARGET");
    }
}
