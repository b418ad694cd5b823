use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Daemon configuration: the TOML file first, environment variables on
/// top. Everything is optional - with no configuration at all the daemon
/// picks its interfaces itself.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Force a LAN interface by name (`LAN` environment variable wins).
    pub lan: Option<String>,

    /// Force a WAN interface by name (`WAN` environment variable wins).
    pub wan: Option<String>,

    #[serde(default)]
    pub wifi: Option<WifiSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WifiSection {
    /// Wireless interface to host the access point on.
    pub interface: String,
    pub ssid: String,
    pub password: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("couldn't read {}", path.display()))
            }
        };

        if let Ok(lan) = std::env::var("LAN") {
            config.lan = Some(lan);
        }
        if let Ok(wan) = std::env::var("WAN") {
            config.wan = Some(wan);
        }
        if std::env::var_os("NO_AUTO_UPDATE").is_some() {
            // Accepted for compatibility; this build has no updater.
            debug!("NO_AUTO_UPDATE is set");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            lan = "enp3s0"
            wan = "enp1s0"

            [wifi]
            interface = "wlan0"
            ssid = "test"
            password = "password"
            "#,
        )
        .unwrap();
        assert_eq!(config.lan.as_deref(), Some("enp3s0"));
        let wifi = config.wifi.unwrap();
        assert!(wifi.enabled);
        assert_eq!(wifi.ssid, "test");
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("nonsense = 1").is_err());
    }

    #[test]
    fn empty_config_is_fine() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.lan.is_none());
        assert!(config.wifi.is_none());
    }
}
