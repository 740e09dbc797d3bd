//! Configuration structs for modems and wormholes, loaded from TOML.
//!
//! Unknown keys are rejected so a typo in a config file fails loudly
//! instead of silently keeping a default.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    Tcp,
    Uart,
    Pty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModemConfig {
    pub conntype: ConnType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dev: Option<String>,
    pub startscript: Option<String>,
    pub module_name: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WormholeConfig {
    pub entry_nodes: Vec<String>,
    pub exit_nodes: Vec<String>,
    pub rx1_delay: f64,
    pub dev_addr: Option<[u8; 4]>,
    pub channel: ChannelConfig,
    pub channel_rx2: Option<ChannelConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub frequency: u64,
    pub bandwidth: u16,
    pub spreadingfactor: u8,
    pub codingrate: u8,
    #[serde(default = "default_syncword")]
    pub syncword: u8,
    #[serde(default)]
    pub invertiqrx: bool,
}

fn default_syncword() -> u8 {
    0x34
}

/// A partial update to a running wormhole's channel, as taken by
/// `set_lora_channel` on the wormhole orchestrators. Fields left `None`
/// keep their current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelConfigUpdate {
    pub frequency: Option<u64>,
    pub bandwidth: Option<u16>,
    pub spreadingfactor: Option<u8>,
    pub codingrate: Option<u8>,
    pub syncword: Option<u8>,
    pub invertiqrx: Option<bool>,
}

impl ChannelConfigUpdate {
    pub fn apply(&self, target: &mut ChannelConfig) {
        if let Some(v) = self.frequency {
            target.frequency = v;
        }
        if let Some(v) = self.bandwidth {
            target.bandwidth = v;
        }
        if let Some(v) = self.spreadingfactor {
            target.spreadingfactor = v;
        }
        if let Some(v) = self.codingrate {
            target.codingrate = v;
        }
        if let Some(v) = self.syncword {
            target.syncword = v;
        }
        if let Some(v) = self.invertiqrx {
            target.invertiqrx = v;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub modems: std::collections::BTreeMap<String, ModemConfig>,
    #[serde(default)]
    pub wormholes: std::collections::BTreeMap<String, WormholeConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file: {}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_modem_key() {
        let toml = r#"
            [modems.dev1]
            conntype = "tcp"
            host = "127.0.0.1"
            port = 4711
            bogus = true
        "#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn parses_minimal_tcp_modem() {
        let toml = r#"
            [modems.dev1]
            conntype = "tcp"
            host = "127.0.0.1"
            port = 4711
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let modem = &config.modems["dev1"];
        assert_eq!(modem.conntype, ConnType::Tcp);
        assert_eq!(modem.port, Some(4711));
        assert!(!modem.debug);
    }

    #[test]
    fn parses_wormhole_with_channels() {
        let toml = r#"
            [modems.entry]
            conntype = "uart"
            dev = "/dev/ttyACM0"

            [modems.exit]
            conntype = "uart"
            dev = "/dev/ttyACM1"

            [wormholes.rx2]
            entry_nodes = ["entry"]
            exit_nodes = ["exit"]
            rx1_delay = 1.0

            [wormholes.rx2.channel]
            frequency = 868100000
            bandwidth = 125
            spreadingfactor = 7
            codingrate = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let wh = &config.wormholes["rx2"];
        assert_eq!(wh.entry_nodes, vec!["entry".to_string()]);
        assert_eq!(wh.channel.frequency, 868_100_000);
        assert_eq!(wh.channel.bandwidth, 125);
        assert_eq!(wh.channel.syncword, 0x34);
    }
}
