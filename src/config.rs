use crate::protocol::mac::normalize_mac;
use crate::tasks::watchdog::{Thresholds, WatchdogSettings};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Empty means every device publishing on `qingping/+/up` is tracked.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    pub developer: Option<DeveloperConfig>,
    pub cloud: Option<CloudConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub directory: String,
    pub debug_file: String,
    pub info_file: String,
    pub warn_file: String,
    pub error_file: String,
    pub console_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive_seconds: u64,
    pub queue_size: usize,
    pub reconnect_delay_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WatchdogConfig {
    pub check_interval_seconds: u64,
    pub warning_threshold_seconds: u64,
    pub critical_threshold_seconds: u64,
    pub keepalive_interval_seconds: u64,
    /// Interval written into the keep-alive marker while a device's settings are unknown.
    pub default_report_interval_seconds: u64,
    pub resync_timeout_seconds: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 300,
            warning_threshold_seconds: 600,
            critical_threshold_seconds: 1800,
            keepalive_interval_seconds: 300,
            default_report_interval_seconds: 60,
            resync_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    pub mac: String,
    pub name: Option<String>,
    pub warning_threshold_seconds: Option<u64>,
    pub critical_threshold_seconds: Option<u64>,
}

/// Developer portal account used for provisioning.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeveloperConfig {
    pub email: String,
    pub password: String,
    pub config_name: String,
    /// Broker address written into the private config, when devices reach it differently from us.
    pub device_broker_host: Option<String>,
    pub device_broker_port: Option<u16>,
    pub request_timeout_seconds: u64,
}

/// Cloud API app credentials used for the watchdog re-sync.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CloudConfig {
    pub app_key: String,
    pub app_secret: String,
    pub token_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("Unable to read {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Unable to parse {}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.watchdog;
        for (name, value) in [
            ("check_interval_seconds", w.check_interval_seconds),
            ("warning_threshold_seconds", w.warning_threshold_seconds),
            ("critical_threshold_seconds", w.critical_threshold_seconds),
            ("keepalive_interval_seconds", w.keepalive_interval_seconds),
            ("default_report_interval_seconds", w.default_report_interval_seconds),
            ("resync_timeout_seconds", w.resync_timeout_seconds),
        ] {
            if value == 0 {
                bail!("watchdog.{} must be greater than zero", name);
            }
        }
        if w.warning_threshold_seconds >= w.critical_threshold_seconds {
            bail!(
                "watchdog.warning_threshold_seconds ({}) must be less than critical_threshold_seconds ({})",
                w.warning_threshold_seconds,
                w.critical_threshold_seconds
            );
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            let mac = normalize_mac(&device.mac)?;
            if !seen.insert(mac.clone()) {
                bail!("device {} is configured twice", mac);
            }
            let thresholds = self.thresholds_for(device);
            if thresholds.warning_secs <= 0 || thresholds.warning_secs >= thresholds.critical_secs {
                bail!(
                    "device {}: warning threshold ({}) must be positive and less than critical ({})",
                    mac,
                    thresholds.warning_secs,
                    thresholds.critical_secs
                );
            }
        }
        Ok(())
    }

    fn thresholds_for(&self, device: &DeviceConfig) -> Thresholds {
        Thresholds {
            warning_secs: device
                .warning_threshold_seconds
                .unwrap_or(self.watchdog.warning_threshold_seconds) as i64,
            critical_secs: device
                .critical_threshold_seconds
                .unwrap_or(self.watchdog.critical_threshold_seconds) as i64,
        }
    }

    pub fn watchdog_settings(&self) -> Result<WatchdogSettings> {
        let mut device_thresholds = HashMap::new();
        for device in &self.devices {
            device_thresholds.insert(normalize_mac(&device.mac)?, self.thresholds_for(device));
        }
        Ok(WatchdogSettings {
            check_interval: Duration::from_secs(self.watchdog.check_interval_seconds),
            thresholds: Thresholds {
                warning_secs: self.watchdog.warning_threshold_seconds as i64,
                critical_secs: self.watchdog.critical_threshold_seconds as i64,
            },
            device_thresholds,
            resync_timeout: Duration::from_secs(self.watchdog.resync_timeout_seconds),
        })
    }

    pub fn allowed_macs(&self) -> Result<HashSet<String>> {
        Ok(self
            .devices
            .iter()
            .map(|d| normalize_mac(&d.mac))
            .collect::<Result<_, _>>()?)
    }

    pub fn device_names(&self) -> Result<HashMap<String, String>> {
        let mut names = HashMap::new();
        for device in &self.devices {
            if let Some(name) = &device.name {
                names.insert(normalize_mac(&device.mac)?, name.clone());
            }
        }
        Ok(names)
    }

    pub fn save_example(path: &str) -> Result<()> {
        let example_config = Config {
            logging: LoggingConfig {
                directory: "./logs".to_string(),
                debug_file: "log_debug.log".to_string(),
                info_file: "log_info.log".to_string(),
                warn_file: "log_warn.log".to_string(),
                error_file: "log_error.log".to_string(),
                console_level: "info".to_string(),
            },
            mqtt: MqttConfig {
                host: "192.168.1.40".to_string(),
                port: 1883,
                username: "qingping".to_string(),
                password: "REPLACE_WITH_YOUR_MQTT_PASSWORD".to_string(),
                client_id: "qingping-mqtt-bridge".to_string(),
                keep_alive_seconds: 30,
                queue_size: 100,
                reconnect_delay_seconds: 5,
            },
            watchdog: WatchdogConfig::default(),
            devices: vec![DeviceConfig {
                mac: "AA:BB:CC:DD:EE:FF".to_string(),
                name: Some("Living Room Air Monitor".to_string()),
                warning_threshold_seconds: None,
                critical_threshold_seconds: None,
            }],
            developer: Some(DeveloperConfig {
                email: "REPLACE_WITH_YOUR_QINGPING_EMAIL".to_string(),
                password: "REPLACE_WITH_YOUR_QINGPING_PASSWORD".to_string(),
                config_name: "Home Assistant".to_string(),
                device_broker_host: None,
                device_broker_port: None,
                request_timeout_seconds: 15,
            }),
            cloud: Some(CloudConfig {
                app_key: "REPLACE_WITH_YOUR_APP_KEY".to_string(),
                app_secret: "REPLACE_WITH_YOUR_APP_SECRET".to_string(),
                token_ttl_seconds: 3000,
                request_timeout_seconds: 15,
            }),
        };

        let toml_content = toml::to_string_pretty(&example_config)?;
        fs::write(path, toml_content)?;
        Ok(())
    }
}
