use crate::home_assistant::availability::AvailabilityState;
use crate::home_assistant::device::Device;
use crate::home_assistant::sensor::SENSORS;
use crate::home_assistant::{availability_topic, state_topic};
use crate::mqtt_client::{MqttPublisher, PublishError};
use crate::protocol::downlink::{DownlinkMessage, SettingsPush};
use crate::protocol::mac::normalize_mac;
use crate::protocol::settings::unrecognized_keys;
use crate::state::registry::DeviceRegistry;
use dashmap::DashSet;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A settings change requested from Home Assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsCommand {
    pub mac: String,
    pub setting: Map<String, Value>,
}

/// Parses `qingping/{MAC}/settings/set` with a JSON object body.
pub fn command_topic_parser(topic: &str, payload: &str) -> Option<SettingsCommand> {
    let mut parts: Vec<&str> = topic.split('/').collect();
    parts.resize(5, "");

    if payload.trim().is_empty() {
        error!("Empty payload for topic: {:?}", topic);
        return None;
    }

    match (parts[0], parts[1], parts[2], parts[3], parts[4]) {
        ("qingping", mac, "settings", "set", "") => {
            let mac = normalize_mac(mac).ok()?;
            match serde_json::from_str::<Value>(payload) {
                Ok(Value::Object(setting)) if !setting.is_empty() => {
                    Some(SettingsCommand { mac, setting })
                }
                _ => {
                    error!(
                        "Unable to deserialize payload: {:?} for topic: {:?}",
                        payload, topic
                    );
                    None
                }
            }
        }
        _ => None,
    }
}

/// Mirrors device state into Home Assistant and forwards its setting commands.
#[derive(Clone)]
pub struct HaProcessor<P: MqttPublisher> {
    pub publisher: P,
    pub registry: DeviceRegistry,
    pub published_discovery: Arc<DashSet<String>>,
    pub device_names: Arc<HashMap<String, String>>,
}

impl<P: MqttPublisher> HaProcessor<P> {
    /// Publishes discovery (first time only), availability and the current state document.
    pub async fn publish_device(&self, mac: &str) -> Result<(), PublishError> {
        // Atomically check-and-insert so concurrent messages publish discovery once
        if self.published_discovery.insert(mac.to_string())
            && let Err(e) = self.publish_discovery(mac).await
        {
            self.published_discovery.remove(mac);
            return Err(e);
        }

        self.publisher
            .publish(
                availability_topic(mac),
                AvailabilityState::Online.as_str().to_string(),
                true,
            )
            .await?;

        if let Some(snapshot) = self.registry.snapshot(mac) {
            self.publisher
                .publish(state_topic(mac), serde_json::to_string(&snapshot)?, true)
                .await?;
        }
        Ok(())
    }

    async fn publish_discovery(&self, mac: &str) -> Result<(), PublishError> {
        let device = Device::air_monitor(mac, self.device_names.get(mac).map(String::as_str));
        for kind in SENSORS {
            let payload = kind.discovery_payload(mac, &device);
            self.publisher
                .publish(kind.discovery_topic(mac), serde_json::to_string(&payload)?, true)
                .await?;
        }
        info!(mac = %mac, sensors = SENSORS.len(), "published Home Assistant discovery");
        Ok(())
    }

    /// Sends the command as a type 17 push and returns the push id.
    pub async fn process_settings_command(&self, cmd: SettingsCommand) -> Result<u64, PublishError> {
        let unknown = unrecognized_keys(&cmd.setting);
        if !unknown.is_empty() {
            warn!(mac = %cmd.mac, keys = ?unknown, "forwarding unrecognized setting keys");
        }

        let id = self.publisher.next_push_id();
        let push = DownlinkMessage::SettingsPush(SettingsPush::new(id, cmd.setting));
        self.publisher.publish_down(&cmd.mac, &push).await?;
        debug!(mac = %cmd.mac, id, "forwarded settings command");
        Ok(id)
    }
}
