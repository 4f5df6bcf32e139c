use serde::{Deserialize, Serialize};

/// Availability entry of a Home Assistant MQTT discovery payload.
///
/// # Fields
///
/// * `payload_available` *(Option<String>)*:
///   The payload that represents the available state.
///
/// * `payload_not_available` *(Option<String>)*:
///   The payload that represents the unavailable state.
///
/// * `topic` *(String)*:
///   An MQTT topic subscribed to receive availability (online/offline) updates.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Availability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_not_available: Option<String>,
    pub topic: String,
}

impl Availability {
    pub fn online_offline(topic: String) -> Self {
        Self {
            payload_available: Some(AvailabilityState::Online.as_str().to_string()),
            payload_not_available: Some(AvailabilityState::Offline.as_str().to_string()),
            topic,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityState {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "offline")]
    Offline,
}

impl AvailabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityState::Online => "online",
            AvailabilityState::Offline => "offline",
        }
    }
}
