use crate::protocol::mac::normalize_mac;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Message kinds carried on `qingping/{MAC}/up`, keyed by the wire `type` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Heartbeat,
    RealtimeData,
    DeviceStatus,
    HistoryData,
    Ack,
    Settings,
}

impl MessageType {
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "10" => Some(Self::Heartbeat),
            "12" => Some(Self::RealtimeData),
            "13" => Some(Self::DeviceStatus),
            "17" => Some(Self::HistoryData),
            "18" => Some(Self::Ack),
            "28" => Some(Self::Settings),
            _ => None,
        }
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Heartbeat => "Heartbeat",
            Self::RealtimeData => "Sensor Data",
            Self::DeviceStatus => "Device Status",
            Self::HistoryData => "Sensor Data (Buffered)",
            Self::Ack => "Config ACK",
            Self::Settings => "Device Settings",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid message envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no `type` field")]
    MissingType,
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("invalid {message_type} payload: {reason}")]
    InvalidPayload {
        message_type: MessageType,
        reason: String,
    },
}

/// One `sensorData` entry after dropping null and implausible values.
pub type SensorSample = BTreeMap<String, f64>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPayload {
    pub wifi_ssid: Option<String>,
    pub wifi_rssi: Option<i32>,
    pub firmware: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Empty,
    Sensors(Vec<SensorSample>),
    Status(StatusPayload),
    Settings(Map<String, Value>),
    Ack { ack_id: Option<u64>, code: Option<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMessage {
    pub message_type: MessageType,
    pub id: Option<u64>,
    pub mac: Option<String>,
    pub need_ack: bool,
    pub payload: MessagePayload,
    /// Fields this bridge does not interpret, kept as received.
    pub extra: Map<String, Value>,
}

impl DeviceMessage {
    /// Correlation id to acknowledge, if the device asked for an ack and gave one.
    pub fn ack_target(&self) -> Option<u64> {
        if self.need_ack { self.id } else { None }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: Option<Value>,
    id: Option<Value>,
    mac: Option<Value>,
    need_ack: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

pub fn decode(raw: &[u8]) -> Result<DeviceMessage, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(raw)?;

    let code = match envelope.message_type {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
        None => return Err(DecodeError::MissingType),
    };
    let message_type = MessageType::from_wire(code.trim()).ok_or(DecodeError::UnknownType(code))?;

    let mut rest = envelope.rest;
    let payload = match message_type {
        MessageType::Heartbeat => MessagePayload::Empty,
        MessageType::RealtimeData | MessageType::HistoryData => {
            MessagePayload::Sensors(take_sensor_data(message_type, &mut rest)?)
        }
        MessageType::DeviceStatus => MessagePayload::Status(take_status(&mut rest)),
        MessageType::Settings => match rest.remove("setting") {
            Some(Value::Object(settings)) => MessagePayload::Settings(settings),
            Some(other) => {
                return Err(DecodeError::InvalidPayload {
                    message_type,
                    reason: format!("`setting` must be an object, got {}", other),
                });
            }
            None => {
                return Err(DecodeError::InvalidPayload {
                    message_type,
                    reason: "missing `setting` object".to_string(),
                });
            }
        },
        MessageType::Ack => MessagePayload::Ack {
            ack_id: rest.remove("ack_id").as_ref().and_then(as_u64),
            code: rest.remove("code").as_ref().and_then(Value::as_i64),
        },
    };

    Ok(DeviceMessage {
        message_type,
        id: envelope.id.as_ref().and_then(as_u64),
        mac: envelope
            .mac
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|m| normalize_mac(m).ok()),
        need_ack: envelope.need_ack.as_ref().is_some_and(is_truthy),
        payload,
        extra: rest,
    })
}

fn take_sensor_data(
    message_type: MessageType,
    rest: &mut Map<String, Value>,
) -> Result<Vec<SensorSample>, DecodeError> {
    let entries = match rest.remove("sensorData") {
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(DecodeError::InvalidPayload {
                message_type,
                reason: format!("`sensorData` must be an array, got {}", other),
            });
        }
        None => {
            return Err(DecodeError::InvalidPayload {
                message_type,
                reason: "missing `sensorData` array".to_string(),
            });
        }
    };

    Ok(entries
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| {
            entry
                .iter()
                .filter(|(name, _)| name.as_str() != "timestamp")
                .filter_map(|(name, field)| {
                    let value = match field {
                        Value::Object(inner) => inner.get("value").and_then(Value::as_f64),
                        other => other.as_f64(),
                    }?;
                    is_plausible(name, value).then(|| (name.clone(), value))
                })
                .collect()
        })
        .collect())
}

fn take_status(rest: &mut Map<String, Value>) -> StatusPayload {
    let mut status = StatusPayload::default();

    // "ssid,rssi,..." as reported by the firmware
    if let Some(Value::String(wifi_info)) = rest.remove("wifi_info")
        && wifi_info.contains(',')
    {
        let mut parts = wifi_info.split(',');
        status.wifi_ssid = parts.next().map(str::to_string);
        status.wifi_rssi = parts.next().and_then(|p| p.trim().parse().ok());
    }

    let sw_version = rest.remove("sw_version");
    let module_version = rest.remove("module_version");
    status.firmware = sw_version
        .as_ref()
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .or_else(|| module_version.as_ref().and_then(Value::as_str))
        .map(str::to_string);

    status
}

fn is_plausible(sensor: &str, value: f64) -> bool {
    if !value.is_finite() {
        return false;
    }
    let range = match sensor {
        "temperature" => -40.0..=125.0,
        "humidity" => 0.0..=100.0,
        "co2" | "tvoc" => 0.0..=10_000.0,
        "pm25" | "pm10" => 0.0..=2_000.0,
        "battery" => 0.0..=100.0,
        _ => return true,
    };
    range.contains(&value)
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s.trim() == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
