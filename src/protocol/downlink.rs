use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Type 18 acknowledgment. The device treats the server as offline without it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AckMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub ack_id: u64,
    pub code: i64,
    pub timestamp: i64,
    pub desc: String,
}

impl AckMessage {
    pub fn new(ack_id: u64, issued_at: DateTime<Utc>) -> Self {
        Self {
            message_type: "18",
            ack_id,
            code: 0,
            timestamp: issued_at.timestamp(),
            desc: String::new(),
        }
    }
}

/// Type 17 settings push sent on the down channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingsPush {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub id: u64,
    pub need_ack: u8,
    pub setting: Map<String, Value>,
}

impl SettingsPush {
    pub fn new(id: u64, setting: Map<String, Value>) -> Self {
        Self {
            message_type: "17",
            id,
            need_ack: 1,
            setting,
        }
    }

    /// Interval-only push used when no settings have been reported yet.
    pub fn keepalive_marker(id: u64, interval_seconds: u64) -> Self {
        let mut setting = Map::new();
        for key in ["report_interval", "collect_interval", "pm_sampling_interval"] {
            setting.insert(key.to_string(), Value::from(interval_seconds));
        }
        Self::new(id, setting)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkMessage {
    Ack(AckMessage),
    SettingsPush(SettingsPush),
}

impl DownlinkMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            DownlinkMessage::Ack(ack) => serde_json::to_string(ack),
            DownlinkMessage::SettingsPush(push) => serde_json::to_string(push),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ack_wire_format() {
        let issued_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let json = DownlinkMessage::Ack(AckMessage::new(5, issued_at))
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"18","ack_id":5,"code":0,"timestamp":1700000000,"desc":""}"#
        );
    }

    #[test]
    fn test_settings_push_passes_unknown_keys_through() {
        let mut setting = Map::new();
        setting.insert("report_interval".to_string(), json!(60));
        setting.insert("future_knob".to_string(), json!("on"));
        let json = DownlinkMessage::SettingsPush(SettingsPush::new(3, setting))
            .to_json()
            .unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed,
            json!({"type":"17","id":3,"need_ack":1,"setting":{"report_interval":60,"future_knob":"on"}})
        );
        assert!(json.starts_with(r#"{"type":"17","id":3,"need_ack":1,"#));
    }

    #[test]
    fn test_keepalive_marker() {
        let push = SettingsPush::keepalive_marker(1, 60);
        assert_eq!(push.setting.len(), 3);
        assert_eq!(push.setting.get("pm_sampling_interval"), Some(&json!(60)));
    }
}
