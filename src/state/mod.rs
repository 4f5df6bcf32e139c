use crate::protocol::message::{MessageType, SensorSample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub mod registry;

/// Watchdog view of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    Warning,
    Critical,
    /// Transient: reported for one check cycle after data resumes.
    Recovered,
}

impl HealthState {
    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthState::Warning | HealthState::Critical)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceDiagnostics {
    pub wifi_ssid: Option<String>,
    pub wifi_rssi: Option<i32>,
    pub firmware: Option<String>,
    pub status_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub mac: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_data_at: Option<DateTime<Utc>>,
    pub latest_readings: BTreeMap<String, f64>,
    pub diagnostics: DeviceDiagnostics,
    pub settings_snapshot: Map<String, Value>,
    pub health: HealthState,
    pub last_message_type: Option<MessageType>,
}

impl DeviceState {
    pub fn new(mac: &str) -> Self {
        Self {
            mac: mac.to_string(),
            last_seen_at: None,
            last_data_at: None,
            latest_readings: BTreeMap::new(),
            diagnostics: DeviceDiagnostics::default(),
            settings_snapshot: Map::new(),
            health: HealthState::Healthy,
            last_message_type: None,
        }
    }

    /// Merges `update` into this record. Fields the update does not carry are left alone.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(seen_at) = update.seen_at {
            self.last_seen_at = Some(seen_at);
        }
        if let Some(data_at) = update.data_at {
            self.last_data_at = Some(data_at);
        }
        if update.message_type.is_some() {
            self.last_message_type = update.message_type;
        }
        for sample in update.readings {
            self.latest_readings.extend(sample);
        }
        if let Some(diagnostics) = update.diagnostics {
            if diagnostics.wifi_ssid.is_some() {
                self.diagnostics.wifi_ssid = diagnostics.wifi_ssid;
            }
            if diagnostics.wifi_rssi.is_some() {
                self.diagnostics.wifi_rssi = diagnostics.wifi_rssi;
            }
            if diagnostics.firmware.is_some() {
                self.diagnostics.firmware = diagnostics.firmware;
            }
            if diagnostics.status_at.is_some() {
                self.diagnostics.status_at = diagnostics.status_at;
            }
        }
        // The device pushes partial settings; a missing key keeps its last value.
        self.settings_snapshot.extend(update.settings);
    }
}

/// Partial write produced by dispatching one inbound message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub seen_at: Option<DateTime<Utc>>,
    pub data_at: Option<DateTime<Utc>>,
    pub message_type: Option<MessageType>,
    pub readings: Vec<SensorSample>,
    pub diagnostics: Option<DeviceDiagnostics>,
    pub settings: Map<String, Value>,
}

/// Point-in-time copy handed to readers outside the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub mac: String,
    pub captured_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_data_at: Option<DateTime<Utc>>,
    pub readings: BTreeMap<String, f64>,
    pub diagnostics: DeviceDiagnostics,
    pub settings: Map<String, Value>,
    pub health: HealthState,
    pub last_message_type: Option<String>,
}

impl DeviceSnapshot {
    pub fn capture(state: &DeviceState, captured_at: DateTime<Utc>) -> Self {
        Self {
            mac: state.mac.clone(),
            captured_at,
            last_seen_at: state.last_seen_at,
            last_data_at: state.last_data_at,
            readings: state.latest_readings.clone(),
            diagnostics: state.diagnostics.clone(),
            settings: state.settings_snapshot.clone(),
            health: state.health,
            last_message_type: state.last_message_type.map(|t| t.to_string()),
        }
    }
}
