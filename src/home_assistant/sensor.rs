use crate::home_assistant::availability::Availability;
use crate::home_assistant::device::Device;
use crate::home_assistant::{availability_topic, state_topic, watchdog_topic};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SensorDiscoveryPayload {
    pub device: Device,
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub value_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<Vec<Availability>>,
}

/// Static description of one exposed sensor.
#[derive(Debug, Clone, Copy)]
pub struct SensorKind {
    pub key: &'static str,
    pub name: &'static str,
    pub value_template: &'static str,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub measurement: bool,
    pub diagnostic: bool,
    pub icon: Option<&'static str>,
    /// Reads the watchdog document instead of the state document.
    pub from_watchdog: bool,
}

const fn measurement(
    key: &'static str,
    name: &'static str,
    value_template: &'static str,
    device_class: &'static str,
    unit: &'static str,
) -> SensorKind {
    SensorKind {
        key,
        name,
        value_template,
        device_class: Some(device_class),
        unit: Some(unit),
        measurement: true,
        diagnostic: false,
        icon: None,
        from_watchdog: false,
    }
}

const fn diagnostic(
    key: &'static str,
    name: &'static str,
    value_template: &'static str,
    icon: &'static str,
) -> SensorKind {
    SensorKind {
        key,
        name,
        value_template,
        device_class: None,
        unit: None,
        measurement: false,
        diagnostic: true,
        icon: Some(icon),
        from_watchdog: false,
    }
}

pub const SENSORS: &[SensorKind] = &[
    measurement("temperature", "Temperature", "{{ value_json.readings.temperature }}", "temperature", "°C"),
    measurement("humidity", "Humidity", "{{ value_json.readings.humidity }}", "humidity", "%"),
    measurement("co2", "CO2", "{{ value_json.readings.co2 }}", "carbon_dioxide", "ppm"),
    measurement("pm25", "PM2.5", "{{ value_json.readings.pm25 }}", "pm25", "µg/m³"),
    measurement("pm10", "PM10", "{{ value_json.readings.pm10 }}", "pm10", "µg/m³"),
    SensorKind {
        diagnostic: true,
        ..measurement("battery", "Battery", "{{ value_json.readings.battery }}", "battery", "%")
    },
    SensorKind {
        diagnostic: true,
        ..measurement("wifi_rssi", "WiFi Signal", "{{ value_json.diagnostics.wifi_rssi }}", "signal_strength", "dBm")
    },
    diagnostic("wifi_ssid", "WiFi SSID", "{{ value_json.diagnostics.wifi_ssid }}", "mdi:wifi"),
    diagnostic("firmware", "Firmware", "{{ value_json.diagnostics.firmware }}", "mdi:information-outline"),
    diagnostic("msg_type", "Message Type", "{{ value_json.last_message_type }}", "mdi:message-text"),
    SensorKind {
        device_class: Some("timestamp"),
        icon: None,
        ..diagnostic("last_update", "Last Update", "{{ value_json.last_seen_at }}", "")
    },
    SensorKind {
        from_watchdog: true,
        ..diagnostic("watchdog", "Connection Health", "{{ value_json.state }}", "mdi:heart-pulse")
    },
];

impl SensorKind {
    pub fn discovery_topic(&self, mac: &str) -> String {
        format!("homeassistant/sensor/qingping_{}_{}/config", mac, self.key)
    }

    pub fn discovery_payload(&self, mac: &str, device: &Device) -> SensorDiscoveryPayload {
        SensorDiscoveryPayload {
            device: device.clone(),
            name: self.name.to_string(),
            unique_id: format!("qingping_{}_{}", mac, self.key),
            state_topic: if self.from_watchdog {
                watchdog_topic(mac)
            } else {
                state_topic(mac)
            },
            value_template: self.value_template.to_string(),
            device_class: self.device_class.map(str::to_string),
            unit_of_measurement: self.unit.map(str::to_string),
            state_class: self.measurement.then(|| "measurement".to_string()),
            entity_category: self.diagnostic.then(|| "diagnostic".to_string()),
            icon: self.icon.map(str::to_string),
            // The health sensor stays available so it can report an offline device.
            availability: (!self.from_watchdog)
                .then(|| vec![Availability::online_offline(availability_topic(mac))]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_temperature_discovery_payload() {
        let device = Device::air_monitor("AABBCCDDEEFF", None);
        let kind = SENSORS.iter().find(|s| s.key == "temperature").unwrap();
        let payload = serde_json::to_value(kind.discovery_payload("AABBCCDDEEFF", &device)).unwrap();

        assert_eq!(
            kind.discovery_topic("AABBCCDDEEFF"),
            "homeassistant/sensor/qingping_AABBCCDDEEFF_temperature/config"
        );
        assert_eq!(payload["unique_id"], json!("qingping_AABBCCDDEEFF_temperature"));
        assert_eq!(payload["state_topic"], json!("qingping/AABBCCDDEEFF/state"));
        assert_eq!(payload["state_class"], json!("measurement"));
        assert_eq!(payload["device"]["name"], json!("Qingping Air Monitor (AA:BB:CC:DD:EE:FF)"));
        assert!(payload.get("entity_category").is_none());
    }

    #[test]
    fn test_watchdog_sensor_reads_watchdog_topic_without_availability() {
        let device = Device::air_monitor("AABBCCDDEEFF", Some("Bedroom"));
        let kind = SENSORS.iter().find(|s| s.from_watchdog).unwrap();
        let payload = kind.discovery_payload("AABBCCDDEEFF", &device);
        assert_eq!(payload.state_topic, "qingping/AABBCCDDEEFF/watchdog");
        assert!(payload.availability.is_none());
        assert_eq!(payload.device.name, "Bedroom");
    }
}
