use crate::protocol::mac::format_mac;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Device {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub connections: Vec<(String, String)>,
}

impl Device {
    pub fn air_monitor(mac: &str, name: Option<&str>) -> Self {
        let formatted = format_mac(mac);
        Self {
            identifiers: vec![format!("qingping_{}", mac)],
            manufacturer: "Qingping".to_string(),
            model: "Air Monitor Lite (CGDN1)".to_string(),
            name: name
                .map(str::to_string)
                .unwrap_or_else(|| format!("Qingping Air Monitor ({})", formatted)),
            connections: vec![("mac".to_string(), formatted.to_ascii_lowercase())],
        }
    }
}
