use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Serialize, Debug)]
pub struct BindDevicesRequest<'a> {
    #[serde(rename = "macList")]
    pub mac_list: &'a [String],
    #[serde(rename = "privateConfigId")]
    pub private_config_id: u64,
}

#[derive(Serialize, Debug)]
pub struct UnbindDevicesRequest<'a> {
    #[serde(rename = "macList")]
    pub mac_list: &'a [String],
}

/// Cloud API settings update. The cloud forwards it to the device on its next check-in.
#[derive(Serialize, Debug)]
pub struct DeviceSettingsRequest {
    pub mac: Vec<String>,
    pub settings: Map<String, Value>,
}
