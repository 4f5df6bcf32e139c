use serde::{Deserialize, Serialize};

pub const CLIENT_ID_TEMPLATE: &str = "qingping-{mac}";
pub const TOPIC_UP_TEMPLATE: &str = "qingping/{mac}/up";
pub const TOPIC_DOWN_TEMPLATE: &str = "qingping/{mac}/down";

/// Network type 1 is a self-hosted MQTT broker.
pub const NETWORK_TYPE_SELF_HOSTED_MQTT: i64 = 1;

/// A private configuration on the developer portal: where bound devices connect and how often
/// they report.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PrivateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub product: Product,
    #[serde(rename = "networkConfig", default)]
    pub network_config: NetworkConfig,
    #[serde(rename = "reportConfig", default)]
    pub report_config: ReportConfig,
    #[serde(rename = "encryptConfig", default)]
    pub encrypt_config: EncryptConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Product {
    #[serde(default)]
    pub code: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NetworkConfig {
    #[serde(rename = "type", default)]
    pub network_type: i64,
    #[serde(rename = "mqttConfig", default, skip_serializing_if = "Option::is_none")]
    pub mqtt_config: Option<MqttConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MqttConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "clientId", default)]
    pub client_id: String,
    #[serde(rename = "topicUp", default)]
    pub topic_up: String,
    #[serde(rename = "topicDown", default)]
    pub topic_down: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReportConfig {
    /// Minutes.
    #[serde(rename = "reportInterval")]
    pub report_interval: u32,
    /// Minutes.
    #[serde(rename = "collectInterval")]
    pub collect_interval: u32,
    /// Milliseconds.
    #[serde(rename = "bleAdvInterval")]
    pub ble_adv_interval: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_interval: 1,
            collect_interval: 1,
            ble_adv_interval: 4000,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EncryptConfig {
    #[serde(rename = "type", default)]
    pub encrypt_type: i64,
    #[serde(rename = "secretKey", default)]
    pub secret_key: String,
}

impl MqttConfig {
    pub fn self_hosted(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            endpoint: String::new(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            client_id: CLIENT_ID_TEMPLATE.to_string(),
            topic_up: TOPIC_UP_TEMPLATE.to_string(),
            topic_down: TOPIC_DOWN_TEMPLATE.to_string(),
        }
    }

    pub fn same_broker(&self, host: &str, port: u16) -> bool {
        self.host.eq_ignore_ascii_case(host) && self.port == port
    }

    /// Compares everything a device needs to reach this bridge, ignoring `endpoint`.
    pub fn same_connection(&self, other: &MqttConfig) -> bool {
        self.same_broker(&other.host, other.port)
            && self.username == other.username
            && self.password == other.password
            && self.client_id == other.client_id
            && self.topic_up == other.topic_up
            && self.topic_down == other.topic_down
    }
}

impl PrivateConfig {
    pub fn self_hosted_mqtt(name: &str, product_code: &str, mqtt: MqttConfig) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            product: Product {
                code: product_code.to_string(),
            },
            network_config: NetworkConfig {
                network_type: NETWORK_TYPE_SELF_HOSTED_MQTT,
                mqtt_config: Some(mqtt),
            },
            report_config: ReportConfig::default(),
            encrypt_config: EncryptConfig::default(),
        }
    }

    pub fn mqtt(&self) -> Option<&MqttConfig> {
        self.network_config.mqtt_config.as_ref()
    }
}
