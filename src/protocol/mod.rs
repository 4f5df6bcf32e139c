pub mod downlink;
pub mod mac;
pub mod message;
pub mod settings;

pub const UP_TOPIC_FILTER: &str = "qingping/+/up";
pub const COMMAND_TOPIC_FILTER: &str = "qingping/+/settings/set";

pub fn down_topic(mac: &str) -> String {
    format!("qingping/{}/down", mac)
}
