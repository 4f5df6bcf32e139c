pub mod availability;
pub mod device;
pub mod sensor;

pub fn state_topic(mac: &str) -> String {
    format!("qingping/{}/state", mac)
}

pub fn availability_topic(mac: &str) -> String {
    format!("qingping/{}/availability", mac)
}

pub fn watchdog_topic(mac: &str) -> String {
    format!("qingping/{}/watchdog", mac)
}
