use serde_json::{Map, Value};

/// Setting keys known from the device firmware. `auto_slideing_time` is spelled as the
/// firmware spells it.
pub const RECOGNIZED_SETTING_KEYS: &[&str] = &[
    "temperature_unit",
    "report_interval",
    "collect_interval",
    "pm_sampling_interval",
    "power_off_time",
    "night_mode_start_time",
    "night_mode_end_time",
    "display_off_time",
    "auto_slideing_time",
    "timezone",
    "screensaver_type",
    "is_12_hour_mode",
    "pm25_standard",
    "co2_asc",
    "co2_offset",
    "co2_zoom",
    "pm25_offset",
    "pm25_zoom",
    "pm10_offset",
    "pm10_zoom",
    "pm25_calib_mode",
    "temperature_offset",
    "temperature_zoom",
    "humidity_offset",
    "humidity_zoom",
    "page_sequence",
    "temp_led_th",
    "humi_led_th",
    "co2_led_th",
    "pm25_led_th",
    "pm10_led_th",
];

pub fn is_recognized(key: &str) -> bool {
    RECOGNIZED_SETTING_KEYS.contains(&key)
}

/// Keys in `settings` this bridge has no name for. Used for logging only.
pub fn unrecognized_keys(settings: &Map<String, Value>) -> Vec<&str> {
    settings
        .keys()
        .map(String::as_str)
        .filter(|key| !is_recognized(key))
        .collect()
}
