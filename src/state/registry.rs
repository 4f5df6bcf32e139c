use crate::clock::Clock;
use crate::protocol::mac::{InvalidMac, normalize_mac};
use crate::state::{DeviceSnapshot, DeviceState, HealthState, StateUpdate};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Per-device records keyed by normalized MAC.
///
/// Writes lock a single entry; there is no lock spanning devices. Readers get clones,
/// never references into the map.
#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<DashMap<String, DeviceState>>,
    clock: Arc<dyn Clock>,
}

impl DeviceRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            devices: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn get(&self, mac: &str) -> Option<DeviceState> {
        let mac = normalize_mac(mac).ok()?;
        self.devices.get(&mac).map(|entry| entry.value().clone())
    }

    /// Merges `update` into the record for `mac`, creating the record on first write.
    pub fn upsert(&self, mac: &str, update: StateUpdate) -> Result<(), InvalidMac> {
        let mac = normalize_mac(mac)?;
        let mut entry = self.devices.entry(mac.clone()).or_insert_with(|| {
            info!(mac = %mac, "tracking new device");
            DeviceState::new(&mac)
        });
        entry.apply(update);
        Ok(())
    }

    pub fn snapshot(&self, mac: &str) -> Option<DeviceSnapshot> {
        let mac = normalize_mac(mac).ok()?;
        let captured_at = self.clock.now();
        self.devices
            .get(&mac)
            .map(|entry| DeviceSnapshot::capture(entry.value(), captured_at))
    }

    /// Moves `mac` from `from` to `to` only if its health is still `from`.
    /// Returns whether this call performed the transition.
    pub fn transition_health(&self, mac: &str, from: HealthState, to: HealthState) -> bool {
        let Ok(mac) = normalize_mac(mac) else {
            return false;
        };
        match self.devices.get_mut(&mac) {
            Some(mut entry) if entry.health == from => {
                entry.health = to;
                true
            }
            _ => false,
        }
    }

    pub fn tracked_macs(&self) -> Vec<String> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(ManualClock::starting_at(1_700_000_000)))
    }

    #[test]
    fn test_mac_forms_resolve_to_same_record() {
        let registry = registry();
        registry
            .upsert(
                "cc:b5:d1:31:53:4a",
                StateUpdate {
                    readings: vec![BTreeMap::from([("co2".to_string(), 700.0)])],
                    ..Default::default()
                },
            )
            .unwrap();
        registry
            .upsert(
                "CCB5D131534A",
                StateUpdate {
                    readings: vec![BTreeMap::from([("pm10".to_string(), 4.0)])],
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(registry.tracked_macs(), vec!["CCB5D131534A".to_string()]);
        let state = registry.get("CC-B5-D1-31-53-4A").unwrap();
        assert_eq!(state.latest_readings.len(), 2);
    }

    #[test]
    fn test_invalid_mac_is_rejected_without_creating_a_record() {
        let registry = registry();
        assert!(registry.upsert("not-a-mac", StateUpdate::default()).is_err());
        assert!(registry.tracked_macs().is_empty());
    }

    #[test]
    fn test_snapshot_is_a_detached_copy() {
        let registry = registry();
        registry
            .upsert(
                "AABBCCDDEEFF",
                StateUpdate {
                    settings: json!({"report_interval": 60}).as_object().unwrap().clone(),
                    ..Default::default()
                },
            )
            .unwrap();
        let snapshot = registry.snapshot("AABBCCDDEEFF").unwrap();
        registry
            .upsert(
                "AABBCCDDEEFF",
                StateUpdate {
                    settings: json!({"report_interval": 120}).as_object().unwrap().clone(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(snapshot.settings.get("report_interval"), Some(&json!(60)));
        assert_eq!(snapshot.captured_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_transition_health_is_compare_and_set() {
        let registry = registry();
        registry.upsert("AABBCCDDEEFF", StateUpdate::default()).unwrap();
        assert!(registry.transition_health("AABBCCDDEEFF", HealthState::Healthy, HealthState::Warning));
        assert!(!registry.transition_health("AABBCCDDEEFF", HealthState::Healthy, HealthState::Warning));
        assert_eq!(registry.get("AABBCCDDEEFF").unwrap().health, HealthState::Warning);
    }
}
