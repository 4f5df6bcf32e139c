use crate::clock::Clock;
use crate::notifier::Notifier;
use crate::qingping_api::cloud_client::CloudResync;
use crate::qingping_api::error::CloudApiError;
use crate::state::HealthState;
use crate::state::registry::DeviceRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warning_secs: i64,
    pub critical_secs: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_secs: 600,
            critical_secs: 1800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub check_interval: Duration,
    pub thresholds: Thresholds,
    /// Overrides keyed by normalized MAC.
    pub device_thresholds: HashMap<String, Thresholds>,
    pub resync_timeout: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            thresholds: Thresholds::default(),
            device_thresholds: HashMap::new(),
            resync_timeout: Duration::from_secs(30),
        }
    }
}

impl WatchdogSettings {
    pub fn thresholds_for(&self, mac: &str) -> Thresholds {
        self.device_thresholds
            .get(mac)
            .copied()
            .unwrap_or(self.thresholds)
    }
}

/// Next health state for a device whose last data is `elapsed_secs` old.
///
/// Critical never drops back to Warning; only fresh data clears it.
pub fn evaluate(previous: HealthState, elapsed_secs: i64, thresholds: Thresholds) -> HealthState {
    if elapsed_secs >= thresholds.critical_secs {
        HealthState::Critical
    } else if elapsed_secs >= thresholds.warning_secs {
        match previous {
            HealthState::Critical => HealthState::Critical,
            _ => HealthState::Warning,
        }
    } else if previous.is_degraded() {
        HealthState::Recovered
    } else {
        HealthState::Healthy
    }
}

pub struct Watchdog<N: Notifier, C: CloudResync> {
    pub registry: DeviceRegistry,
    pub notifier: N,
    pub cloud: Option<C>,
    pub clock: Arc<dyn Clock>,
    pub settings: WatchdogSettings,
    /// Asks the keep-alive task for an immediate push.
    pub keepalive_nudge: Option<mpsc::Sender<String>>,
}

impl<N: Notifier, C: CloudResync> Watchdog<N, C> {
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            check_interval = ?self.settings.check_interval,
            warning_secs = self.settings.thresholds.warning_secs,
            critical_secs = self.settings.thresholds.critical_secs,
            "watchdog started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("watchdog stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Evaluates every tracked device once. Returns the transitions this call performed.
    pub async fn tick(&self) -> Vec<(String, HealthState)> {
        let now = self.clock.now();
        let mut transitions = Vec::new();

        for mac in self.registry.tracked_macs() {
            let Some(state) = self.registry.get(&mac) else {
                continue;
            };
            let Some(last_data_at) = state.last_data_at else {
                debug!(mac = %mac, "no sensor data yet, skipping");
                continue;
            };

            let elapsed = (now - last_data_at).num_seconds();
            let next = evaluate(state.health, elapsed, self.settings.thresholds_for(&mac));
            if next == state.health {
                continue;
            }
            if !self.registry.transition_health(&mac, state.health, next) {
                debug!(mac = %mac, "health changed concurrently, skipping");
                continue;
            }

            self.on_transition(&mac, state.health, next, elapsed).await;
            transitions.push((mac, next));
        }
        transitions
    }

    async fn on_transition(&self, mac: &str, previous: HealthState, next: HealthState, elapsed: i64) {
        match next {
            HealthState::Warning => {
                warn!(mac = %mac, minutes = elapsed / 60, "device has not sent data");
                if let Err(e) = self.notifier.warning(mac, elapsed).await {
                    error!(mac = %mac, error = %e, "failed to publish warning notice");
                }
                self.nudge_keepalive(mac);
            }
            HealthState::Critical => {
                error!(mac = %mac, minutes = elapsed / 60, "device is offline");
                if let Err(e) = self.notifier.critical(mac, elapsed).await {
                    error!(mac = %mac, error = %e, "failed to publish critical notice");
                }
                self.resync(mac).await;
            }
            HealthState::Recovered => {
                info!(mac = %mac, was = ?previous, "device recovered");
                if let Err(e) = self.notifier.recovered(mac).await {
                    error!(mac = %mac, error = %e, "failed to publish recovery notice");
                }
            }
            HealthState::Healthy => {
                debug!(mac = %mac, "device healthy");
                if let Err(e) = self.notifier.healthy(mac).await {
                    error!(mac = %mac, error = %e, "failed to publish healthy notice");
                }
            }
        }
    }

    fn nudge_keepalive(&self, mac: &str) {
        if let Some(nudge) = &self.keepalive_nudge
            && let Err(e) = nudge.try_send(mac.to_string())
        {
            warn!(mac = %mac, error = %e, "unable to request immediate keep-alive");
        }
    }

    /// One best-effort attempt. Failure is reported, never retried.
    async fn resync(&self, mac: &str) {
        let Some(cloud) = &self.cloud else {
            debug!(mac = %mac, "cloud client not configured, skipping re-sync");
            return;
        };

        let timeout = self.settings.resync_timeout;
        let result = match tokio::time::timeout(timeout, cloud.trigger_device_sync(mac)).await {
            Ok(result) => result,
            Err(_) => Err(CloudApiError::Timeout(timeout)),
        };

        if let Err(e) = result {
            error!(mac = %mac, error = %e, "cloud re-sync failed");
            if let Err(e) = self.notifier.resync_failed(mac, &e.to_string()).await {
                error!(mac = %mac, error = %e, "failed to publish re-sync failure notice");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::mqtt_client::testing::RecordingPublisher;
    use crate::notifier::MqttNotifier;
    use crate::notifier::testing::{Notice, RecordingNotifier};
    use crate::qingping_api::cloud_client::testing::RecordingResync;
    use crate::state::StateUpdate;

    const MAC: &str = "AABBCCDDEEFF";

    struct Harness {
        clock: ManualClock,
        registry: DeviceRegistry,
        notifier: RecordingNotifier,
        resync: RecordingResync,
        nudges: mpsc::Receiver<String>,
        watchdog: Watchdog<RecordingNotifier, RecordingResync>,
    }

    fn harness(resync: RecordingResync) -> Harness {
        let clock = ManualClock::starting_at(1_700_000_000);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let registry = DeviceRegistry::new(shared_clock.clone());
        let notifier = RecordingNotifier::default();
        let (tx, nudges) = mpsc::channel(8);
        let watchdog = Watchdog {
            registry: registry.clone(),
            notifier: notifier.clone(),
            cloud: Some(resync.clone()),
            clock: shared_clock,
            settings: WatchdogSettings::default(),
            keepalive_nudge: Some(tx),
        };
        Harness {
            clock,
            registry,
            notifier,
            resync,
            nudges,
            watchdog,
        }
    }

    fn record_data(h: &Harness) {
        h.registry
            .upsert(
                MAC,
                StateUpdate {
                    seen_at: Some(h.clock.now()),
                    data_at: Some(h.clock.now()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_evaluate() {
        let t = Thresholds::default();
        assert_eq!(evaluate(HealthState::Healthy, 100, t), HealthState::Healthy);
        assert_eq!(evaluate(HealthState::Healthy, 599, t), HealthState::Healthy);
        assert_eq!(evaluate(HealthState::Healthy, 600, t), HealthState::Warning);
        assert_eq!(evaluate(HealthState::Warning, 1799, t), HealthState::Warning);
        assert_eq!(evaluate(HealthState::Warning, 1800, t), HealthState::Critical);
        assert_eq!(evaluate(HealthState::Critical, 900, t), HealthState::Critical);
        assert_eq!(evaluate(HealthState::Critical, 10, t), HealthState::Recovered);
        assert_eq!(evaluate(HealthState::Recovered, 10, t), HealthState::Healthy);
        assert_eq!(evaluate(HealthState::Recovered, 700, t), HealthState::Warning);
    }

    #[tokio::test]
    async fn test_warning_notified_once_with_keepalive_nudge() {
        let mut h = harness(RecordingResync::default());
        record_data(&h);

        h.clock.advance_secs(700);
        assert_eq!(h.watchdog.tick().await, vec![(MAC.to_string(), HealthState::Warning)]);
        h.clock.advance_secs(300);
        assert!(h.watchdog.tick().await.is_empty());

        assert_eq!(h.notifier.notices(), vec![Notice::Warning(MAC.to_string(), 700)]);
        assert_eq!(h.nudges.try_recv().unwrap(), MAC);
        assert!(h.nudges.try_recv().is_err());
        assert!(h.resync.calls().is_empty());
    }

    #[tokio::test]
    async fn test_critical_resyncs_exactly_once_even_when_it_fails() {
        let h = harness(RecordingResync::failing());
        record_data(&h);

        h.clock.advance_secs(1900);
        h.watchdog.tick().await;
        h.clock.advance_secs(300);
        h.watchdog.tick().await;
        h.clock.advance_secs(300);
        h.watchdog.tick().await;

        assert_eq!(h.resync.calls(), vec![MAC.to_string()]);
        assert_eq!(
            h.notifier.notices(),
            vec![
                Notice::Critical(MAC.to_string(), 1900),
                Notice::ResyncFailed(MAC.to_string()),
            ]
        );
        assert_eq!(h.registry.get(MAC).unwrap().health, HealthState::Critical);
    }

    #[tokio::test]
    async fn test_recovery_notified_once_then_settles() {
        let h = harness(RecordingResync::default());
        record_data(&h);
        h.clock.advance_secs(700);
        h.watchdog.tick().await;
        h.clock.advance_secs(1200);
        h.watchdog.tick().await;

        record_data(&h);
        assert_eq!(h.watchdog.tick().await, vec![(MAC.to_string(), HealthState::Recovered)]);
        assert_eq!(h.watchdog.tick().await, vec![(MAC.to_string(), HealthState::Healthy)]);
        assert!(h.watchdog.tick().await.is_empty());

        let recovered = h
            .notifier
            .notices()
            .into_iter()
            .filter(|n| matches!(n, Notice::Recovered(_)))
            .count();
        assert_eq!(recovered, 1);
        assert_eq!(h.notifier.notices().last(), Some(&Notice::Healthy(MAC.to_string())));
        assert_eq!(h.registry.get(MAC).unwrap().health, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_retained_health_document_returns_to_healthy() {
        let clock = ManualClock::starting_at(1_700_000_000);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let registry = DeviceRegistry::new(shared_clock.clone());
        let publisher = RecordingPublisher::new();
        let watchdog: Watchdog<_, RecordingResync> = Watchdog {
            registry: registry.clone(),
            notifier: MqttNotifier::new(publisher.clone(), shared_clock.clone()),
            cloud: None,
            clock: shared_clock,
            settings: WatchdogSettings::default(),
            keepalive_nudge: None,
        };
        let record = |clock: &ManualClock| {
            registry
                .upsert(
                    MAC,
                    StateUpdate {
                        data_at: Some(clock.now()),
                        ..Default::default()
                    },
                )
                .unwrap();
        };

        record(&clock);
        clock.advance_secs(700);
        watchdog.tick().await;
        record(&clock);
        watchdog.tick().await;
        clock.advance_secs(300);
        record(&clock);
        watchdog.tick().await;

        assert_eq!(registry.get(MAC).unwrap().health, HealthState::Healthy);
        let documents = publisher.published_to("qingping/AABBCCDDEEFF/watchdog");
        let states: Vec<_> = documents.iter().map(|d| d.json()["state"].clone()).collect();
        assert_eq!(states, vec!["warning", "recovered", "healthy"]);
        assert!(documents.iter().all(|d| d.retain));
    }

    #[tokio::test]
    async fn test_device_without_data_is_skipped() {
        let h = harness(RecordingResync::default());
        h.registry
            .upsert(
                MAC,
                StateUpdate {
                    seen_at: Some(h.clock.now()),
                    ..Default::default()
                },
            )
            .unwrap();

        h.clock.advance_secs(5000);
        assert!(h.watchdog.tick().await.is_empty());
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_per_device_thresholds() {
        let mut h = harness(RecordingResync::default());
        h.watchdog.settings.device_thresholds.insert(
            MAC.to_string(),
            Thresholds {
                warning_secs: 60,
                critical_secs: 120,
            },
        );
        record_data(&h);

        h.clock.advance_secs(90);
        assert_eq!(h.watchdog.tick().await, vec![(MAC.to_string(), HealthState::Warning)]);
    }

    #[derive(Clone)]
    struct HangingResync;

    impl CloudResync for HangingResync {
        async fn trigger_device_sync(&self, _mac: &str) -> Result<(), CloudApiError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_is_bounded_by_timeout() {
        let clock = ManualClock::starting_at(1_700_000_000);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let registry = DeviceRegistry::new(shared_clock.clone());
        let notifier = RecordingNotifier::default();
        let watchdog = Watchdog {
            registry: registry.clone(),
            notifier: notifier.clone(),
            cloud: Some(HangingResync),
            clock: shared_clock,
            settings: WatchdogSettings::default(),
            keepalive_nudge: None,
        };
        registry
            .upsert(
                MAC,
                StateUpdate {
                    data_at: Some(clock.now()),
                    ..Default::default()
                },
            )
            .unwrap();

        clock.advance_secs(2000);
        watchdog.tick().await;

        assert_eq!(
            notifier.notices(),
            vec![
                Notice::Critical(MAC.to_string(), 2000),
                Notice::ResyncFailed(MAC.to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancellation() {
        let h = harness(RecordingResync::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.watchdog.run(cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }
}
