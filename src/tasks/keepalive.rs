use crate::mqtt_client::{MqttPublisher, PublishError};
use crate::protocol::downlink::{DownlinkMessage, SettingsPush};
use crate::state::registry::DeviceRegistry;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Periodic type 17 pushes that keep devices reporting to this broker.
#[derive(Clone)]
pub struct KeepAlive<P: MqttPublisher> {
    pub registry: DeviceRegistry,
    pub publisher: P,
    pub interval: Duration,
    /// Seconds. Used for the marker push while a device's settings are unknown.
    pub default_report_interval: u64,
}

impl<P: MqttPublisher> KeepAlive<P> {
    pub async fn run(self, mut nudges: mpsc::Receiver<String>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "keep-alive started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("keep-alive stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
                Some(mac) = nudges.recv() => {
                    debug!(mac = %mac, "immediate keep-alive requested");
                    if let Err(e) = self.push(&mac).await {
                        error!(mac = %mac, error = %e, "failed to send keep-alive");
                    }
                }
            }
        }
    }

    /// Pushes to every tracked device regardless of health. Returns how many pushes succeeded.
    pub async fn tick(&self) -> usize {
        let mut sent = 0;
        for mac in self.registry.tracked_macs() {
            match self.push(&mac).await {
                Ok(_) => sent += 1,
                Err(e) => error!(mac = %mac, error = %e, "failed to send keep-alive"),
            }
        }
        sent
    }

    /// Replays the last known settings, or the interval marker when none are known.
    pub async fn push(&self, mac: &str) -> Result<u64, PublishError> {
        let settings = self
            .registry
            .get(mac)
            .map(|state| state.settings_snapshot)
            .unwrap_or_default();

        let id = self.publisher.next_push_id();
        let push = if settings.is_empty() {
            SettingsPush::keepalive_marker(id, self.default_report_interval)
        } else {
            SettingsPush::new(id, settings)
        };
        self.publisher
            .publish_down(mac, &DownlinkMessage::SettingsPush(push))
            .await?;
        debug!(mac = %mac, id, "keep-alive sent");
        Ok(id)
    }
}
