use crate::clock::Clock;
use crate::home_assistant::availability::AvailabilityState;
use crate::home_assistant::{availability_topic, watchdog_topic};
use crate::mqtt_client::{MqttPublisher, PublishError};
use crate::protocol::mac::format_mac;
use crate::state::HealthState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Where watchdog transitions are reported.
pub trait Notifier: Clone + Send + Sync + 'static {
    fn warning(
        &self,
        mac: &str,
        seconds_offline: i64,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Also marks the device unavailable.
    fn critical(
        &self,
        mac: &str,
        seconds_offline: i64,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Clears the previous notice and marks the device available again.
    fn recovered(&self, mac: &str) -> impl Future<Output = Result<(), PublishError>> + Send;

    fn resync_failed(
        &self,
        mac: &str,
        reason: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Quiet settle after recovery. Replaces the retained notice without alerting anyone.
    fn healthy(&self, mac: &str) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Retained document on `qingping/{MAC}/watchdog`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WatchdogNotice {
    pub state: HealthState,
    pub title: String,
    pub message: String,
    pub seconds_offline: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MqttNotifier<P: MqttPublisher> {
    publisher: P,
    clock: Arc<dyn Clock>,
}

impl<P: MqttPublisher> MqttNotifier<P> {
    pub fn new(publisher: P, clock: Arc<dyn Clock>) -> Self {
        Self { publisher, clock }
    }

    async fn publish_notice(
        &self,
        mac: &str,
        state: HealthState,
        title: &str,
        message: String,
        seconds_offline: Option<i64>,
    ) -> Result<(), PublishError> {
        let notice = WatchdogNotice {
            state,
            title: title.to_string(),
            message,
            seconds_offline,
            timestamp: self.clock.now(),
        };
        debug!(mac = %mac, state = ?state, "publishing watchdog notice");
        self.publisher
            .publish(watchdog_topic(mac), serde_json::to_string(&notice)?, true)
            .await
    }

    async fn publish_availability(
        &self,
        mac: &str,
        state: AvailabilityState,
    ) -> Result<(), PublishError> {
        self.publisher
            .publish(availability_topic(mac), state.as_str().to_string(), true)
            .await
    }
}

impl<P: MqttPublisher> Notifier for MqttNotifier<P> {
    async fn warning(&self, mac: &str, seconds_offline: i64) -> Result<(), PublishError> {
        let message = format!(
            "Qingping Air Monitor ({}) has not sent data for {} minutes. Attempting to reconnect.",
            format_mac(mac),
            seconds_offline / 60
        );
        self.publish_notice(
            mac,
            HealthState::Warning,
            "Qingping Device Warning",
            message,
            Some(seconds_offline),
        )
        .await
    }

    async fn critical(&self, mac: &str, seconds_offline: i64) -> Result<(), PublishError> {
        let message = format!(
            "CRITICAL: Qingping Air Monitor ({}) has been offline for {} minutes!\n\n\
             Possible solutions:\n\
             1. Power cycle the device (turn off and on)\n\
             2. Check if device is connected to WiFi\n\
             3. Re-bind device at developer.qingping.co\n\
             4. Check MQTT broker connectivity",
            format_mac(mac),
            seconds_offline / 60
        );
        self.publish_notice(
            mac,
            HealthState::Critical,
            "Qingping Device OFFLINE",
            message,
            Some(seconds_offline),
        )
        .await?;
        self.publish_availability(mac, AvailabilityState::Offline).await
    }

    async fn recovered(&self, mac: &str) -> Result<(), PublishError> {
        let message = format!(
            "Qingping Air Monitor ({}) is sending data again.",
            format_mac(mac)
        );
        self.publish_notice(
            mac,
            HealthState::Recovered,
            "Qingping Device Recovered",
            message,
            None,
        )
        .await?;
        self.publish_availability(mac, AvailabilityState::Online).await
    }

    async fn resync_failed(&self, mac: &str, reason: &str) -> Result<(), PublishError> {
        let message = format!(
            "Cloud re-sync for Qingping Air Monitor ({}) failed: {}. Re-bind the device manually.",
            format_mac(mac),
            reason
        );
        self.publish_notice(
            mac,
            HealthState::Critical,
            "Qingping Device Re-sync Failed",
            message,
            None,
        )
        .await
    }

    async fn healthy(&self, mac: &str) -> Result<(), PublishError> {
        let message = format!("Qingping Air Monitor ({}) is reporting normally.", format_mac(mac));
        self.publish_notice(mac, HealthState::Healthy, "Qingping Device Healthy", message, None)
            .await
    }
}
