use crate::protocol::{COMMAND_TOPIC_FILTER, UP_TOPIC_FILTER, down_topic};
use crate::protocol::downlink::DownlinkMessage;
use rumqttc::{AsyncClient, ClientError, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client unavailable: {0}")]
    Client(#[from] ClientError),
    #[error("unable to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound side of the broker connection, as seen by the processors and periodic tasks.
pub trait MqttPublisher: Clone + Send + Sync + 'static {
    fn publish(
        &self,
        topic: String,
        payload: String,
        retain: bool,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Next id for a type 17 push. Shared by every sender so ids never repeat.
    fn next_push_id(&self) -> u64;

    fn publish_down(
        &self,
        mac: &str,
        message: &DownlinkMessage,
    ) -> impl Future<Output = Result<(), PublishError>> + Send {
        async move {
            let payload = message.to_json()?;
            self.publish(down_topic(mac), payload, false).await
        }
    }
}

/// A wrapper around `AsyncClient` that owns the push id sequence.
#[derive(Clone)]
pub struct BridgeMqttClient {
    mqtt_client: AsyncClient,
    push_ids: Arc<AtomicU64>,
}

impl BridgeMqttClient {
    pub fn new(mqtt_client: AsyncClient) -> Self {
        Self {
            mqtt_client,
            push_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Queues both subscriptions without waiting, so it is safe to call from the event loop task.
    /// Needed after every ConnAck since sessions are clean.
    pub fn resubscribe(&self) -> Result<(), ClientError> {
        self.mqtt_client
            .try_subscribe(UP_TOPIC_FILTER, QoS::AtLeastOnce)?;
        self.mqtt_client
            .try_subscribe(COMMAND_TOPIC_FILTER, QoS::AtLeastOnce)?;
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.mqtt_client.try_disconnect()
    }
}

impl MqttPublisher for BridgeMqttClient {
    async fn publish(&self, topic: String, payload: String, retain: bool) -> Result<(), PublishError> {
        // Fails at once when the request queue is full, e.g. while the broker is unreachable.
        self.mqtt_client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        Ok(())
    }

    fn next_push_id(&self) -> u64 {
        self.push_ids.fetch_add(1, Ordering::Relaxed)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_fails_fast_when_request_queue_is_full() {
        let options = MqttOptions::new("bridge-test", "localhost", 1883);
        // Never polled, so nothing drains the queue.
        let (raw_client, _event_loop) = AsyncClient::new(options, 1);
        let client = BridgeMqttClient::new(raw_client);

        client
            .publish("qingping/AABBCCDDEEFF/down".to_string(), "{}".to_string(), false)
            .await
            .unwrap();
        let second = tokio::time::timeout(
            Duration::from_secs(1),
            client.publish("qingping/AABBCCDDEEFF/down".to_string(), "{}".to_string(), false),
        )
        .await
        .expect("publish must not wait for queue space");

        assert!(matches!(
            second,
            Err(PublishError::Client(ClientError::TryRequest(_)))
        ));
    }
}
