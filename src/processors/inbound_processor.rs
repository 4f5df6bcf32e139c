use crate::clock::Clock;
use crate::mqtt_client::MqttPublisher;
use crate::processors::ack_responder::AckResponder;
use crate::processors::dispatch;
use crate::processors::ha_processor::HaProcessor;
use crate::protocol::mac::normalize_mac;
use crate::protocol::message::{DecodeError, MessagePayload, MessageType, decode};
use crate::state::registry::DeviceRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one delivery on `qingping/+/up`.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Topic not ours, or the device is not in the configured list.
    Ignored,
    Rejected(DecodeError),
    Processed {
        mac: String,
        message_type: MessageType,
        ack_sent: bool,
    },
}

/// Extracts the MAC from `qingping/{MAC}/up`.
pub fn parse_up_topic(topic: &str) -> Option<String> {
    match topic.split('/').collect::<Vec<_>>().as_slice() {
        ["qingping", mac, "up"] => normalize_mac(mac).ok(),
        _ => None,
    }
}

/// The single inbound hook: decode, merge into the registry, ack, mirror.
#[derive(Clone)]
pub struct InboundProcessor<P: MqttPublisher> {
    pub registry: DeviceRegistry,
    pub ack_responder: AckResponder<P>,
    pub ha_processor: HaProcessor<P>,
    pub clock: Arc<dyn Clock>,
    /// Empty means every MAC seen on the up topic is tracked.
    pub allowed_macs: Arc<HashSet<String>>,
}

impl<P: MqttPublisher> InboundProcessor<P> {
    pub async fn handle_up(&self, topic: &str, payload: &[u8]) -> InboundOutcome {
        let Some(mac) = parse_up_topic(topic) else {
            warn!("Failed to parse topic: {:?}", topic);
            return InboundOutcome::Ignored;
        };
        if !self.allowed_macs.is_empty() && !self.allowed_macs.contains(&mac) {
            debug!(mac = %mac, "ignoring message from unconfigured device");
            return InboundOutcome::Ignored;
        }

        let msg = match decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                let body = String::from_utf8_lossy(&payload[..payload.len().min(500)]);
                warn!(mac = %mac, error = %e, "dropping undecodable message. Body was: \"{}\"", body);
                return InboundOutcome::Rejected(e);
            }
        };

        if let Some(payload_mac) = &msg.mac
            && payload_mac != &mac
        {
            warn!(mac = %mac, payload_mac = %payload_mac, "payload MAC differs from topic, using topic");
        }
        if msg.need_ack && msg.id.is_none() {
            warn!(mac = %mac, message_type = %msg.message_type, "need_ack without id, cannot acknowledge");
        }

        match &msg.payload {
            MessagePayload::Sensors(samples) => {
                debug!(mac = %mac, message_type = %msg.message_type, samples = samples.len(), "sensor data received");
            }
            MessagePayload::Settings(settings) => {
                info!(
                    mac = %mac,
                    report_interval = ?settings.get("report_interval"),
                    screensaver_type = ?settings.get("screensaver_type"),
                    pm25_standard = ?settings.get("pm25_standard"),
                    "device settings received"
                );
            }
            MessagePayload::Ack { ack_id, code } => {
                debug!(mac = %mac, ack_id = ?ack_id, code = ?code, "device acknowledged a push");
            }
            _ => debug!(mac = %mac, message_type = %msg.message_type, "message received"),
        }

        let dispatch = dispatch(&msg, self.clock.now());
        if let Err(e) = self.registry.upsert(&mac, dispatch.update) {
            error!(error = %e, "registry rejected normalized MAC");
            return InboundOutcome::Ignored;
        }

        let mut ack_sent = false;
        if let Some(ticket) = dispatch.ack {
            match self.ack_responder.acknowledge(&mac, ticket).await {
                Ok(()) => ack_sent = true,
                Err(e) => error!(mac = %mac, ack_id = ticket.ack_id, error = %e, "failed to send ack"),
            }
        }

        if let Err(e) = self.ha_processor.publish_device(&mac).await {
            error!(mac = %mac, error = %e, "failed to mirror device state to Home Assistant");
        }

        InboundOutcome::Processed {
            mac,
            message_type: msg.message_type,
            ack_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::mqtt_client::testing::RecordingPublisher;
    use dashmap::DashSet;
    use serde_json::json;
    use std::collections::HashMap;

    fn processor(
        publisher: &RecordingPublisher,
        clock: &ManualClock,
        allowed: &[&str],
    ) -> InboundProcessor<RecordingPublisher> {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let registry = DeviceRegistry::new(clock.clone());
        InboundProcessor {
            registry: registry.clone(),
            ack_responder: AckResponder::new(publisher.clone()),
            ha_processor: HaProcessor {
                publisher: publisher.clone(),
                registry,
                published_discovery: Arc::new(DashSet::new()),
                device_names: Arc::new(HashMap::new()),
            },
            clock,
            allowed_macs: Arc::new(allowed.iter().map(|m| m.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn test_realtime_data_end_to_end() {
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(1_700_000_000);
        let processor = processor(&publisher, &clock, &[]);

        let outcome = processor
            .handle_up(
                "qingping/AABBCCDDEEFF/up",
                br#"{"type":"12","id":5,"need_ack":1,"mac":"AABBCCDDEEFF","sensorData":[{"temperature":{"value":21.0}}]}"#,
            )
            .await;

        assert!(matches!(outcome, InboundOutcome::Processed { ack_sent: true, .. }));
        let state = processor.registry.get("AABBCCDDEEFF").unwrap();
        assert_eq!(state.latest_readings.get("temperature"), Some(&21.0));
        assert_eq!(state.last_data_at, Some(clock.now()));

        let acks = publisher.published_to("qingping/AABBCCDDEEFF/down");
        assert_eq!(acks.len(), 1);
        let ack = acks[0].json();
        assert_eq!(ack["type"], json!("18"));
        assert_eq!(ack["ack_id"], json!(5));
        assert_eq!(ack["code"], json!(0));
        assert_eq!(ack["timestamp"], json!(1_700_000_000));
    }

    #[tokio::test]
    async fn test_one_ack_per_message_in_order() {
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(1_700_000_000);
        let processor = processor(&publisher, &clock, &[]);

        for id in [11, 12, 13] {
            let body = json!({"type":"12","id":id,"need_ack":1,"sensorData":[{"co2":{"value":600}}]});
            processor
                .handle_up("qingping/AABBCCDDEEFF/up", body.to_string().as_bytes())
                .await;
        }

        let ack_ids: Vec<_> = publisher
            .published_to("qingping/AABBCCDDEEFF/down")
            .iter()
            .map(|p| p.json()["ack_id"].clone())
            .collect();
        assert_eq!(ack_ids, vec![json!(11), json!(12), json!(13)]);
    }

    #[tokio::test]
    async fn test_need_ack_without_id_still_updates_readings() {
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(1_700_000_000);
        let processor = processor(&publisher, &clock, &[]);

        let outcome = processor
            .handle_up(
                "qingping/AABBCCDDEEFF/up",
                br#"{"type":"12","need_ack":1,"sensorData":[{"humidity":{"value":45.5}}]}"#,
            )
            .await;

        assert!(matches!(outcome, InboundOutcome::Processed { ack_sent: false, .. }));
        assert!(publisher.published_to("qingping/AABBCCDDEEFF/down").is_empty());
        let state = processor.registry.get("AABBCCDDEEFF").unwrap();
        assert_eq!(state.latest_readings.get("humidity"), Some(&45.5));
    }

    #[tokio::test]
    async fn test_device_ack_marks_seen_without_reply() {
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(1_700_000_000);
        let processor = processor(&publisher, &clock, &[]);

        let outcome = processor
            .handle_up("qingping/AABBCCDDEEFF/up", br#"{"type":"18","ack_id":3,"code":0}"#)
            .await;

        assert!(matches!(
            outcome,
            InboundOutcome::Processed {
                message_type: MessageType::Ack,
                ack_sent: false,
                ..
            }
        ));
        assert!(publisher.published_to("qingping/AABBCCDDEEFF/down").is_empty());
        let state = processor.registry.get("AABBCCDDEEFF").unwrap();
        assert!(state.last_seen_at.is_some());
        assert_eq!(state.last_data_at, None);
    }

    #[tokio::test]
    async fn test_undecodable_message_leaves_no_state() {
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(1_700_000_000);
        let processor = processor(&publisher, &clock, &[]);

        let outcome = processor
            .handle_up("qingping/AABBCCDDEEFF/up", br#"{"type":"99","id":1,"need_ack":1}"#)
            .await;

        assert!(matches!(outcome, InboundOutcome::Rejected(DecodeError::UnknownType(_))));
        assert!(processor.registry.tracked_macs().is_empty());
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_settings_echo_merges_into_snapshot() {
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(1_700_000_000);
        let processor = processor(&publisher, &clock, &[]);

        processor
            .handle_up(
                "qingping/AABBCCDDEEFF/up",
                br#"{"type":"28","setting":{"report_interval":150,"display_off_time":600}}"#,
            )
            .await;
        processor
            .handle_up(
                "qingping/AABBCCDDEEFF/up",
                br#"{"type":"28","setting":{"report_interval":60}}"#,
            )
            .await;

        let state = processor.registry.get("AABBCCDDEEFF").unwrap();
        assert_eq!(
            serde_json::Value::Object(state.settings_snapshot),
            json!({"report_interval": 60, "display_off_time": 600})
        );
        assert_eq!(state.last_data_at, None);
    }

    #[tokio::test]
    async fn test_unconfigured_device_is_ignored() {
        let publisher = RecordingPublisher::new();
        let clock = ManualClock::starting_at(1_700_000_000);
        let processor = processor(&publisher, &clock, &["112233445566"]);

        let outcome = processor
            .handle_up("qingping/AABBCCDDEEFF/up", br#"{"type":"10"}"#)
            .await;

        assert!(matches!(outcome, InboundOutcome::Ignored));
        assert!(processor.registry.tracked_macs().is_empty());
    }

    #[test]
    fn test_parse_up_topic() {
        assert_eq!(
            parse_up_topic("qingping/cc:b5:d1:31:53:4a/up").as_deref(),
            Some("CCB5D131534A")
        );
        assert_eq!(parse_up_topic("qingping/CCB5D131534A/down"), None);
        assert_eq!(parse_up_topic("other/CCB5D131534A/up"), None);
    }
}
