use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::mqtt_client::{BridgeMqttClient, MqttPublisher};
use crate::notifier::MqttNotifier;
use crate::processors::ack_responder::AckResponder;
use crate::processors::ha_processor::{HaProcessor, command_topic_parser};
use crate::processors::inbound_processor::{InboundOutcome, InboundProcessor};
use crate::qingping_api::cloud_client::CloudClient;
use crate::state::registry::DeviceRegistry;
use crate::tasks::keepalive::KeepAlive;
use crate::tasks::watchdog::Watchdog;
use anyhow::Context;
use dashmap::DashSet;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const KEEPALIVE_NUDGE_CAPACITY: usize = 32;

/// One delivery taken off the event loop.
struct Incoming {
    topic: String,
    payload: Vec<u8>,
}

/// Runs the bridge until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = DeviceRegistry::new(clock.clone());

    let mut options = MqttOptions::new(&config.mqtt.client_id, &config.mqtt.host, config.mqtt.port);
    options.set_credentials(&config.mqtt.username, &config.mqtt.password);
    options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_seconds));
    options.set_clean_session(true);
    let (raw_client, event_loop) = AsyncClient::new(options, config.mqtt.queue_size);
    let client = BridgeMqttClient::new(raw_client);

    let published_discovery = Arc::new(DashSet::new());
    let ha_processor = HaProcessor {
        publisher: client.clone(),
        registry: registry.clone(),
        published_discovery: published_discovery.clone(),
        device_names: Arc::new(config.device_names()?),
    };
    let inbound = InboundProcessor {
        registry: registry.clone(),
        ack_responder: AckResponder::new(client.clone()),
        ha_processor: ha_processor.clone(),
        clock: clock.clone(),
        allowed_macs: Arc::new(config.allowed_macs()?),
    };

    let cloud = match &config.cloud {
        Some(cloud) => Some(
            CloudClient::new(
                &cloud.app_key,
                &cloud.app_secret,
                Duration::from_secs(cloud.token_ttl_seconds),
                Duration::from_secs(cloud.request_timeout_seconds),
            )
            .context("Unable to build cloud API client")?,
        ),
        None => {
            info!("no cloud credentials configured, critical devices will not be re-synced");
            None
        }
    };

    let (nudge_tx, nudge_rx) = mpsc::channel(KEEPALIVE_NUDGE_CAPACITY);
    let watchdog = Watchdog {
        registry: registry.clone(),
        notifier: MqttNotifier::new(client.clone(), clock.clone()),
        cloud,
        clock: clock.clone(),
        settings: config.watchdog_settings()?,
        keepalive_nudge: Some(nudge_tx),
    };
    let keepalive = KeepAlive {
        registry: registry.clone(),
        publisher: client.clone(),
        interval: Duration::from_secs(config.watchdog.keepalive_interval_seconds),
        default_report_interval: config.watchdog.default_report_interval_seconds,
    };

    let cancel = CancellationToken::new();
    let (incoming_tx, incoming_rx) = mpsc::channel(config.mqtt.queue_size);
    let reconnect_delay = Duration::from_secs(config.mqtt.reconnect_delay_seconds);

    let handles: Vec<JoinHandle<()>> = vec![
        tokio::spawn(poll_event_loop(
            event_loop,
            client.clone(),
            incoming_tx,
            published_discovery,
            reconnect_delay,
            cancel.clone(),
        )),
        tokio::spawn(process_incoming(inbound, incoming_rx, cancel.clone())),
        tokio::spawn(watchdog.run(cancel.clone())),
        tokio::spawn(keepalive.run(nudge_rx, cancel.clone())),
    ];
    info!(host = %config.mqtt.host, port = config.mqtt.port, "bridge started");

    tokio::signal::ctrl_c()
        .await
        .context("Unable to listen for shutdown signal")?;
    info!("shutting down");
    cancel.cancel();

    for handle in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("task failed during shutdown: {:?}", e),
            Err(_) => warn!("task did not stop within {:?}", SHUTDOWN_GRACE),
        }
    }
    if let Err(e) = client.disconnect() {
        warn!("MQTT disconnect failed: {:?}", e);
    }
    Ok(())
}

/// Drives the connection and hands publishes to the processing task.
///
/// Never waits on processing, so pings and acks keep flowing while a message is handled.
async fn poll_event_loop(
    mut event_loop: EventLoop,
    client: BridgeMqttClient,
    incoming: mpsc::Sender<Incoming>,
    published_discovery: Arc<DashSet<String>>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                if let Err(e) = client.resubscribe() {
                    error!("Failed to subscribe: {:?}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let message = Incoming {
                    topic: p.topic,
                    payload: p.payload.to_vec(),
                };
                if let Err(e) = incoming.try_send(message) {
                    warn!("processing queue full, dropping message: {}", e);
                }
            }
            Ok(e) => trace!("{:?}", e),
            Err(e) => {
                error!(
                    "MQTT event loop failed: {:?}. Forcing rediscovery and resubscriptions",
                    e
                );
                published_discovery.clear();
                // Stale acks and keep-alives are not replayed after reconnect.
                let dropped = event_loop.pending.len();
                event_loop.pending.clear();
                if dropped > 0 {
                    warn!(dropped, "discarded requests queued while disconnected");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
    debug!("event loop stopped");
}

/// The inbound hook. Messages are handled one at a time, so acks leave in arrival order.
async fn process_incoming<P: MqttPublisher>(
    inbound: InboundProcessor<P>,
    mut incoming: mpsc::Receiver<Incoming>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = incoming.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if message.topic.ends_with("/up") {
            match inbound.handle_up(&message.topic, &message.payload).await {
                InboundOutcome::Processed {
                    mac,
                    message_type,
                    ack_sent,
                } => trace!(mac = %mac, message_type = %message_type, ack_sent, "up message handled"),
                InboundOutcome::Rejected(e) => trace!(error = %e, "up message rejected"),
                InboundOutcome::Ignored => {}
            }
            continue;
        }

        let payload = String::from_utf8_lossy(&message.payload);
        match command_topic_parser(&message.topic, &payload) {
            Some(cmd) => {
                if let Err(e) = inbound.ha_processor.process_settings_command(cmd).await {
                    error!("Command processing failed: {}", e);
                }
            }
            None => warn!("Failed to parse topic: {:?}", message.topic),
        }
    }
    debug!("inbound processing stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::mqtt_client::testing::RecordingPublisher;
    use serde_json::json;
    use std::collections::HashMap;

    fn inbound(publisher: &RecordingPublisher) -> InboundProcessor<RecordingPublisher> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at(1_700_000_000));
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
            allowed_macs: Arc::new(Default::default()),
        }
    }

    #[tokio::test]
    async fn test_routes_up_and_command_topics() {
        let publisher = RecordingPublisher::new();
        let inbound = inbound(&publisher);
        let registry = inbound.registry.clone();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tx.send(Incoming {
            topic: "qingping/AABBCCDDEEFF/up".to_string(),
            payload: br#"{"type":"12","id":9,"need_ack":1,"sensorData":[{"co2":{"value":800}}]}"#.to_vec(),
        })
        .await
        .unwrap();
        tx.send(Incoming {
            topic: "qingping/AABBCCDDEEFF/settings/set".to_string(),
            payload: br#"{"display_off_time":30}"#.to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        process_incoming(inbound, rx, cancel).await;

        assert_eq!(
            registry.get("AABBCCDDEEFF").unwrap().latest_readings.get("co2"),
            Some(&800.0)
        );
        let down = publisher.published_to("qingping/AABBCCDDEEFF/down");
        assert_eq!(down.len(), 2);
        assert_eq!(down[0].json()["type"], json!("18"));
        assert_eq!(down[0].json()["ack_id"], json!(9));
        assert_eq!(down[1].json()["setting"], json!({"display_off_time": 30}));
    }
}
