use crate::mqtt_client::{MqttPublisher, PublishError};
use crate::processors::AckTicket;
use crate::protocol::downlink::{AckMessage, DownlinkMessage};
use tracing::debug;

/// Sends the type 18 ack a device waits for after a message with `need_ack`.
#[derive(Clone)]
pub struct AckResponder<P: MqttPublisher> {
    publisher: P,
}

impl<P: MqttPublisher> AckResponder<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }

    /// Publishes exactly one ack. Failures go back to the caller; the device re-sends
    /// the message if the ack never arrives.
    pub async fn acknowledge(&self, mac: &str, ticket: AckTicket) -> Result<(), PublishError> {
        let ack = DownlinkMessage::Ack(AckMessage::new(ticket.ack_id, ticket.issued_at));
        self.publisher.publish_down(mac, &ack).await?;
        debug!(mac = %mac, ack_id = ticket.ack_id, "sent ack");
        Ok(())
    }
}
