use crate::protocol::message::{DeviceMessage, MessagePayload};
use crate::state::{DeviceDiagnostics, StateUpdate};
use chrono::{DateTime, Utc};

pub mod ack_responder;
pub mod ha_processor;
pub mod inbound_processor;

/// Correlation target for one outbound acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckTicket {
    pub ack_id: u64,
    pub issued_at: DateTime<Utc>,
}

/// What one inbound message does to its device record and to the down channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub update: StateUpdate,
    pub ack: Option<AckTicket>,
}

/// Maps a decoded message to a state update and an optional ack.
///
/// Has no side effects; the caller applies the update and sends the ack.
pub fn dispatch(msg: &DeviceMessage, now: DateTime<Utc>) -> Dispatch {
    let mut update = StateUpdate {
        seen_at: Some(now),
        message_type: Some(msg.message_type),
        ..Default::default()
    };

    match &msg.payload {
        MessagePayload::Sensors(samples) => {
            update.data_at = Some(now);
            update.readings = samples.clone();
        }
        MessagePayload::Status(status) => {
            update.diagnostics = Some(DeviceDiagnostics {
                wifi_ssid: status.wifi_ssid.clone(),
                wifi_rssi: status.wifi_rssi,
                firmware: status.firmware.clone(),
                status_at: Some(now),
            });
        }
        MessagePayload::Settings(settings) => {
            update.settings = settings.clone();
        }
        // Our own ack type mirrored back; nothing to record beyond liveness.
        MessagePayload::Ack { .. } | MessagePayload::Empty => {}
    }

    Dispatch {
        update,
        ack: msg.ack_target().map(|ack_id| AckTicket {
            ack_id,
            issued_at: now,
        }),
    }
}
