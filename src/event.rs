// MIT License - Copyright (c) 2026 Peter Wright

use crate::devices::partition::PartitionStatusFlags;
use crate::devices::zone::ZoneStatusFlags;

/// All events pushed to the external platform.
///
/// Users subscribe via `panel.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// Handshake complete, communicator online
    Connected,
    /// Connection torn down (requested or lost)
    Disconnected,
    /// A socket-level timeout fired. Distinct from ordinary I/O failure:
    /// the session may still be alive, and the subscriber decides whether
    /// to trigger a fresh login.
    SocketTimeout,
    /// Communication lost for the given summarized reason
    CommunicationFailure { reason: String },
    /// Zone status changed after a RAM refresh
    ZoneStatusChanged {
        zone_id: u16,
        old_status: ZoneStatusFlags,
        new_status: ZoneStatusFlags,
        changed: ZoneStatusFlags,
    },
    /// Partition status changed after a RAM refresh
    PartitionStatusChanged {
        partition_id: u8,
        old_status: PartitionStatusFlags,
        new_status: PartitionStatusFlags,
        changed: PartitionStatusFlags,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PanelEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
