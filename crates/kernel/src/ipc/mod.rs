//! Inter-process communication: synchronous rendezvous endpoints,
//! broadcast notifications and the IRQ-to-notification bridge.

pub mod endpoint;
pub mod irq;
pub mod message;
pub mod notification;

pub use endpoint::Endpoint;
pub use message::Message;
pub use notification::Notification;

use xnix_abi::{Tid, TID_INVALID};

/// Per-thread IPC slots. A thread has at most one IPC operation in flight:
/// `outgoing` holds the request it is sending (Send/Call), `delivered`
/// receives the message handed to it (the request on Receive, the reply on
/// Call), and `peer` names the other side of the rendezvous.
pub struct IpcSlots {
    pub outgoing: Option<Message>,
    pub delivered: Option<Message>,
    /// Receive-buffer capacity declared by a queued receiver.
    pub recv_cap: usize,
    pub peer: Tid,
}

impl IpcSlots {
    pub fn new() -> Self {
        Self { outgoing: None, delivered: None, recv_cap: 0, peer: TID_INVALID }
    }
}

impl Default for IpcSlots {
    fn default() -> Self {
        Self::new()
    }
}
