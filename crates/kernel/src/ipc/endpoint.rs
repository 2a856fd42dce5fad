//! Rendezvous endpoints.
//!
//! An endpoint holds a send queue and a receive queue; at most one of the
//! two is ever non-empty, because an arriving party first tries to pair
//! with the opposite queue. Senders and callers stay blocked until the
//! receiver replies; a receiver that picks up a queued sender does **not**
//! wake it — the sender keeps waiting for the reply.
//!
//! Lock order: endpoint queue lock first, scheduler lock inside it (wakeups
//! happen after the queue lock is dropped wherever possible).

use super::message::{self, Message};
use super::IpcSlots;
use crate::sched::{self, Thread, ThreadState};
use crate::sync::IrqMutex;
use crate::{KernelError, Result};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use xnix_abi::{Tid, TID_INVALID};

pub struct Endpoint {
    name: heapless::String<32>,
    queues: IrqMutex<Queues>,
}

struct Queues {
    send: VecDeque<Arc<Thread>>,
    recv: VecDeque<Arc<Thread>>,
}

/// What `begin_send` did before the caller blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStart {
    /// Handed straight to a waiting receiver (now woken).
    Delivered,
    /// No receiver; the sender is parked on the send queue.
    Queued,
}

impl Endpoint {
    pub fn new(name: &str) -> Arc<Self> {
        let mut n = heapless::String::new();
        let _ = n.push_str(&name[..name.len().min(31)]);
        Arc::new(Self {
            name: n,
            queues: IrqMutex::new(Queues { send: VecDeque::new(), recv: VecDeque::new() }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn pop_live(q: &mut VecDeque<Arc<Thread>>) -> Option<Arc<Thread>> {
        // Threads force-exited while queued are skipped here; their Arcs
        // drop with the pop.
        while let Some(t) = q.pop_front() {
            if t.state() != ThreadState::Exited {
                return Some(t);
            }
        }
        None
    }

    /// Non-blocking head of Send/Call: stash the outgoing message, pair
    /// with a queued receiver if there is one (waking it), otherwise park
    /// on the send queue. The caller then blocks on its own channel.
    pub fn begin_send(&self, sender: &Arc<Thread>, msg: Message) -> Result<SendStart> {
        msg.validate()?;

        {
            let mut slots = sender.ipc.lock();
            slots.outgoing = Some(msg);
            slots.delivered = None;
            slots.peer = TID_INVALID;
        }

        let receiver = {
            let mut q = self.queues.lock();
            match Self::pop_live(&mut q.recv) {
                Some(r) => Some(r),
                None => {
                    q.send.push_back(sender.clone());
                    None
                }
            }
        };

        let Some(receiver) = receiver else {
            return Ok(SendStart::Queued);
        };

        // Copy once: sender's request into the receiver's delivery slot.
        let delivered = {
            let slots = sender.ipc.lock();
            let msg = slots.outgoing.as_ref().expect("outgoing stashed above");
            message::deliver(msg, sender, &receiver)
        };
        let delivered = match delivered {
            Ok(d) => d,
            Err(e) => {
                // The receiver loses nothing; put it back at the head.
                self.queues.lock().recv.push_front(receiver);
                sender.ipc.lock().outgoing = None;
                return Err(e);
            }
        };
        {
            let mut rs = receiver.ipc.lock();
            let cap = rs.recv_cap;
            let mut delivered = delivered;
            delivered.truncate_buffer(cap);
            rs.delivered = Some(delivered);
            rs.peer = sender.tid();
        }
        sched::wakeup_thread(&receiver);
        Ok(SendStart::Delivered)
    }

    /// Non-blocking head of Receive: pair with a queued sender (copying its
    /// request but leaving it blocked awaiting the reply), or park on the
    /// receive queue with `max_buf` as the delivery capacity.
    pub fn begin_receive(
        &self,
        receiver: &Arc<Thread>,
        max_buf: usize,
    ) -> Result<Option<Message>> {
        let sender = {
            let mut q = self.queues.lock();
            match Self::pop_live(&mut q.send) {
                Some(s) => Some(s),
                None => {
                    {
                        let mut rs = receiver.ipc.lock();
                        rs.recv_cap = max_buf;
                        rs.delivered = None;
                        rs.peer = TID_INVALID;
                    }
                    q.recv.push_back(receiver.clone());
                    None
                }
            }
        };

        let Some(sender) = sender else {
            return Ok(None);
        };

        // Do not wake the sender: it was only removed from the send queue
        // and still waits, blocked, for the reply.
        let mut delivered = {
            let slots = sender.ipc.lock();
            let msg = slots.outgoing.as_ref().ok_or(KernelError::InvalidArgument)?;
            message::deliver(msg, &sender, receiver)?
        };
        delivered.truncate_buffer(max_buf);
        receiver.ipc.lock().peer = sender.tid();
        Ok(Some(delivered))
    }

    /// Blocking Send: rendezvous, then wait until the receiver replies.
    /// The reply content is discarded. `timeout_ms == 0` waits forever.
    pub fn send(self: &Arc<Self>, current: &Arc<Thread>, msg: Message, timeout_ms: u32) -> Result<()> {
        self.send_inner(current, msg, timeout_ms).map(|_| ())
    }

    /// Blocking Call: rendezvous, wait for the reply, return it.
    pub fn call(
        self: &Arc<Self>,
        current: &Arc<Thread>,
        msg: Message,
        timeout_ms: u32,
    ) -> Result<Message> {
        self.send_inner(current, msg, timeout_ms)?
            .ok_or(KernelError::InvalidArgument)
    }

    fn send_inner(
        self: &Arc<Self>,
        current: &Arc<Thread>,
        msg: Message,
        timeout_ms: u32,
    ) -> Result<Option<Message>> {
        self.begin_send(current, msg)?;

        let woken = sched::block_timeout(current.self_chan(), timeout_ms);
        if !woken {
            // Timed out: leave every queue and clear the slots.
            self.queues.lock().send.retain(|t| !Arc::ptr_eq(t, current));
            let mut slots = current.ipc.lock();
            slots.outgoing = None;
            slots.delivered = None;
            return Err(KernelError::TimedOut);
        }

        let mut slots = current.ipc.lock();
        slots.outgoing = None;
        Ok(slots.delivered.take())
    }

    /// Blocking Receive.
    pub fn receive(
        self: &Arc<Self>,
        current: &Arc<Thread>,
        max_buf: usize,
        timeout_ms: u32,
    ) -> Result<Message> {
        if let Some(msg) = self.begin_receive(current, max_buf)? {
            return Ok(msg);
        }

        let woken = sched::block_timeout(current.self_chan(), timeout_ms);
        if !woken {
            self.queues.lock().recv.retain(|t| !Arc::ptr_eq(t, current));
            current.ipc.lock().delivered = None;
            return Err(KernelError::TimedOut);
        }

        current
            .ipc
            .lock()
            .delivered
            .take()
            .ok_or(KernelError::InvalidArgument)
    }

    /// Async send: deliver immediately to a queued receiver or fail with
    /// `WouldBlock` — there is no in-kernel mailbox.
    pub fn send_async(&self, sender: &Arc<Thread>, msg: Message) -> Result<()> {
        msg.validate()?;

        let receiver = {
            let mut q = self.queues.lock();
            Self::pop_live(&mut q.recv)
        };
        let Some(receiver) = receiver else {
            return Err(KernelError::WouldBlock);
        };

        let mut delivered = message::deliver(&msg, sender, &receiver)?;
        {
            let mut rs = receiver.ipc.lock();
            let cap = rs.recv_cap;
            delivered.truncate_buffer(cap);
            rs.delivered = Some(delivered);
            // No reply is owed for an async message.
            rs.peer = TID_INVALID;
        }
        sched::wakeup_thread(&receiver);
        Ok(())
    }

    #[cfg(test)]
    pub fn queue_lens(&self) -> (usize, usize) {
        let q = self.queues.lock();
        (q.send.len(), q.recv.len())
    }
}

/// Reply to the peer recorded by the last Receive on `current`.
pub fn reply(current: &Arc<Thread>, msg: Message) -> Result<()> {
    let peer = {
        let mut slots = current.ipc.lock();
        let peer = slots.peer;
        slots.peer = TID_INVALID;
        peer
    };
    reply_to(current, peer, msg)
}

/// Reply to an explicit sender TID; lets a server answer out of order.
/// A sender that is gone (killed, timed out, never existed) fails with
/// `InvalidArgument` and no side effects.
pub fn reply_to(current: &Arc<Thread>, sender_tid: Tid, msg: Message) -> Result<()> {
    if sender_tid == TID_INVALID {
        return Err(KernelError::InvalidArgument);
    }

    let sender = sched::lookup_blocked(sender_tid).ok_or(KernelError::InvalidArgument)?;

    let delivered = message::deliver(&msg, current, &sender)?;
    {
        let mut slots = sender.ipc.lock();
        slots.delivered = Some(delivered);
    }
    sched::wakeup_thread(&sender);
    Ok(())
}

/// Reset a thread's IPC slots; used when its process dies mid-rendezvous.
pub fn clear_slots(slots: &mut IpcSlots) {
    slots.outgoing = None;
    slots.delivered = None;
    slots.peer = TID_INVALID;
    slots.recv_cap = 0;
}

/// A dying thread may owe somebody a reply. Wake that caller with an empty
/// delivery slot so its Call returns an error instead of waiting forever.
pub fn abort_pending_reply(t: &Arc<Thread>) {
    let peer = {
        let mut slots = t.ipc.lock();
        let p = slots.peer;
        slots.peer = TID_INVALID;
        p
    };
    if peer == TID_INVALID {
        return;
    }
    if let Some(caller) = sched::lookup_blocked(peer) {
        caller.ipc.lock().delivered = None;
        sched::wakeup_thread(&caller);
    }
}

#[cfg(test)]
mod tests;
