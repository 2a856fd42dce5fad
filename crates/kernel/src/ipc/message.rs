//! Kernel-side IPC messages and the cross-address-space deep copy.

use crate::config::IPC_MAX_BUF;
use crate::sched::Thread;
use crate::{KernelError, Result};
use alloc::sync::Arc;
use alloc::vec::Vec;
use xnix_abi::ipc::{MsgRegs, IPC_MAX_HANDLES};
use xnix_abi::{Handle, Tid, TID_INVALID};

/// A message in kernel representation: the register bank, the inline buffer
/// (already copied in from the sender's space) and the handles to transfer.
#[derive(Debug, Clone)]
pub struct Message {
    pub regs: MsgRegs,
    pub buffer: Vec<u8>,
    pub handles: Vec<Handle>,
    /// Stamped by the kernel on delivery; userland cannot forge it.
    pub sender_tid: Tid,
    pub flags: u32,
}

impl Message {
    pub fn new() -> Self {
        Self {
            regs: MsgRegs::zeroed(),
            buffer: Vec::new(),
            handles: Vec::new(),
            sender_tid: TID_INVALID,
            flags: 0,
        }
    }

    pub fn with_regs(words: [u32; xnix_abi::ipc::IPC_MSG_REGS]) -> Self {
        let mut m = Self::new();
        m.regs = MsgRegs { data: words };
        m
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer.len() > IPC_MAX_BUF {
            return Err(KernelError::MessageTooLarge);
        }
        if self.handles.len() > IPC_MAX_HANDLES {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }

    /// Clamp the inline buffer to the receiver's declared capacity.
    pub fn truncate_buffer(&mut self, cap: usize) {
        if self.buffer.len() > cap {
            self.buffer.truncate(cap);
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

/// Deep-copy `msg` for delivery from `src` to `dst`, duplicating every
/// transferred handle into the receiver's handle table. The copy happens
/// exactly once per transfer direction; the sender keeps its own handle
/// copies unless it explicitly closes them.
///
/// Handle transfer requires both sides to belong to a process; a message
/// between kernel threads may not carry handles.
pub fn deliver(msg: &Message, src: &Arc<Thread>, dst: &Arc<Thread>) -> Result<Message> {
    let mut out = Message {
        regs: msg.regs,
        buffer: msg.buffer.clone(),
        handles: Vec::with_capacity(msg.handles.len()),
        sender_tid: src.tid(),
        flags: msg.flags,
    };

    if !msg.handles.is_empty() {
        let (src_proc, dst_proc) = match (src.owner(), dst.owner()) {
            (Some(s), Some(d)) => (s, d),
            _ => return Err(KernelError::PermissionDenied),
        };
        for &h in &msg.handles {
            // Duplication preserves type and rights; it requires GRANT on
            // the sender's entry like any other cross-process duplicate.
            let new_handle = crate::cap::transfer(src_proc, h, dst_proc)?;
            out.handles.push(new_handle);
        }
    }

    Ok(out)
}
