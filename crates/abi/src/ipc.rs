//! IPC message wire format.
//!
//! A message is a fixed register bank, an optional inline buffer and a small
//! block of handles to transfer. The kernel deep-copies all three parts
//! across the address-space boundary; the sender TID is stamped by the
//! kernel on delivery and cannot be forged.

use crate::{Handle, Tid};

/// Number of 32-bit message register words.
pub const IPC_MSG_REGS: usize = 8;

/// Upper bound on the inline buffer carried by one message.
pub const IPC_MAX_BUF: usize = 4096;

/// Upper bound on handles transferred by one message.
pub const IPC_MAX_HANDLES: usize = 4;

/// Timeout value meaning "wait forever".
pub const IPC_TIMEOUT_INFINITE: u32 = 0;

/// Fixed register bank. The first word conventionally carries the operation
/// code; subsequent words carry small arguments.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgRegs {
    pub data: [u32; IPC_MSG_REGS],
}

impl MsgRegs {
    pub const fn zeroed() -> Self {
        Self { data: [0; IPC_MSG_REGS] }
    }
}

impl Default for MsgRegs {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// User-side view of a message as passed to the IPC syscalls.
///
/// `buffer_ptr`/`buffer_len` describe the caller's buffer: payload on send,
/// receive window on receive. On return from a receive the kernel rewrites
/// `buffer_len` to the delivered length and fills in `sender_tid`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MsgHeader {
    pub regs: MsgRegs,
    pub buffer_ptr: u32,
    pub buffer_len: u32,
    pub handle_count: u32,
    pub handles: [Handle; IPC_MAX_HANDLES],
    pub sender_tid: Tid,
    pub flags: u32,
}

impl MsgHeader {
    pub const fn zeroed() -> Self {
        Self {
            regs: MsgRegs::zeroed(),
            buffer_ptr: 0,
            buffer_len: 0,
            handle_count: 0,
            handles: [0; IPC_MAX_HANDLES],
            sender_tid: 0,
            flags: 0,
        }
    }
}
