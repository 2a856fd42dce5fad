//! Spawn argument layout.
//!
//! Fixed-width slots throughout so the whole block can be copied across the
//! user/kernel boundary in one bounded read.

use crate::{Handle, HANDLE_INVALID, HANDLE_NAME_LEN};

pub const SPAWN_NAME_LEN: usize = 32;
pub const SPAWN_PROFILE_LEN: usize = 32;
pub const SPAWN_MODULE_LEN: usize = 32;
pub const SPAWN_PATH_MAX: usize = 128;
pub const SPAWN_MAX_ARGS: usize = 8;
pub const SPAWN_ARG_LEN: usize = 64;
pub const SPAWN_MAX_HANDLES: usize = 16;

/// Start mode: spawn from a boot module or from an ELF path.
pub const SPAWN_TYPE_MODULE: u32 = 0;
pub const SPAWN_TYPE_PATH: u32 = 1;

/// One handle to duplicate into the child.
///
/// `dst_hint` asks for a particular index in the child's table; a mismatch
/// after allocation is reported but not fatal.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SpawnHandle {
    pub src: Handle,
    pub dst_hint: Handle,
    pub name: [u8; HANDLE_NAME_LEN],
}

impl SpawnHandle {
    pub const fn empty() -> Self {
        Self { src: HANDLE_INVALID, dst_hint: HANDLE_INVALID, name: [0; HANDLE_NAME_LEN] }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SpawnArgs {
    pub name: [u8; SPAWN_NAME_LEN],
    pub profile: [u8; SPAWN_PROFILE_LEN],
    /// `SPAWN_TYPE_MODULE` or `SPAWN_TYPE_PATH`; selects which of
    /// `module_name`/`path` is meaningful.
    pub spawn_type: u32,
    pub module_name: [u8; SPAWN_MODULE_LEN],
    pub path: [u8; SPAWN_PATH_MAX],
    pub argc: u32,
    pub argv: [[u8; SPAWN_ARG_LEN]; SPAWN_MAX_ARGS],
    pub handle_count: u32,
    pub handles: [SpawnHandle; SPAWN_MAX_HANDLES],
    pub flags: u32,
}

impl SpawnArgs {
    pub const fn zeroed() -> Self {
        Self {
            name: [0; SPAWN_NAME_LEN],
            profile: [0; SPAWN_PROFILE_LEN],
            spawn_type: SPAWN_TYPE_MODULE,
            module_name: [0; SPAWN_MODULE_LEN],
            path: [0; SPAWN_PATH_MAX],
            argc: 0,
            argv: [[0; SPAWN_ARG_LEN]; SPAWN_MAX_ARGS],
            handle_count: 0,
            handles: [SpawnHandle::empty(); SPAWN_MAX_HANDLES],
            flags: 0,
        }
    }
}

/// Extract a NUL-terminated string from a fixed-width slot.
pub fn slot_str(slot: &[u8]) -> &str {
    let len = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    core::str::from_utf8(&slot[..len]).unwrap_or("")
}

/// Write `s` into a fixed-width slot, truncating and NUL-terminating.
pub fn set_slot_str(slot: &mut [u8], s: &str) {
    let n = s.len().min(slot.len().saturating_sub(1));
    slot[..n].copy_from_slice(&s.as_bytes()[..n]);
    for b in slot[n..].iter_mut() {
        *b = 0;
    }
}
