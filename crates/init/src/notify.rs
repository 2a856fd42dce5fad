//! Service readiness notifications.
//!
//! Services report readiness to init over the `init_notify` endpoint. Two
//! encodings are accepted: the compact form with the pid and a short name
//! packed into the message registers, and the buffer form carrying a
//! `ReadyMsg` for names that do not fit.

use alloc::string::String;
use xnix_abi::ipc::IPC_MSG_REGS;

/// Register 0 magic for a readiness report.
pub const SVC_MSG_READY: u32 = 0x5256_4453; // "SDVR"

/// Longest service name carried in a report.
pub const READY_NAME_MAX: usize = 16;

/// Buffer-form readiness report.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ReadyMsg {
    pub magic: u32,
    pub pid: u32,
    pub name: [u8; READY_NAME_MAX],
}

/// Decode a readiness report from a received message. Returns the pid and
/// service name, or `None` for anything that is not a valid report.
pub fn parse_ready(regs: &[u32; IPC_MSG_REGS], buffer: &[u8]) -> Option<(u32, String)> {
    if regs[0] != SVC_MSG_READY {
        return None;
    }

    let pid = regs[1];
    if pid != 0 {
        // Compact form: name packed into regs[2..6].
        let mut raw = [0u8; READY_NAME_MAX];
        for (i, word) in regs[2..6].iter().enumerate() {
            raw[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        return Some((pid, decode_name(&raw)?));
    }

    // Buffer form.
    if buffer.len() < core::mem::size_of::<ReadyMsg>() {
        return None;
    }
    let magic = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    if magic != SVC_MSG_READY {
        return None;
    }
    let pid = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
    let mut raw = [0u8; READY_NAME_MAX];
    raw.copy_from_slice(&buffer[8..8 + READY_NAME_MAX]);
    Some((pid, decode_name(&raw)?))
}

fn decode_name(raw: &[u8; READY_NAME_MAX]) -> Option<String> {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(READY_NAME_MAX);
    if len == 0 {
        return None;
    }
    core::str::from_utf8(&raw[..len]).ok().map(String::from)
}

/// Encode the compact form; used by service-side runtime support.
pub fn encode_ready(pid: u32, name: &str) -> [u32; IPC_MSG_REGS] {
    let mut regs = [0u32; IPC_MSG_REGS];
    regs[0] = SVC_MSG_READY;
    regs[1] = pid;
    let mut raw = [0u8; READY_NAME_MAX];
    let n = name.len().min(READY_NAME_MAX - 1);
    raw[..n].copy_from_slice(&name.as_bytes()[..n]);
    for i in 0..4 {
        regs[2 + i] = u32::from_le_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]]);
    }
    regs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_form_round_trips() {
        let regs = encode_ready(42, "ramfsd");
        let (pid, name) = parse_ready(&regs, &[]).unwrap();
        assert_eq!(pid, 42);
        assert_eq!(name, "ramfsd");
    }

    #[test]
    fn buffer_form_is_decoded() {
        let mut buf = alloc::vec![0u8; core::mem::size_of::<ReadyMsg>()];
        buf[0..4].copy_from_slice(&SVC_MSG_READY.to_le_bytes());
        buf[4..8].copy_from_slice(&7u32.to_le_bytes());
        buf[8..12].copy_from_slice(b"kbd\0");

        let mut regs = [0u32; IPC_MSG_REGS];
        regs[0] = SVC_MSG_READY;
        // pid 0 in the registers selects the buffer form.
        let (pid, name) = parse_ready(&regs, &buf).unwrap();
        assert_eq!(pid, 7);
        assert_eq!(name, "kbd");
    }

    #[test]
    fn junk_is_rejected() {
        assert!(parse_ready(&[0; IPC_MSG_REGS], &[]).is_none());
        let mut regs = [0u32; IPC_MSG_REGS];
        regs[0] = SVC_MSG_READY;
        // pid 0 with an undersized buffer.
        assert!(parse_ready(&regs, &[1, 2, 3]).is_none());
    }
}
