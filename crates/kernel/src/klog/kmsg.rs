//! The kmsg ring buffer.
//!
//! Each entry is a 12-byte header `{seq, timestamp, level, facility, len}`
//! followed by `len` bytes of text and a NUL. The ring drops oldest entries
//! to make room and tracks `first_seq`, the lowest sequence number still
//! present.

use crate::config::{KMSG_BUF_SIZE, KMSG_MAX_LINE};
use crate::sync::IrqMutex;
use super::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Facility {
    Kern = 0,
    Sched = 1,
    Ipc = 2,
    Mm = 3,
    Proc = 4,
}

const HDR_SIZE: usize = 12;

struct EntryHeader {
    seq: u32,
    timestamp: u32,
    level: u8,
    facility: u8,
    len: u16,
}

struct KmsgRing {
    buf: [u8; KMSG_BUF_SIZE],
    head: usize,
    tail: usize,
    used: usize,
    /// Sequence number of the next entry to be written.
    seq: u32,
    /// Entries below this sequence number have been overwritten.
    first_seq: u32,
}

static RING: IrqMutex<KmsgRing> = IrqMutex::new(KmsgRing {
    buf: [0; KMSG_BUF_SIZE],
    head: 0,
    tail: 0,
    used: 0,
    seq: 0,
    first_seq: 0,
});

impl KmsgRing {
    fn read_at(&self, offset: usize, out: &mut [u8]) {
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.buf[(offset + i) % KMSG_BUF_SIZE];
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.buf[(self.head + i) % KMSG_BUF_SIZE] = *b;
        }
        self.head = (self.head + bytes.len()) % KMSG_BUF_SIZE;
        self.used += bytes.len();
    }

    fn header_at(&self, offset: usize) -> EntryHeader {
        let mut raw = [0u8; HDR_SIZE];
        self.read_at(offset, &mut raw);
        EntryHeader {
            seq: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            timestamp: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            level: raw[8],
            facility: raw[9],
            len: u16::from_le_bytes([raw[10], raw[11]]),
        }
    }

    fn discard_oldest(&mut self) {
        let hdr = self.header_at(self.tail);
        let entry_size = HDR_SIZE + hdr.len as usize + 1;
        self.tail = (self.tail + entry_size) % KMSG_BUF_SIZE;
        self.used -= entry_size;
        self.first_seq = hdr.seq + 1;
    }
}

fn entry_total_size(text_len: usize) -> usize {
    HDR_SIZE + text_len + 1
}

pub(super) fn log_raw(level: LogLevel, facility: Facility, text: &str) {
    let len = text.len().min(KMSG_MAX_LINE);
    let need = entry_total_size(len);
    if need > KMSG_BUF_SIZE - 1 {
        return;
    }

    let mut ring = RING.lock();

    while KMSG_BUF_SIZE - ring.used - 1 < need && ring.used != 0 {
        ring.discard_oldest();
    }

    let seq = ring.seq;
    ring.seq = seq.wrapping_add(1);

    let mut hdr = [0u8; HDR_SIZE];
    hdr[0..4].copy_from_slice(&seq.to_le_bytes());
    hdr[4..8].copy_from_slice(&(crate::time::ticks() as u32).to_le_bytes());
    hdr[8] = level as u8;
    hdr[9] = facility as u8;
    hdr[10..12].copy_from_slice(&(len as u16).to_le_bytes());

    ring.write(&hdr);
    ring.write(&text.as_bytes()[..len]);
    ring.write(&[0]);
}

/// Read the entry at `*seq` into `buf` as `"<level>,<seq>,<ts>;text\n"` and
/// advance `*seq` past it. Returns the number of bytes written, or `None`
/// when the cursor has caught up with the writer.
pub fn kmsg_read(seq: &mut u32, buf: &mut [u8]) -> Option<usize> {
    let ring = RING.lock();

    if *seq < ring.first_seq {
        *seq = ring.first_seq;
    }
    if *seq >= ring.seq {
        return None;
    }

    // Linear scan from the tail to the requested sequence number.
    let mut offset = ring.tail;
    let mut cur = ring.first_seq;
    while cur < *seq {
        let hdr = ring.header_at(offset);
        offset = (offset + entry_total_size(hdr.len as usize)) % KMSG_BUF_SIZE;
        cur += 1;
    }

    let hdr = ring.header_at(offset);
    let mut text = [0u8; KMSG_MAX_LINE];
    let text_len = hdr.len as usize;
    ring.read_at((offset + HDR_SIZE) % KMSG_BUF_SIZE, &mut text[..text_len]);

    let header_str = alloc::format!("{},{},{};", hdr.level, hdr.seq, hdr.timestamp);
    let total = header_str.len() + text_len + 1;
    if total > buf.len() {
        return None;
    }

    buf[..header_str.len()].copy_from_slice(header_str.as_bytes());
    buf[header_str.len()..header_str.len() + text_len].copy_from_slice(&text[..text_len]);
    buf[total - 1] = b'\n';

    *seq = hdr.seq + 1;
    Some(total)
}

/// Sequence number the next entry will get.
pub fn next_seq() -> u32 {
    RING.lock().seq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_formats_and_advances() {
        let _g = crate::test_util::guard();
        let start = next_seq();
        log_raw(LogLevel::Info, Facility::Kern, "hello kmsg");
        log_raw(LogLevel::Warn, Facility::Sched, "second");

        let mut seq = start;
        let mut buf = [0u8; 512];

        let n = kmsg_read(&mut seq, &mut buf).expect("first entry");
        let line = core::str::from_utf8(&buf[..n]).unwrap();
        assert!(line.starts_with("2,"), "level field first: {line}");
        assert!(line.ends_with("hello kmsg\n"));
        assert_eq!(seq, start + 1);

        let n = kmsg_read(&mut seq, &mut buf).expect("second entry");
        let line = core::str::from_utf8(&buf[..n]).unwrap();
        assert!(line.ends_with("second\n"));
    }

    #[test]
    fn overflow_drops_oldest_and_bumps_first_seq() {
        let _g = crate::test_util::guard();
        let long = "x".repeat(200);
        let start = next_seq();
        // More than enough entries to wrap the ring several times.
        for _ in 0..200 {
            log_raw(LogLevel::Debug, Facility::Kern, &long);
        }
        let mut seq = start;
        let mut buf = [0u8; 512];
        // The cursor is snapped forward to the oldest surviving entry.
        let n = kmsg_read(&mut seq, &mut buf).expect("entry");
        assert!(n > 0);
        assert!(seq > start + 1);
    }
}
