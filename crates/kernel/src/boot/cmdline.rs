//! Boot command line: space-separated `key=value` pairs from the loader.
//!
//! Recognized keys include `xnix.mmu=off`, `xnix.smp=off` and
//! `xnix.initmod=<idx>`.

use alloc::string::String;
use spin::Mutex;

static CMDLINE: Mutex<Option<String>> = Mutex::new(None);

pub fn set(cmdline: &str) {
    *CMDLINE.lock() = Some(String::from(cmdline));
}

fn kv_get_value(cmdline: &str, key: &str) -> Option<String> {
    for field in cmdline.split(' ') {
        if field.is_empty() {
            continue;
        }
        if let Some(rest) = field.strip_prefix(key) {
            if let Some(value) = rest.strip_prefix('=') {
                return Some(String::from(value));
            }
        }
    }
    None
}

pub fn get(key: &str) -> Option<String> {
    let cmdline = CMDLINE.lock();
    kv_get_value(cmdline.as_deref()?, key)
}

pub fn has_kv(key: &str, value: &str) -> bool {
    get(key).map(|v| v == value).unwrap_or(false)
}

pub fn get_u32(key: &str) -> Option<u32> {
    let v = get(key)?;
    if !v.chars().next()?.is_ascii_digit() {
        return None;
    }
    let mut out: u32 = 0;
    for c in v.chars() {
        let d = c.to_digit(10)?;
        out = out.wrapping_mul(10).wrapping_add(d);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_lookup() {
        let _g = crate::test_util::guard();
        set("xnix.smp=off console=serial xnix.initmod=3");
        assert!(has_kv("xnix.smp", "off"));
        assert!(!has_kv("xnix.mmu", "off"));
        assert_eq!(get("console").as_deref(), Some("serial"));
        assert_eq!(get_u32("xnix.initmod"), Some(3));
        assert_eq!(get_u32("console"), None);
        assert_eq!(get("missing"), None);
    }
}
