//! Line-based INI parser.
//!
//! Case-sensitive keys, `[section]` headers, `key = value` pairs, `#` and
//! `;` comment lines. Oversized lines, sections, keys and values are
//! truncated to their limits rather than rejected.

/// Longest line considered; the rest of an overlong line is dropped.
pub const MAX_LINE: usize = 256;
pub const MAX_SECTION: usize = 64;
pub const MAX_KEY: usize = 32;
pub const MAX_VALUE: usize = 192;

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        // Back off to a char boundary so the slice stays valid UTF-8.
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

/// Parse `buf`, invoking `handler(section, key, value)` for every pair.
/// The handler returns `false` to stop parsing early.
pub fn parse_buffer(buf: &str, mut handler: impl FnMut(&str, &str, &str) -> bool) {
    let mut section = alloc::string::String::new();

    for raw_line in buf.lines() {
        let line = truncate(raw_line, MAX_LINE);
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                section.clear();
                section.push_str(truncate(&rest[..end], MAX_SECTION));
            }
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = truncate(key.trim(), MAX_KEY);
            let value = truncate(value.trim(), MAX_VALUE);
            if !handler(&section, key, value) {
                return;
            }
        }
    }
}

/// Whitespace-separated list value.
pub fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split_whitespace()
}

pub fn parse_bool(value: &str) -> bool {
    value == "true" || value == "1"
}

pub fn parse_u32(value: &str) -> u32 {
    let mut out: u32 = 0;
    for c in value.chars() {
        if let Some(d) = c.to_digit(10) {
            out = out.wrapping_mul(10).wrapping_add(d);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn collect(buf: &str) -> Vec<(String, String, String)> {
        let mut out = Vec::new();
        parse_buffer(buf, |s, k, v| {
            out.push((s.into(), k.into(), v.into()));
            true
        });
        out
    }

    #[test]
    fn sections_keys_and_comments() {
        let got = collect(
            "# leading comment\n\
             [service.vfsd]\n\
             type = module\n\
             ; semicolon comment\n\
             args =   a b   \n\
             \n\
             [handle.vfs]\n\
             type = endpoint\n",
        );
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], ("service.vfsd".into(), "type".into(), "module".into()));
        assert_eq!(got[1], ("service.vfsd".into(), "args".into(), "a b".into()));
        assert_eq!(got[2], ("handle.vfs".into(), "type".into(), "endpoint".into()));
    }

    #[test]
    fn oversized_fields_are_truncated() {
        let long_val = "x".repeat(400);
        let buf = format!("[s]\nkey = {long_val}\n");
        let got = collect(&buf);
        assert_eq!(got[0].2.len(), MAX_VALUE);

        let long_key = "k".repeat(64);
        let buf = format!("[s]\n{long_key} = v\n");
        let got = collect(&buf);
        assert_eq!(got[0].1.len(), MAX_KEY);
    }

    #[test]
    fn handler_can_stop_early() {
        let mut n = 0;
        parse_buffer("[s]\na = 1\nb = 2\n", |_, _, _| {
            n += 1;
            false
        });
        assert_eq!(n, 1);
    }

    #[test]
    fn helpers() {
        assert_eq!(split_list("  a b\tc ").collect::<Vec<_>>(), ["a", "b", "c"]);
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("yes"));
        assert_eq!(parse_u32("250"), 250);
        assert_eq!(parse_u32("abc"), 0);
    }
}
