//! Logging utilities for keeping untrusted strings (player names, event values,
//! reward commands) on a single log line.

use crate::missions::types::PropertyBag;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Render a property bag as `Key=value, Key=value` with escaped values.
pub fn format_property_bag(properties: &PropertyBag) -> String {
    properties
        .iter()
        .map(|(key, value)| format!("{}={}", key, escape_log(&value.to_string())))
        .collect::<Vec<_>>()
        .join(", ")
}
