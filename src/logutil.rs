//! Keeps text received from the feeder on a single log line.

const MAX_PREVIEW: usize = 120;

/// Escape control characters and cap the length, so a misbehaving peer cannot break up or flood the log.
pub fn escape_log(s: &str) -> String {
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
            },
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_log;

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(escape_log("Food:\t50%\r"), "Food:\\t50%\\r");
        assert_eq!(escape_log("\u{7}"), "\\x07");
    }

    #[test]
    fn long_lines_are_truncated() {
        let escaped = escape_log(&"x".repeat(500));
        assert_eq!(escaped.chars().count(), 121);
        assert!(escaped.ends_with('…'));
    }
}
