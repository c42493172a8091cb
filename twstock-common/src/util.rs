//! Utility functions for console output and log hygiene.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so CJK stock names are never split mid-byte.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Sanitize a string for safe logging (redact sensitive patterns).
pub fn sanitize_for_log(s: &str) -> String {
    let patterns: &[(&str, &str)] = &[
        (r"(?i)(token|secret|bearer)\s*[=:]\s*\S{10,}", "$1=***REDACTED***"),
        (r"(?i)(bearer)\s+\S{10,}", "$1 ***REDACTED***"),
        (r"eyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+", "***REDACTED_JWT***"),
    ];

    let mut result = s.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            result = re.replace_all(&result, *replacement).to_string();
        }
    }
    result
}

/// Terminal column width of a character (CJK and full-width forms take two).
fn char_width(c: char) -> usize {
    match c as u32 {
        0x1100..=0x115F
        | 0x2E80..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6 => 2,
        _ => 1,
    }
}

/// Terminal column width of a string.
pub fn display_width(s: &str) -> usize {
    s.chars().map(char_width).sum()
}

/// Right-pad `s` with spaces to `width` terminal columns.
pub fn pad_display(s: &str, width: usize) -> String {
    let current = display_width(s);
    if current >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("台積電股份有限公司", 3), "台積電...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn test_sanitize_for_log() {
        let input = "request failed: token=eyJhbGciOiJIUzI1NiJ9.payload.signature";
        let output = sanitize_for_log(input);
        assert!(!output.contains("eyJhbGciOiJIUzI1NiJ9"));
        assert!(output.contains("REDACTED"));

        let header = "Authorization: Bearer abcdefghijklmnop";
        assert!(!sanitize_for_log(header).contains("abcdefghijklmnop"));
    }

    #[test]
    fn test_display_width() {
        assert_eq!(display_width("2330"), 4);
        assert_eq!(display_width("台積電"), 6);
        assert_eq!(display_width("A+"), 2);
    }

    #[test]
    fn test_pad_display() {
        assert_eq!(pad_display("聯電", 6), "聯電  ");
        assert_eq!(pad_display("2330", 6), "2330  ");
        assert_eq!(pad_display("台積電股份", 4), "台積電股份");
    }
}
