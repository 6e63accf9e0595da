//! POSIX shell quoting.

/// Wraps `value` in single quotes, closing and reopening the quote around
/// any embedded `'` so the result always tokenizes as a single word.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_value_is_wrapped() {
        assert_eq!("'nginx:latest'", quote("nginx:latest"));
    }

    #[test]
    fn test_single_quote_cannot_break_out() {
        assert_eq!(r"'it'\''s'", quote("it's"));
    }

    #[test]
    fn test_injection_attempt_stays_one_token() {
        let quoted = quote("x'; rm -rf / #");
        // The embedded quote is escaped; the shell sees one argument.
        assert_eq!(r"'x'\''; rm -rf / #'", quoted);
    }

    #[test]
    fn test_empty_value_is_still_a_token() {
        assert_eq!("''", quote(""));
    }
}
