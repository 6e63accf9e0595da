//! Name derivation shared by deployments and stateful resources.

use rand::Rng;

/// Strips everything a container name cannot carry, collapsing any other
/// character to `-`. Input names already match `^[A-Za-z0-9_-]+$` when they
/// come from the catalog; this also covers derived names.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect::<String>()
        .to_lowercase()
}

/// Upper-snake form used for injected environment variable names:
/// `my-db` becomes `MY_DB`.
pub fn upper_snake(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Eight random hex characters, enough to keep container names unique per
/// create attempt.
pub fn short_hex() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_allowed_characters() {
        assert_eq!("my-app_2", sanitize("my-app_2"));
        assert_eq!("my-app", sanitize("My App"));
    }

    #[test]
    fn test_upper_snake() {
        assert_eq!("DB1", upper_snake("db1"));
        assert_eq!("MY_DB", upper_snake("my-db"));
        assert_eq!("A_B_C", upper_snake("a.b c"));
    }

    #[test]
    fn test_short_hex_is_eight_chars() {
        let suffix = short_hex();
        assert_eq!(8, suffix.len());
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
