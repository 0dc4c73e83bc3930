use std::env;
use std::sync::OnceLock;

static ARRAYCONTEXT_EAGER: OnceLock<bool> = OnceLock::new();

/// Truthy spellings accepted by boolean environment switches.
pub fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Whether `ARRAYCONTEXT_EAGER` asks deferred backends to evaluate every node as soon as
/// it is recorded. Read once per process.
pub fn eager_enabled() -> bool {
    *ARRAYCONTEXT_EAGER.get_or_init(|| match env::var("ARRAYCONTEXT_EAGER") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parses_truthy_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }
}
