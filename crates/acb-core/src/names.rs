//! Worker name validation.
//!
//! Worker names double as chat shortcuts (`/alice`, `@alice`), so they are
//! restricted to a small character class and must not shadow a bridge
//! command or routing keyword.

/// Names that would clash with bridge commands, aliases, or routing
/// keywords. A worker can never be hired under one of these.
pub const RESERVED_NAMES: &[&str] = &[
    // Bridge commands
    "team", "focus", "progress", "learn", "pause", "relaunch", "settings", "hire", "end",
    // Aliases
    "new", "use", "list", "kill", "status", "stop", "restart", "system",
    // Special
    "all", "start", "help",
];

/// Lowercase `raw` and strip everything outside `[a-z0-9-]`.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Whether a normalized name shadows a reserved word.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Normalize and validate an operator-supplied worker name.
///
/// # Errors
///
/// Returns `Err(String)` with the operator-facing message when the name
/// is empty after normalization or shadows a reserved word.
pub fn validate(raw: &str) -> Result<String, String> {
    let name = normalize(raw);
    if name.is_empty() {
        return Err("Name must use letters, numbers, and hyphens only.".to_string());
    }
    if is_reserved(&name) {
        return Err(format!(
            "Cannot use \"{name}\" - reserved command. Choose another name."
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_strips() {
        assert_eq!(normalize("  Alice "), "alice");
        assert_eq!(normalize("bob_2!"), "bob2");
        assert_eq!(normalize("dev-box"), "dev-box");
    }

    #[test]
    fn empty_after_normalization_rejected() {
        assert!(validate("!!!").is_err());
        assert!(validate("").is_err());
        assert!(validate("   ").is_err());
    }

    #[test]
    fn reserved_names_rejected() {
        for name in ["team", "all", "hire", "restart", "help"] {
            let err = validate(name).unwrap_err();
            assert!(err.contains("reserved"), "expected rejection for {name}");
        }
    }

    #[test]
    fn valid_names_pass_normalized() {
        assert_eq!(validate("Lee").unwrap(), "lee");
        assert_eq!(validate("chen-2").unwrap(), "chen-2");
    }

    #[test]
    fn reserved_check_applies_after_normalization() {
        // "Team!" normalizes to "team" which is reserved
        assert!(validate("Team!").is_err());
    }
}
