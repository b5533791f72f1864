//! Canonical home directory resolution for the bridge
//!
//! Single source of truth for home resolution across the acb crates.
//! `ACB_HOME` overrides the platform default, which is what the
//! integration tests use to point the bridge at a tempdir.
//!
//! # Precedence
//!
//! 1. `ACB_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the home directory for bridge operations.
///
/// # Errors
///
/// Returns an error if `ACB_HOME` is unset and the platform home
/// directory cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("ACB_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Default state root under a home directory: `<home>/.acb/workers`.
pub fn default_state_dir(home: &std::path::Path) -> PathBuf {
    home.join(".acb").join("workers")
}
