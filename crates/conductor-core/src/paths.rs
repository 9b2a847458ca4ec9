use crate::error::{ConductorError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONDUCTOR_DIR: &str = ".conductor";
pub const UNITS_DIR: &str = ".conductor/units";
pub const ARCHIVE_DIR: &str = ".conductor/archive";
pub const PROMPTS_DIR: &str = ".conductor/prompts";

pub const CONFIG_FILE: &str = ".conductor/config.yaml";
pub const STATE_FILE: &str = "state.yaml";

pub const ARTIFACTS_DIR: &str = "artifacts";
pub const MEMORY_DIR: &str = "memory";
pub const FROZEN_LOG: &str = "frozen.jsonl";
pub const HOT_JOURNAL: &str = "hot.jsonl";
pub const WARM_DIR: &str = "warm";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn conductor_dir(root: &Path) -> PathBuf {
    root.join(CONDUCTOR_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn unit_dir(root: &Path, id: &str) -> PathBuf {
    root.join(UNITS_DIR).join(id)
}

pub fn unit_state(root: &Path, id: &str) -> PathBuf {
    unit_dir(root, id).join(STATE_FILE)
}

pub fn archive_dir(root: &Path, id: &str) -> PathBuf {
    root.join(ARCHIVE_DIR).join(id)
}

pub fn artifacts_dir(root: &Path, id: &str) -> PathBuf {
    unit_dir(root, id).join(ARTIFACTS_DIR)
}

pub fn artifact_path(root: &Path, id: &str, filename: &str) -> PathBuf {
    artifacts_dir(root, id).join(filename)
}

pub fn memory_dir(root: &Path, id: &str) -> PathBuf {
    unit_dir(root, id).join(MEMORY_DIR)
}

pub fn prompts_dir(root: &Path) -> PathBuf {
    root.join(PROMPTS_DIR)
}

// ---------------------------------------------------------------------------
// Slug validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("slug regex is valid")
    })
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(ConductorError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_slugs() {
        for slug in ["checkout-flow", "a", "unit-123", "x1"] {
            validate_slug(slug).unwrap_or_else(|_| panic!("expected valid: {slug}"));
        }
    }

    #[test]
    fn invalid_slugs() {
        for slug in ["", "-lead", "trail-", "has spaces", "UPPER", "a_b"] {
            assert!(validate_slug(slug).is_err(), "expected invalid: {slug}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.conductor/config.yaml")
        );
        assert_eq!(
            unit_state(root, "checkout"),
            PathBuf::from("/tmp/proj/.conductor/units/checkout/state.yaml")
        );
        assert_eq!(
            memory_dir(root, "checkout"),
            PathBuf::from("/tmp/proj/.conductor/units/checkout/memory")
        );
    }
}
