use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// An ordered set of relative path prefixes.
///
/// A path is inside the scope when, after lexical normalisation, it starts
/// with one of the prefixes component-wise. Absolute paths and paths that
/// climb out of the root with `..` are never inside any scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    prefixes: Vec<PathBuf>,
}

impl Scope {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .filter_map(|p| normalize(Path::new(p.as_ref())))
                .collect(),
        }
    }

    /// A scope that admits every relative path under the root.
    pub fn unrestricted() -> Self {
        Self {
            prefixes: vec![PathBuf::new()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    /// Lexical check only: symlinks are not followed. Capabilities that
    /// touch the filesystem confirm the resolved location themselves.
    pub fn contains(&self, path: &str) -> bool {
        let Some(p) = normalize(Path::new(path)) else {
            return false;
        };
        self.prefixes.iter().any(|prefix| p.starts_with(prefix))
    }
}

/// Resolve `.` and `..` lexically. Returns `None` for absolute paths or
/// paths escaping the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// A scoped actor permitted to act within a phase. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub capabilities: Vec<String>,
    pub write_scope: Scope,
    pub budget: u32,
    pub retry_budget: u32,
}

impl Role {
    pub fn new(
        id: impl Into<String>,
        capabilities: Vec<String>,
        write_scope: Scope,
        budget: u32,
        retry_budget: u32,
    ) -> Self {
        Self {
            id: id.into(),
            capabilities,
            write_scope,
            budget,
            retry_budget,
        }
    }

    pub fn permits(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_matches_by_component() {
        let scope = Scope::new(["artifacts", "workspace/src"]);
        assert!(scope.contains("artifacts/brief.md"));
        assert!(scope.contains("./workspace/src/lib.rs"));
        assert!(!scope.contains("artifacts-old/brief.md"));
        assert!(!scope.contains("workspace/tests/a.rs"));
    }

    #[test]
    fn scope_rejects_escapes_and_absolute_paths() {
        let scope = Scope::new(["artifacts"]);
        assert!(!scope.contains("artifacts/../state.yaml"));
        assert!(!scope.contains("../outside"));
        assert!(!scope.contains("/etc/passwd"));
    }

    #[test]
    fn empty_scope_contains_nothing() {
        let scope = Scope::default();
        assert!(scope.is_empty());
        assert!(!scope.contains("artifacts/brief.md"));
    }

    #[test]
    fn unrestricted_scope_contains_relative_paths() {
        let scope = Scope::unrestricted();
        assert!(scope.contains("anything/at/all"));
        assert!(!scope.contains("/abs"));
    }

    #[test]
    fn role_permits_only_listed_capabilities() {
        let role = Role::new(
            "analyst",
            vec!["read_file".to_string()],
            Scope::default(),
            3,
            1,
        );
        assert!(role.permits("read_file"));
        assert!(!role.permits("write_file"));
    }
}
