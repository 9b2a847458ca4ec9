use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::protocol::{ActionCatalog, ActionShape};
use conductor_core::role::{Role, Scope};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

pub type Args = Map<String, Value>;

// ─── Capability ───────────────────────────────────────────────────────────

/// A named operation a role may invoke. Handlers only run after the
/// registry's scope checks pass.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Argument keys a call must supply.
    fn required_args(&self) -> &[&'static str] {
        &[]
    }

    /// Arguments that name paths the handler will write to.
    fn path_args(&self) -> &[&'static str] {
        &[]
    }

    async fn invoke(&self, args: Args) -> std::result::Result<Value, String>;
}

/// Which arguments of a registered capability are checked against the
/// caller's scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredScope {
    pub path_args: Vec<String>,
}

impl DeclaredScope {
    pub fn paths(args: &[&str]) -> Self {
        Self {
            path_args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ─── CapabilityError ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("unknown capability '{0}'")]
    Unknown(String),

    #[error("'{capability}' may not touch '{path}': outside the caller's scope")]
    OutOfScope { capability: String, path: String },

    #[error("'{capability}' needs a string argument '{arg}'")]
    InvalidArgument { capability: String, arg: String },

    #[error("'{capability}' failed: {message}")]
    Handler { capability: String, message: String },

    #[error("'{capability}' timed out after {secs}s")]
    Timeout { capability: String, secs: u64 },
}

impl CapabilityError {
    /// Rejected before the handler ran.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            CapabilityError::Unknown(_)
                | CapabilityError::OutOfScope { .. }
                | CapabilityError::InvalidArgument { .. }
        )
    }
}

// ─── CapabilityRegistry ───────────────────────────────────────────────────

struct Registered {
    handler: Arc<dyn Capability>,
    declared: DeclaredScope,
}

pub struct CapabilityRegistry {
    entries: BTreeMap<String, Registered>,
    timeout: Duration,
}

impl CapabilityRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            timeout,
        }
    }

    /// Registry with `read_file`, `write_file` and `list_dir` rooted at
    /// `root`.
    pub fn with_builtins(root: &Path, timeout: Duration) -> Self {
        let mut reg = Self::new(timeout);
        reg.add(Arc::new(ReadFile::new(root)));
        reg.add(Arc::new(WriteFile::new(root)));
        reg.add(Arc::new(ListDir::new(root)));
        reg
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn Capability>,
        declared: DeclaredScope,
    ) {
        self.entries
            .insert(name.into(), Registered { handler, declared });
    }

    /// Register under the handler's own name and declared path arguments.
    pub fn add(&mut self, handler: Arc<dyn Capability>) {
        let name = handler.name().to_string();
        let declared = DeclaredScope::paths(handler.path_args());
        self.register(name, handler, declared);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Every registered capability as a decodable action shape.
    pub fn catalog(&self) -> ActionCatalog {
        self.catalog_where(|_| true)
    }

    /// Only the capabilities `role` is allowed to call.
    pub fn catalog_for(&self, role: &Role) -> ActionCatalog {
        self.catalog_where(|name| role.permits(name))
    }

    fn catalog_where(&self, keep: impl Fn(&str) -> bool) -> ActionCatalog {
        let mut catalog = ActionCatalog::new();
        for (name, reg) in &self.entries {
            if keep(name) {
                catalog.insert(ActionShape::new(
                    name.clone(),
                    reg.handler.description(),
                    reg.handler.required_args(),
                ));
            }
        }
        catalog
    }

    /// Scope checks only. Fails closed on unknown names and on declared
    /// path arguments that are missing or outside `caller_scope`.
    pub fn check(&self, name: &str, args: &Args, caller_scope: &Scope) -> Result<(), CapabilityError> {
        let reg = self
            .entries
            .get(name)
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))?;
        for arg in &reg.declared.path_args {
            let Some(path) = args.get(arg).and_then(Value::as_str) else {
                return Err(CapabilityError::InvalidArgument {
                    capability: name.to_string(),
                    arg: arg.clone(),
                });
            };
            if !caller_scope.contains(path) {
                return Err(CapabilityError::OutOfScope {
                    capability: name.to_string(),
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    pub async fn dispatch(
        &self,
        name: &str,
        args: Args,
        caller_scope: &Scope,
    ) -> Result<Value, CapabilityError> {
        self.check(name, &args, caller_scope)?;
        let handler = match self.entries.get(name) {
            Some(reg) => Arc::clone(&reg.handler),
            None => return Err(CapabilityError::Unknown(name.to_string())),
        };

        debug!(capability = name, "dispatch");
        match tokio::time::timeout(self.timeout, handler.invoke(args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(CapabilityError::Handler {
                capability: name.to_string(),
                message,
            }),
            Err(_) => Err(CapabilityError::Timeout {
                capability: name.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

// ─── Built-ins ────────────────────────────────────────────────────────────

/// Resolve a caller-supplied relative path under `root`. Absolute paths and
/// `..` escapes are refused.
fn resolve(root: &Path, rel: &str) -> std::result::Result<PathBuf, String> {
    if !Scope::unrestricted().contains(rel) {
        return Err(format!("path '{rel}' escapes the working root"));
    }
    Ok(root.join(rel))
}

/// Refuse `path` when its nearest existing ancestor resolves, through
/// symlinks, to somewhere outside `root`.
async fn confined(root: &Path, path: &Path) -> std::result::Result<(), String> {
    let real_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| format!("{}: {e}", root.display()))?;
    let mut existing = path;
    while tokio::fs::symlink_metadata(existing).await.is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return Ok(()),
        }
    }
    let real = tokio::fs::canonicalize(existing)
        .await
        .map_err(|e| format!("{}: {e}", existing.display()))?;
    if !real.starts_with(&real_root) {
        return Err(format!("path '{}' resolves outside the working root", path.display()));
    }
    Ok(())
}

fn str_arg<'a>(args: &'a Args, key: &str) -> std::result::Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string argument '{key}'"))
}

pub struct ReadFile {
    root: PathBuf,
}

impl ReadFile {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl Capability for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file relative to the unit directory."
    }

    fn required_args(&self) -> &[&'static str] {
        &["path"]
    }

    async fn invoke(&self, args: Args) -> std::result::Result<Value, String> {
        let path = resolve(&self.root, str_arg(&args, "path")?)?;
        tokio::fs::read_to_string(&path)
            .await
            .map(Value::String)
            .map_err(|e| format!("{}: {e}", path.display()))
    }
}

pub struct WriteFile {
    root: PathBuf,
}

impl WriteFile {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl Capability for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or replace a text file relative to the unit directory."
    }

    fn required_args(&self) -> &[&'static str] {
        &["path", "content"]
    }

    fn path_args(&self) -> &[&'static str] {
        &["path"]
    }

    async fn invoke(&self, args: Args) -> std::result::Result<Value, String> {
        let rel = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let path = resolve(&self.root, rel)?;
        confined(&self.root, &path).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("{}: {e}", parent.display()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))?;
        Ok(json!({ "path": rel, "bytes": content.len() }))
    }
}

pub struct ListDir {
    root: PathBuf,
}

impl ListDir {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl Capability for ListDir {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory relative to the unit directory (default: the unit directory itself)."
    }

    async fn invoke(&self, args: Args) -> std::result::Result<Value, String> {
        let rel = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let dir = resolve(&self.root, rel)?;
        let mut rd = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| format!("{}: {e}", dir.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(|e| e.to_string())? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(Value::String(name));
        }
        names.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        Ok(Value::Array(names))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for Counting {
        fn name(&self) -> &str {
            "touch"
        }
        fn description(&self) -> &str {
            "counts calls"
        }
        fn path_args(&self) -> &[&'static str] {
            &["path"]
        }
        async fn invoke(&self, _args: Args) -> std::result::Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    struct Slow;

    #[async_trait]
    impl Capability for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never returns in time"
        }
        async fn invoke(&self, _args: Args) -> std::result::Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn args(v: Value) -> Args {
        v.as_object().cloned().unwrap_or_default()
    }

    fn counting() -> (CapabilityRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = CapabilityRegistry::new(Duration::from_secs(5));
        reg.add(Arc::new(Counting {
            calls: Arc::clone(&calls),
        }));
        (reg, calls)
    }

    #[tokio::test]
    async fn unknown_capability_fails_closed() {
        let (reg, calls) = counting();
        let err = reg
            .dispatch("nope", Args::new(), &Scope::unrestricted())
            .await
            .unwrap_err();
        assert_eq!(err, CapabilityError::Unknown("nope".into()));
        assert!(err.is_permission_denied());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn out_of_scope_path_never_reaches_handler() {
        let (reg, calls) = counting();
        let scope = Scope::new(["artifacts"]);
        let err = reg
            .dispatch("touch", args(json!({"path": "workspace/x"})), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::OutOfScope { .. }));
        let err = reg.dispatch("touch", Args::new(), &scope).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArgument { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        reg.dispatch("touch", args(json!({"path": "artifacts/x"})), &scope)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_uses_given_name_and_declared_scope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = CapabilityRegistry::new(Duration::from_secs(5));
        reg.register(
            "poke",
            Arc::new(Counting {
                calls: Arc::clone(&calls),
            }),
            DeclaredScope::default(),
        );
        assert!(reg.contains("poke"));
        assert!(!reg.contains("touch"));
        reg.dispatch("poke", Args::new(), &Scope::default())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_timeout_is_reported() {
        let mut reg = CapabilityRegistry::new(Duration::from_millis(50));
        reg.add(Arc::new(Slow));
        let err = reg
            .dispatch("slow", Args::new(), &Scope::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout { .. }));
        assert!(!err.is_permission_denied());
    }

    #[tokio::test]
    async fn builtins_write_read_list() {
        let dir = TempDir::new().unwrap();
        let reg = CapabilityRegistry::with_builtins(dir.path(), Duration::from_secs(5));
        let scope = Scope::new(["artifacts"]);

        let written = reg
            .dispatch(
                "write_file",
                args(json!({"path": "artifacts/brief.md", "content": "# Brief"})),
                &scope,
            )
            .await
            .unwrap();
        assert_eq!(written["bytes"], 7);

        let read = reg
            .dispatch("read_file", args(json!({"path": "artifacts/brief.md"})), &scope)
            .await
            .unwrap();
        assert_eq!(read, Value::String("# Brief".into()));

        let listed = reg
            .dispatch("list_dir", Args::new(), &scope)
            .await
            .unwrap();
        assert_eq!(listed, json!(["artifacts/"]));

        let err = reg
            .dispatch("read_file", args(json!({"path": "../secret"})), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Handler { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_through_symlink_out_of_root_is_refused() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("artifacts")).unwrap();
        let reg = CapabilityRegistry::with_builtins(dir.path(), Duration::from_secs(5));
        let scope = Scope::new(["artifacts"]);

        let err = reg
            .dispatch(
                "write_file",
                args(json!({"path": "artifacts/nested/brief.md", "content": "x"})),
                &scope,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside the working root"));
        assert!(!outside.path().join("nested").exists());
    }

    #[test]
    fn catalog_for_role_filters_by_allow_list() {
        let dir = TempDir::new().unwrap();
        let reg = CapabilityRegistry::with_builtins(dir.path(), Duration::from_secs(5));
        let role = Role::new("analyst", vec!["read_file".into()], Scope::default(), 3, 1);
        let catalog = reg.catalog_for(&role);
        assert!(catalog.get("read_file").is_some());
        assert!(catalog.get("write_file").is_none());
        assert!(catalog.get("finish").is_some());
        assert_eq!(
            reg.catalog().get("write_file").map(|s| s.required.clone()),
            Some(vec!["path".to_string(), "content".to_string()])
        );
    }
}
