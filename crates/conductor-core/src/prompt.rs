use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// PromptLayer
// ---------------------------------------------------------------------------

/// Source tier of a layer. Declaration order is application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTier {
    Base,
    Extension,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptLayer {
    pub name: String,
    pub tier: PromptTier,
    /// Extension the layer belongs to. Only set for `Extension` layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Role the layer applies to; `None` applies to every role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub body: String,
}

impl PromptLayer {
    pub fn new(name: impl Into<String>, tier: PromptTier, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tier,
            source: None,
            role: None,
            body: body.into(),
        }
    }

    pub fn for_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn in_extension(mut self, extension: impl Into<String>) -> Self {
        self.source = Some(extension.into());
        self
    }

    pub fn applies_to(&self, role: &str) -> bool {
        match &self.role {
            Some(r) => r == role,
            None => true,
        }
    }

    /// Base, then extensions by extension name, then overrides. Within a
    /// group, shared layers precede role-specific ones, then by name.
    fn order_key(&self) -> (PromptTier, &str, bool, &str, &str) {
        (
            self.tier,
            self.source.as_deref().unwrap_or(""),
            self.role.is_some(),
            &self.name,
            &self.body,
        )
    }
}

// ---------------------------------------------------------------------------
// PromptStack / EffectiveInstruction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveInstruction {
    pub role: String,
    /// Names of the applied layers, in application order.
    pub layers: Vec<String>,
    pub body: String,
}

/// An unordered set of layers. Resolution sorts, so the insertion order
/// never shows in the output.
#[derive(Debug, Clone, Default)]
pub struct PromptStack {
    layers: Vec<PromptLayer>,
}

impl PromptStack {
    pub fn new(layers: Vec<PromptLayer>) -> Self {
        Self { layers }
    }

    pub fn push(&mut self, layer: PromptLayer) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[PromptLayer] {
        &self.layers
    }

    pub fn resolve(&self, role: &str) -> EffectiveInstruction {
        let mut applicable: Vec<&PromptLayer> =
            self.layers.iter().filter(|l| l.applies_to(role)).collect();
        applicable.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        let mut names = Vec::with_capacity(applicable.len());
        let mut parts = Vec::with_capacity(applicable.len());
        for layer in applicable {
            let body = layer.body.trim();
            if body.is_empty() {
                continue;
            }
            names.push(match &layer.source {
                Some(ext) => format!("{ext}/{}", layer.name),
                None => layer.name.clone(),
            });
            parts.push(body);
        }

        EffectiveInstruction {
            role: role.to_string(),
            layers: names,
            body: parts.join("\n\n"),
        }
    }

    /// Read every layer under `.conductor/prompts/`. Missing directories
    /// contribute nothing.
    pub fn load(root: &Path) -> Result<Self> {
        let dir = paths::prompts_dir(root);
        let mut layers = read_layers(&dir.join("base"), PromptTier::Base, None)?;

        let ext_root = dir.join("extensions");
        if ext_root.is_dir() {
            for entry in std::fs::read_dir(&ext_root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let ext = entry.file_name().to_string_lossy().into_owned();
                    layers.extend(read_layers(&entry.path(), PromptTier::Extension, Some(&ext))?);
                }
            }
        }

        layers.extend(read_layers(&dir.join("overrides"), PromptTier::Override, None)?);
        Ok(Self { layers })
    }
}

fn read_layers(dir: &Path, tier: PromptTier, extension: Option<&str>) -> Result<Vec<PromptLayer>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut layers = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let body = std::fs::read_to_string(&path)?;
        let mut layer = PromptLayer::new(stem, tier, body);
        if stem != "shared" && !stem.starts_with('_') {
            layer = layer.for_role(stem);
        }
        if let Some(ext) = extension {
            layer = layer.in_extension(ext);
        }
        layers.push(layer);
    }
    Ok(layers)
}

/// Seed `.conductor/prompts/base/` with a shared layer and one layer per
/// role. Existing files are left alone. Returns how many were written.
pub fn install_defaults<'a>(root: &Path, roles: impl IntoIterator<Item = &'a str>) -> Result<usize> {
    let base = paths::prompts_dir(root).join("base");
    let mut written = 0;

    let shared = "You are one role in a phased delivery workflow. Work only on the \
                  current unit of work, stay inside your write scope, and finish \
                  as soon as the phase's artifact is written.\n";
    if crate::io::write_if_missing(&base.join("shared.md"), shared.as_bytes())? {
        written += 1;
    }
    for role in roles {
        let body = format!("Your role: {role}.\n");
        if crate::io::write_if_missing(&base.join(format!("{role}.md")), body.as_bytes())? {
            written += 1;
        }
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Vec<PromptLayer> {
        vec![
            PromptLayer::new("local", PromptTier::Override, "OVERRIDE"),
            PromptLayer::new("z-style", PromptTier::Extension, "EXT-Z").in_extension("zeta"),
            PromptLayer::new("shared", PromptTier::Base, "BASE"),
            PromptLayer::new("a-style", PromptTier::Extension, "EXT-A").in_extension("alpha"),
            PromptLayer::new("analyst", PromptTier::Base, "BASE-ANALYST").for_role("analyst"),
            PromptLayer::new("developer", PromptTier::Base, "BASE-DEV").for_role("developer"),
        ]
    }

    #[test]
    fn resolve_orders_base_extensions_overrides() {
        let stack = PromptStack::new(sample());
        let eff = stack.resolve("analyst");
        assert_eq!(eff.body, "BASE\n\nBASE-ANALYST\n\nEXT-A\n\nEXT-Z\n\nOVERRIDE");
        assert_eq!(
            eff.layers,
            vec!["shared", "analyst", "alpha/a-style", "zeta/z-style", "local"]
        );
    }

    #[test]
    fn resolve_filters_other_roles() {
        let eff = PromptStack::new(sample()).resolve("developer");
        assert!(eff.body.contains("BASE-DEV"));
        assert!(!eff.body.contains("BASE-ANALYST"));
    }

    #[test]
    fn resolve_ignores_insertion_order() {
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(
            PromptStack::new(sample()).resolve("analyst"),
            PromptStack::new(reversed).resolve("analyst")
        );
    }

    #[test]
    fn empty_layers_are_skipped() {
        let stack = PromptStack::new(vec![
            PromptLayer::new("shared", PromptTier::Base, "BASE"),
            PromptLayer::new("blank", PromptTier::Override, "  \n"),
        ]);
        let eff = stack.resolve("anyone");
        assert_eq!(eff.body, "BASE");
        assert_eq!(eff.layers, vec!["shared"]);
    }

    #[test]
    fn load_reads_tree_and_scopes_by_stem() {
        let dir = TempDir::new().unwrap();
        let prompts = paths::prompts_dir(dir.path());
        std::fs::create_dir_all(prompts.join("base")).unwrap();
        std::fs::create_dir_all(prompts.join("extensions/security")).unwrap();
        std::fs::create_dir_all(prompts.join("overrides")).unwrap();
        std::fs::write(prompts.join("base/shared.md"), "shared base").unwrap();
        std::fs::write(prompts.join("base/reviewer.md"), "reviewer base").unwrap();
        std::fs::write(prompts.join("base/notes.txt"), "ignored").unwrap();
        std::fs::write(prompts.join("extensions/security/_all.md"), "security ext").unwrap();
        std::fs::write(prompts.join("overrides/reviewer.md"), "reviewer override").unwrap();

        let stack = PromptStack::load(dir.path()).unwrap();
        assert_eq!(stack.layers().len(), 4);

        let reviewer = stack.resolve("reviewer");
        assert_eq!(
            reviewer.body,
            "shared base\n\nreviewer base\n\nsecurity ext\n\nreviewer override"
        );
        let analyst = stack.resolve("analyst");
        assert_eq!(analyst.body, "shared base\n\nsecurity ext");
    }

    #[test]
    fn load_without_prompts_is_empty() {
        let dir = TempDir::new().unwrap();
        let stack = PromptStack::load(dir.path()).unwrap();
        assert!(stack.resolve("analyst").body.is_empty());
    }

    #[test]
    fn install_defaults_is_idempotent() {
        let dir = TempDir::new().unwrap();
        assert_eq!(install_defaults(dir.path(), ["analyst", "planner"]).unwrap(), 3);
        assert_eq!(install_defaults(dir.path(), ["analyst", "planner"]).unwrap(), 0);
        let eff = PromptStack::load(dir.path()).unwrap().resolve("planner");
        assert!(eff.body.contains("Your role: planner."));
    }
}
