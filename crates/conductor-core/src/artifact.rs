use crate::error::Result;
use crate::paths;
use crate::types::ArtifactKind;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Answers whether an artifact exists for a unit of work.
///
/// The phase machine only ever asks this question; where artifacts live is
/// the probe's business.
pub trait ArtifactProbe {
    fn exists(&self, unit: &str, kind: ArtifactKind) -> bool;
}

/// Artifacts stored as files under `.conductor/units/<id>/artifacts/`.
pub struct DiskArtifacts<'a> {
    root: &'a Path,
}

impl<'a> DiskArtifacts<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self { root }
    }

    pub fn path(&self, unit: &str, kind: ArtifactKind) -> PathBuf {
        paths::artifact_path(self.root, unit, kind.filename())
    }

    /// Write (or replace) an artifact's content.
    pub fn write(&self, unit: &str, kind: ArtifactKind, content: &str) -> Result<PathBuf> {
        let path = self.path(unit, kind);
        crate::io::atomic_write(&path, content.as_bytes())?;
        Ok(path)
    }

    pub fn remove(&self, unit: &str, kind: ArtifactKind) -> Result<bool> {
        let path = self.path(unit, kind);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }

    /// Presence report for every artifact kind, in declaration order.
    pub fn report(&self, unit: &str) -> Vec<ArtifactPresence> {
        ArtifactKind::all()
            .iter()
            .map(|&kind| ArtifactPresence {
                kind,
                path: self.path(unit, kind),
                present: self.exists(unit, kind),
            })
            .collect()
    }
}

impl ArtifactProbe for DiskArtifacts<'_> {
    fn exists(&self, unit: &str, kind: ArtifactKind) -> bool {
        self.path(unit, kind).is_file()
    }
}

/// A fixed set of present artifacts, independent of any unit id.
impl ArtifactProbe for BTreeSet<ArtifactKind> {
    fn exists(&self, _unit: &str, kind: ArtifactKind) -> bool {
        self.contains(&kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactPresence {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub present: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn disk_probe_sees_written_artifacts() {
        let dir = TempDir::new().unwrap();
        let disk = DiskArtifacts::new(dir.path());
        assert!(!disk.exists("checkout", ArtifactKind::Brief));

        disk.write("checkout", ArtifactKind::Brief, "# Brief").unwrap();
        assert!(disk.exists("checkout", ArtifactKind::Brief));
        assert!(!disk.exists("other", ArtifactKind::Brief));

        assert!(disk.remove("checkout", ArtifactKind::Brief).unwrap());
        assert!(!disk.exists("checkout", ArtifactKind::Brief));
        assert!(!disk.remove("checkout", ArtifactKind::Brief).unwrap());
    }

    #[test]
    fn report_lists_every_kind() {
        let dir = TempDir::new().unwrap();
        let disk = DiskArtifacts::new(dir.path());
        disk.write("u", ArtifactKind::Stories, "- story").unwrap();
        let report = disk.report("u");
        assert_eq!(report.len(), ArtifactKind::all().len());
        let present: Vec<_> = report.iter().filter(|p| p.present).map(|p| p.kind).collect();
        assert_eq!(present, vec![ArtifactKind::Stories]);
    }

    #[test]
    fn set_probe_ignores_unit() {
        let set: BTreeSet<_> = [ArtifactKind::Brief].into_iter().collect();
        assert!(set.exists("any", ArtifactKind::Brief));
        assert!(!set.exists("any", ArtifactKind::Stories));
    }
}
