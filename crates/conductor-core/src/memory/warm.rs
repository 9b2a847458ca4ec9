use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A durable summary of one compressed span of Hot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmEntry {
    pub id: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub created_at: DateTime<Utc>,
    /// Per-chunk summaries, oldest first.
    pub leaves: Vec<String>,
    /// Merged summary of all leaves.
    pub summary: String,
}

pub fn warm_id(n: usize) -> String {
    format!("w-{n:04}")
}

pub(crate) struct WarmStore {
    dir: PathBuf,
}

impl WarmStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }

    pub fn write(&self, entry: &WarmEntry) -> Result<()> {
        let data = serde_yaml::to_string(entry)?;
        crate::io::atomic_write(&self.path(&entry.id), data.as_bytes())
    }

    /// Every stored entry, ordered by id.
    pub fn load_all(&self) -> Result<Vec<WarmEntry>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            entries.push(read_entry(&path)?);
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}

fn read_entry(path: &Path) -> Result<WarmEntry> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ids_sort_in_creation_order() {
        assert_eq!(warm_id(1), "w-0001");
        assert!(warm_id(9) < warm_id(10));
    }

    #[test]
    fn write_then_load_all() {
        let dir = TempDir::new().unwrap();
        let store = WarmStore::new(dir.path().join("warm"));
        assert!(store.load_all().unwrap().is_empty());
        for n in [2, 1] {
            store
                .write(&WarmEntry {
                    id: warm_id(n),
                    first_seq: n as u64,
                    last_seq: n as u64,
                    created_at: Utc::now(),
                    leaves: vec![format!("leaf {n}")],
                    summary: format!("summary {n}"),
                })
                .unwrap();
        }
        let ids: Vec<_> = store.load_all().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["w-0001", "w-0002"]);
    }
}
