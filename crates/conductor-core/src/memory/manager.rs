use super::cold::ColdIndex;
use super::fragment::{Fragment, HotEntry, Origin, WarmRef};
use super::summarize::{clip, ExtractiveSummarizer, Summarizer};
use super::warm::{warm_id, WarmEntry, WarmStore};
use crate::config::{HotMeasure, MemoryConfig};
use crate::error::{ConductorError, Result};
use crate::io::{append_line_synced, read_lines};
use crate::paths;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Events of the Hot mirror journal. Replaying them in order rebuilds Hot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum HotEvent {
    Push { fragment: Fragment },
    Compacted { warm: WarmRef, removed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallSource {
    Warm,
    Cold,
}

/// One retrieval hit: a Warm summary and where it was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recall {
    pub warm_id: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub summary: String,
    pub source: RecallSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Owns the four memory tiers of one unit of work.
///
/// - Hot: in-process window, mirrored to `hot.jsonl`.
/// - Warm: summary documents under `warm/`.
/// - Cold: BM25 index over Warm, rebuilt on open.
/// - Frozen: `frozen.jsonl`, every fragment ever appended, never rewritten.
///
/// One manager per unit of work; callers serialise access to it.
pub struct MemoryManager {
    dir: PathBuf,
    config: MemoryConfig,
    summarizer: Box<dyn Summarizer>,
    hot: Vec<HotEntry>,
    warm: BTreeMap<String, WarmEntry>,
    warm_store: WarmStore,
    cold: ColdIndex,
    next_seq: u64,
    /// Hot size right after the latest compaction, until Hot grows past it.
    compacted_at: Option<usize>,
}

impl MemoryManager {
    /// Open (or create) the memory directory of a unit of work.
    pub fn open_unit(root: &Path, unit: &str, config: &MemoryConfig) -> Result<Self> {
        Self::open(&paths::memory_dir(root, unit), config)
    }

    pub fn open(dir: &Path, config: &MemoryConfig) -> Result<Self> {
        crate::io::ensure_dir(dir)?;
        let warm_store = WarmStore::new(dir.join(paths::WARM_DIR));
        let warm_entries = warm_store.load_all()?;
        let cold = ColdIndex::build(&warm_entries)?;
        let warm = warm_entries
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let frozen = read_frozen(&dir.join(paths::FROZEN_LOG))?;
        let next_seq = frozen.last().map(|f| f.seq + 1).unwrap_or(1);
        let replay = replay_hot(&dir.join(paths::HOT_JOURNAL))?;

        let mut mem = Self {
            dir: dir.to_path_buf(),
            config: config.clone(),
            summarizer: Box::new(ExtractiveSummarizer::default()),
            hot: replay.hot,
            warm,
            warm_store,
            cold,
            next_seq,
            compacted_at: None,
        };
        let adopted = mem.adopt_orphans(&replay.referenced)?;
        if replay.ends_compacted || adopted {
            mem.compacted_at = Some(mem.hot_size());
        }
        debug!(dir = %dir.display(), hot = mem.hot.len(), next_seq, "memory opened");
        Ok(mem)
    }

    /// A Warm document no journal event refers to was written by a
    /// compaction that never reached the journal. If it covers the head of
    /// Hot exactly, finish that compaction instead of summarising the span
    /// again under a new id.
    fn adopt_orphans(&mut self, referenced: &BTreeSet<String>) -> Result<bool> {
        let orphans: Vec<(String, u64, u64)> = self
            .warm
            .values()
            .filter(|w| !referenced.contains(&w.id))
            .map(|w| (w.id.clone(), w.first_seq, w.last_seq))
            .collect();

        let mut adopted = false;
        for (id, first_seq, last_seq) in orphans {
            match head_covering(&self.hot, first_seq, last_seq) {
                Some(removed) => {
                    let reference = WarmRef {
                        warm_id: id.clone(),
                        first_seq,
                        last_seq,
                    };
                    self.commit_compaction(reference, removed)?;
                    info!(warm_id = %id, removed, "adopted unjournaled compaction");
                    adopted = true;
                }
                None => warn!(warm_id = %id, "warm entry matches no part of hot"),
            }
        }
        Ok(adopted)
    }

    /// Journal a compaction, then apply it to Hot.
    fn commit_compaction(&mut self, reference: WarmRef, removed: usize) -> Result<()> {
        let event = HotEvent::Compacted {
            warm: reference.clone(),
            removed,
        };
        append_line_synced(&self.journal_path(), &serde_json::to_string(&event)?)?;
        self.hot.drain(..removed);
        self.hot.insert(0, HotEntry::WarmRef(reference));
        Ok(())
    }

    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    fn frozen_path(&self) -> PathBuf {
        self.dir.join(paths::FROZEN_LOG)
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(paths::HOT_JOURNAL)
    }

    // -----------------------------------------------------------------------
    // append
    // -----------------------------------------------------------------------

    /// Record a fragment. Frozen is written and synced first, then the Hot
    /// journal, then Hot itself.
    pub fn append(&mut self, origin: Origin, payload: impl Into<String>) -> Result<Fragment> {
        let fragment = Fragment {
            seq: self.next_seq,
            timestamp: Utc::now(),
            origin,
            payload: payload.into(),
        };
        append_line_synced(&self.frozen_path(), &serde_json::to_string(&fragment)?)?;
        self.next_seq += 1;

        let event = HotEvent::Push {
            fragment: fragment.clone(),
        };
        append_line_synced(&self.journal_path(), &serde_json::to_string(&event)?)?;
        self.hot.push(HotEntry::Fragment(fragment.clone()));
        if self.compacted_at.is_some_and(|at| self.hot_size() > at) {
            self.compacted_at = None;
        }
        Ok(fragment)
    }

    // -----------------------------------------------------------------------
    // Pressure
    // -----------------------------------------------------------------------

    /// Size of Hot in the configured measure.
    pub fn hot_size(&self) -> usize {
        match self.config.measure {
            HotMeasure::Entries => self.hot.len(),
            HotMeasure::Tokens => self.hot.iter().map(|e| estimate_tokens(&self.render(e))).sum(),
        }
    }

    pub fn capacity_pressure(&self) -> bool {
        self.hot_size() as f64 > self.config.pressure_threshold * self.config.hot_ceiling as f64
    }

    // -----------------------------------------------------------------------
    // compress
    // -----------------------------------------------------------------------

    /// Tree-reduce the oldest half of Hot into one Warm entry.
    ///
    /// Returns `None` without touching any tier when Hot is not under
    /// pressure, has not grown since the last compaction, or would not
    /// shrink. Under the token measure the merged summary is clipped so its
    /// reference is smaller than the span it replaces.
    pub fn compress(&mut self) -> Result<Option<WarmEntry>> {
        if !self.capacity_pressure() {
            return Ok(None);
        }
        if self.compacted_at.is_some_and(|at| self.hot_size() <= at) {
            return Ok(None);
        }
        let half = self.hot.len() / 2;
        if half == 0 {
            return Ok(None);
        }

        let span = &self.hot[..half];
        let items: Vec<String> = span.iter().map(|e| self.render(e)).collect();
        let first_seq = span.iter().map(|e| e.seq_range().0).min().unwrap_or(0);
        let last_seq = span.iter().map(|e| e.seq_range().1).max().unwrap_or(0);

        let chunk_size = self.config.chunk_size.max(1);
        let leaves: Vec<String> = items
            .chunks(chunk_size)
            .map(|chunk| self.summarizer.summarize_chunk(chunk))
            .collect();
        let mut summary = self.summarizer.merge(&leaves);

        let reference = WarmRef {
            warm_id: warm_id(self.warm.len() + 1),
            first_seq,
            last_seq,
        };
        let header = summary_header(&reference);
        let (span_size, ref_size) = match self.config.measure {
            HotMeasure::Entries => (half, 1),
            HotMeasure::Tokens => {
                let span_tokens: usize = items.iter().map(|i| estimate_tokens(i)).sum();
                let room = span_tokens.saturating_sub(1) * 4;
                summary = clip(&summary, room.saturating_sub(header.chars().count()));
                (span_tokens, estimate_tokens(&format!("{header}{summary}")))
            }
        };
        if ref_size >= span_size {
            debug!(span_size, ref_size, "compression would not shrink hot");
            return Ok(None);
        }

        let entry = WarmEntry {
            id: reference.warm_id.clone(),
            first_seq,
            last_seq,
            created_at: Utc::now(),
            leaves,
            summary,
        };
        self.warm_store.write(&entry)?;
        self.cold.insert(&entry)?;
        self.warm.insert(entry.id.clone(), entry.clone());
        self.commit_compaction(reference, half)?;
        self.compacted_at = Some(self.hot_size());

        info!(
            warm_id = %entry.id,
            first_seq,
            last_seq,
            removed = half,
            hot = self.hot.len(),
            "memory compressed"
        );
        Ok(Some(entry))
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Search Warm (substring) and Cold (ranked). Frozen is never consulted.
    /// Cold hits come first by score, then Warm-only matches by id.
    pub fn query(&self, text: &str, limit: usize) -> Result<Vec<Recall>> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();

        for hit in self.cold.search(text, limit)? {
            if let Some(entry) = self.warm.get(&hit.warm_id) {
                if seen.insert(entry.id.clone()) {
                    out.push(recall(entry, RecallSource::Cold, Some(hit.score)));
                }
            }
        }

        let needle = text.trim().to_lowercase();
        if !needle.is_empty() {
            for entry in self.warm.values() {
                if out.len() >= limit {
                    break;
                }
                let haystack = entry.summary.to_lowercase();
                if haystack.contains(&needle) && seen.insert(entry.id.clone()) {
                    out.push(recall(entry, RecallSource::Warm, None));
                }
            }
        }

        out.truncate(limit);
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn hot(&self) -> &[HotEntry] {
        &self.hot
    }

    /// Hot rendered as context lines, Warm references expanded to their
    /// summaries.
    pub fn hot_context(&self) -> Vec<String> {
        self.hot.iter().map(|e| self.render(e)).collect()
    }

    pub fn warm_entries(&self) -> impl Iterator<Item = &WarmEntry> {
        self.warm.values()
    }

    pub fn warm(&self, id: &str) -> Option<&WarmEntry> {
        self.warm.get(id)
    }

    pub fn cold_len(&self) -> u64 {
        self.cold.len()
    }

    /// Complete ordered history, for audit and replay.
    pub fn frozen(&self) -> Result<Vec<Fragment>> {
        read_frozen(&self.frozen_path())
    }

    /// A WarmRef renders as a synthetic summary fragment.
    fn render(&self, entry: &HotEntry) -> String {
        match entry {
            HotEntry::Fragment(f) => f.render(),
            HotEntry::WarmRef(r) => {
                let summary = self
                    .warm
                    .get(&r.warm_id)
                    .map(|w| w.summary.as_str())
                    .unwrap_or("");
                format!("{}{summary}", summary_header(r))
            }
        }
    }
}

fn summary_header(r: &WarmRef) -> String {
    format!(
        "[{}] {} (seq {}-{}):\n",
        Origin::Summary,
        r.warm_id,
        r.first_seq,
        r.last_seq
    )
}

/// Length of the Hot prefix spanning exactly `first..=last`.
fn head_covering(hot: &[HotEntry], first: u64, last: u64) -> Option<usize> {
    let mut lo = u64::MAX;
    let mut hi = 0;
    for (i, entry) in hot.iter().enumerate() {
        let (a, b) = entry.seq_range();
        lo = lo.min(a);
        hi = hi.max(b);
        if lo == first && hi == last {
            return Some(i + 1);
        }
        if hi > last {
            break;
        }
    }
    None
}

struct Replay {
    hot: Vec<HotEntry>,
    /// Every Warm id a compaction event ever pointed at.
    referenced: BTreeSet<String>,
    ends_compacted: bool,
}

fn recall(entry: &WarmEntry, source: RecallSource, score: Option<f32>) -> Recall {
    Recall {
        warm_id: entry.id.clone(),
        first_seq: entry.first_seq,
        last_seq: entry.last_seq,
        summary: entry.summary.clone(),
        source,
        score,
    }
}

/// Four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn read_frozen(path: &Path) -> Result<Vec<Fragment>> {
    read_lines(path)?
        .iter()
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                ConductorError::Memory(format!("{}:{}: {e}", path.display(), i + 1))
            })
        })
        .collect()
}

fn replay_hot(path: &Path) -> Result<Replay> {
    let mut hot = Vec::new();
    let mut referenced = BTreeSet::new();
    let mut ends_compacted = false;
    for (i, line) in read_lines(path)?.iter().enumerate() {
        let event: HotEvent = serde_json::from_str(line)
            .map_err(|e| ConductorError::Memory(format!("{}:{}: {e}", path.display(), i + 1)))?;
        ends_compacted = matches!(event, HotEvent::Compacted { .. });
        match event {
            HotEvent::Push { fragment } => hot.push(HotEntry::Fragment(fragment)),
            HotEvent::Compacted { warm, removed } => {
                if removed > hot.len() {
                    return Err(ConductorError::Memory(format!(
                        "{}:{}: compaction removes {removed} of {} entries",
                        path.display(),
                        i + 1,
                        hot.len()
                    )));
                }
                hot.drain(..removed);
                referenced.insert(warm.warm_id.clone());
                hot.insert(0, HotEntry::WarmRef(warm));
            }
        }
    }
    Ok(Replay {
        hot,
        referenced,
        ends_compacted,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
