use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Input from outside the loop: the task, a delegate's answer.
    Input,
    /// A role's rationale that led to no capability call.
    Thought,
    /// One executed step: thought, action and what came back.
    Observation,
    /// A Warm summary re-entering compression as if it were a fragment.
    Summary,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Origin::Input => "input",
            Origin::Thought => "thought",
            Origin::Observation => "observation",
            Origin::Summary => "summary",
        };
        f.write_str(s)
    }
}

/// An atomic, immutable logged unit. `seq` is assigned on append and is
/// dense and increasing within one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
    pub payload: String,
}

impl Fragment {
    /// Text used for summarisation and context rendering.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.origin, self.payload)
    }
}

/// Pointer left in Hot where a compressed span used to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmRef {
    pub warm_id: String,
    pub first_seq: u64,
    pub last_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HotEntry {
    Fragment(Fragment),
    WarmRef(WarmRef),
}

impl HotEntry {
    pub fn seq_range(&self) -> (u64, u64) {
        match self {
            HotEntry::Fragment(f) => (f.seq, f.seq),
            HotEntry::WarmRef(r) => (r.first_seq, r.last_seq),
        }
    }

    pub fn as_fragment(&self) -> Option<&Fragment> {
        match self {
            HotEntry::Fragment(f) => Some(f),
            HotEntry::WarmRef(_) => None,
        }
    }
}
