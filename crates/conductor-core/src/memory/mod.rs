//! Tiered working memory for one unit of work.

mod cold;
mod fragment;
mod manager;
mod summarize;
mod warm;

pub use cold::ColdHit;
pub use fragment::{Fragment, HotEntry, Origin, WarmRef};
pub use manager::{estimate_tokens, MemoryManager, Recall, RecallSource};
pub use summarize::{ExtractiveSummarizer, Summarizer};
pub use warm::WarmEntry;
