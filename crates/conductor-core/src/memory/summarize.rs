/// Two-level reducer used by compression: each chunk is summarised on its
/// own, then the chunk summaries are merged in order.
///
/// Implementations must be deterministic for compression to be repeatable.
pub trait Summarizer: Send + Sync {
    fn summarize_chunk(&self, items: &[String]) -> String;
    fn merge(&self, summaries: &[String]) -> String;
}

/// Keeps the head of every item and joins them. No external calls.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    pub max_item_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self { max_item_chars: 160 }
    }
}

impl ExtractiveSummarizer {
    fn head(&self, text: &str) -> String {
        let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
        let mut out: String = first_line.chars().take(self.max_item_chars).collect();
        if first_line.chars().count() > self.max_item_chars || text.trim().lines().count() > 1 {
            out.push_str(" ...");
        }
        out
    }
}

impl Summarizer for ExtractiveSummarizer {
    fn summarize_chunk(&self, items: &[String]) -> String {
        items
            .iter()
            .map(|i| self.head(i))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn merge(&self, summaries: &[String]) -> String {
        summaries
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {s}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with
/// `" ..."` when there is room for it.
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars < 4 {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - 4).collect();
    out.push_str(" ...");
    out
}
