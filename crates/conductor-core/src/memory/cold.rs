use super::warm::WarmEntry;
use crate::error::{ConductorError, Result};
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, Schema, Value, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ColdHit {
    pub warm_id: String,
    pub score: f32,
}

struct Fields {
    warm_id: Field,
    summary: Field,
}

/// In-RAM BM25 index over Warm summaries. It holds nothing Warm does not,
/// so it is rebuilt from the Warm documents whenever a manager opens.
pub(crate) struct ColdIndex {
    index: Index,
    writer: IndexWriter,
    reader: IndexReader,
    fields: Fields,
}

fn search_err(e: impl ToString) -> ConductorError {
    ConductorError::Search(e.to_string())
}

impl ColdIndex {
    pub fn build(entries: &[WarmEntry]) -> Result<Self> {
        let mut builder = Schema::builder();
        let fields = Fields {
            warm_id: builder.add_text_field("warm_id", STRING | STORED),
            summary: builder.add_text_field("summary", TEXT),
        };
        let index = Index::create_in_ram(builder.build());

        // 15 MB is the smallest heap tantivy accepts for a writer thread
        let writer: IndexWriter = index
            .writer_with_num_threads(1, 15_000_000)
            .map_err(search_err)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e: tantivy::TantivyError| search_err(e))?;

        let mut cold = Self {
            index,
            writer,
            reader,
            fields,
        };
        for entry in entries {
            cold.stage(entry)?;
        }
        cold.commit()?;
        Ok(cold)
    }

    fn stage(&mut self, entry: &WarmEntry) -> Result<()> {
        // Re-indexing an id replaces the old document.
        self.writer
            .delete_term(Term::from_field_text(self.fields.warm_id, &entry.id));
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.warm_id, &entry.id);
        doc.add_text(self.fields.summary, &entry.summary);
        for leaf in &entry.leaves {
            doc.add_text(self.fields.summary, leaf);
        }
        self.writer.add_document(doc).map_err(search_err)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.writer.commit().map_err(search_err)?;
        self.reader.reload().map_err(search_err)?;
        Ok(())
    }

    pub fn insert(&mut self, entry: &WarmEntry) -> Result<()> {
        self.stage(entry)?;
        self.commit()
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Ranked hits for free text. Query syntax errors are tolerated: the
    /// parts that parse are still searched.
    pub fn search(&self, text: &str, limit: usize) -> Result<Vec<ColdHit>> {
        if text.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.summary]);
        let (query, _errors) = parser.parse_query_lenient(text);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(search_err)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(search_err)?;
            let warm_id = doc
                .get_first(self.fields.warm_id)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            hits.push(ColdHit { warm_id, score });
        }
        Ok(hits)
    }
}
