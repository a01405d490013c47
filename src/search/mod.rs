//! Full-text search index over the catalog.
//!
//! A Tantivy index holding the searchable projection of every video. The
//! database is the system of record; this index is derived state and can be
//! rebuilt from it at any time.

pub mod sync;

use std::path::Path;
use std::sync::Mutex;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, INDEXED, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::warn;

use crate::error::Result;
use crate::repository::SearchDoc;

/// Heap for the Tantivy writer (15 MB is the floor Tantivy accepts).
const WRITER_HEAP_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct SchemaFields {
    id: Field,
    external_id: Field,
    title: Field,
    description: Field,
    tags: Field,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let id = builder.add_u64_field("id", INDEXED | STORED);
    let external_id = builder.add_text_field("external_id", STORED);
    let title = builder.add_text_field("title", TEXT);
    let description = builder.add_text_field("description", TEXT);
    let tags = builder.add_text_field("tags", TEXT);

    let schema = builder.build();
    let fields = SchemaFields {
        id,
        external_id,
        title,
        description,
        tags,
    };
    (schema, fields)
}

/// Catalog search index.
///
/// The writer sits behind a `Mutex` because Tantivy requires `&mut self`
/// for staging while the rest of the type is shared freely.
pub struct SearchIndex {
    index: Index,
    fields: SchemaFields,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
}

impl SearchIndex {
    /// Open the index at `path`, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let (schema, fields) = build_schema();
        let index = match Index::create_in_dir(path, schema) {
            Ok(index) => index,
            Err(tantivy::TantivyError::IndexAlreadyExists) => Index::open_in_dir(path)?,
            Err(e) => return Err(e.into()),
        };
        Self::from_index(index, fields)
    }

    /// Fully in-memory index.
    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: SchemaFields) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;

        Ok(Self {
            index,
            fields,
            reader,
            writer: Mutex::new(writer),
        })
    }

    /// Stage an upsert. Call [`commit`](SearchIndex::commit) to persist.
    pub fn add_or_update(&self, doc: &SearchDoc) -> Result<()> {
        let writer = self.writer.lock().unwrap();
        writer.delete_term(Term::from_field_u64(self.fields.id, doc.id as u64));
        writer.add_document(doc!(
            self.fields.id => doc.id as u64,
            self.fields.external_id => doc.external_id.as_str(),
            self.fields.title => doc.title.as_str(),
            self.fields.description => doc.description.as_deref().unwrap_or(""),
            self.fields.tags => doc.tags.as_deref().unwrap_or(""),
        ))?;
        Ok(())
    }

    /// Stage a deletion.
    pub fn remove(&self, id: i32) {
        let writer = self.writer.lock().unwrap();
        writer.delete_term(Term::from_field_u64(self.fields.id, id as u64));
    }

    /// Remove every staged and committed document.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.delete_all_documents()?;
        Ok(())
    }

    /// Persist staged changes and refresh the reader.
    pub fn commit(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().unwrap();
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    /// Search title, description and tags. Returns the matching catalog
    /// ids for the requested page plus the total hit count.
    pub fn search(&self, query: &str, limit: usize, offset: usize) -> Result<(Vec<i32>, usize)> {
        let searcher = self.reader.searcher();

        let mut parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.title, self.fields.description, self.fields.tags],
        );
        parser.set_field_boost(self.fields.title, 2.0);

        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            warn!(query, ?errors, "query partially parsed");
        }

        let (top_docs, total) = searcher.search(
            &parsed,
            &(TopDocs::with_limit(limit.max(1)).and_offset(offset), Count),
        )?;

        let mut ids = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_u64()) {
                ids.push(id as i32);
            }
        }
        Ok((ids, total))
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}
