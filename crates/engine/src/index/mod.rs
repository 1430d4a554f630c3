//! Read-only index adapters
//!
//! The engine consumes three lookup boundaries: a semantic vector
//! index, a keyword/term index, and a chunk store. All three are pure
//! lookups with no pipeline logic. In-memory reference implementations
//! live in `vector` and `keyword`; production deployments implement
//! the same traits against their own storage.
//!
//! Readers bind one `CorpusSnapshot` at the start of a retrieval pass.
//! The ingestion subsystem builds a replacement snapshot off to the
//! side and publishes it with an atomic pointer swap, so an in-flight
//! pass never observes a partially rebuilt index.

mod keyword;
mod vector;

pub use keyword::{tokenize, InMemoryKeywordIndex};
pub use vector::InMemoryVectorIndex;

use crate::types::{ChunkKey, ChunkRecord};
use async_trait::async_trait;
use quarry_common::errors::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Semantic vector index: `(query vector, k) -> (chunk_key, similarity)`
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Top-k nearest chunks by inner-product similarity over
    /// normalized embeddings, ordered by similarity descending.
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<(ChunkKey, f32)>>;

    /// Number of indexed chunks
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keyword/term index: `(tokenized query, k) -> (chunk_key, term_score)`
///
/// Term scores are raw and unbounded; the retriever min-max normalizes
/// them before fusion.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(&self, query_tokens: &[String], k: usize) -> Result<Vec<(ChunkKey, f32)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Chunk store boundary: `chunk_key -> record`, read-only here
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get(&self, key: ChunkKey) -> Result<Option<ChunkRecord>>;

    /// All chunks of one document, in chunk-index order. Used by the
    /// summarization path.
    async fn document_chunks(&self, document_id: Uuid) -> Result<Vec<ChunkRecord>>;
}

/// One consistent view of a corpus: both indices plus the chunk store,
/// built together by the ingestion subsystem.
pub struct CorpusSnapshot {
    pub semantic: Arc<dyn SemanticIndex>,
    pub keyword: Arc<dyn KeywordIndex>,
    pub store: Arc<dyn ChunkStore>,
}

/// Atomically swappable pointer to the current corpus snapshot.
///
/// The lock guards only the `Arc` pointer, never the indices
/// themselves; readers clone the `Arc` and release the lock
/// immediately, so old snapshots stay alive until the last in-flight
/// pass drops its handle.
pub struct SnapshotCell {
    current: RwLock<Arc<CorpusSnapshot>>,
}

impl SnapshotCell {
    pub fn new(snapshot: CorpusSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Bind the current snapshot for one retrieval pass
    pub fn current(&self) -> Arc<CorpusSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publish a rebuilt snapshot. Owned by the ingestion subsystem.
    pub fn publish(&self, snapshot: CorpusSnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }
}

/// Resolves workspace and shared corpora for the pipeline.
/// Implemented by the storage layer; an in-memory version is provided
/// for embedding and tests.
pub trait CorpusProvider: Send + Sync {
    /// The private corpus of a workspace, if it has one
    fn workspace(&self, workspace_id: Uuid) -> Option<Arc<SnapshotCell>>;

    /// The curated shared corpus, if configured
    fn shared(&self) -> Option<Arc<SnapshotCell>>;
}

/// In-memory corpus directory
#[derive(Default)]
pub struct InMemoryCorpusProvider {
    workspaces: RwLock<HashMap<Uuid, Arc<SnapshotCell>>>,
    shared: RwLock<Option<Arc<SnapshotCell>>>,
}

impl InMemoryCorpusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workspace(&self, workspace_id: Uuid, cell: Arc<SnapshotCell>) {
        self.workspaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(workspace_id, cell);
    }

    pub fn set_shared(&self, cell: Arc<SnapshotCell>) {
        *self
            .shared
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(cell);
    }
}

impl CorpusProvider for InMemoryCorpusProvider {
    fn workspace(&self, workspace_id: Uuid) -> Option<Arc<SnapshotCell>> {
        self.workspaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&workspace_id)
            .cloned()
    }

    fn shared(&self) -> Option<Arc<SnapshotCell>> {
        self.shared
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// In-memory chunk store
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: HashMap<ChunkKey, ChunkRecord>,
}

impl InMemoryChunkStore {
    pub fn new(records: Vec<ChunkRecord>) -> Self {
        let chunks = records.into_iter().map(|r| (r.key, r)).collect();
        Self { chunks }
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn get(&self, key: ChunkKey) -> Result<Option<ChunkRecord>> {
        Ok(self.chunks.get(&key).cloned())
    }

    async fn document_chunks(&self, document_id: Uuid) -> Result<Vec<ChunkRecord>> {
        let mut chunks: Vec<ChunkRecord> = self
            .chunks
            .values()
            .filter(|c| c.key.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.key.chunk_index);
        Ok(chunks)
    }
}
