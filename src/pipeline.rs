use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::chunker::{split_with, ChunkingOptions};
use crate::embedder::EmbedderAdapter;
use crate::error::Result;
use crate::index::FlatIndex;
use crate::retriever::{ensure_question, retrieve, Retrieval};
use crate::store::{Bundle, IndexStore};

/// What an upload left on disk.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub chunk_count: usize,
    pub dimensions: usize,
    pub index_path: PathBuf,
    pub chunks_path: PathBuf,
    pub generation: String,
}

/// In-memory copy of the current bundle. `epoch` advances on every upload
/// and invalidation, so a load that started before one can tell it is stale.
#[derive(Default)]
struct CacheSlot {
    bundle: Option<Arc<Bundle>>,
    epoch: u64,
}

/// Upload and question entry points over a single persisted bundle.
///
/// Each upload replaces the previous bundle wholesale. The last bundle saved
/// or loaded is cached in memory and shared read-only between queries.
pub struct Pipeline {
    embedder: EmbedderAdapter,
    store: IndexStore,
    chunking: ChunkingOptions,
    top_k: usize,
    cached: RwLock<CacheSlot>,
}

impl Pipeline {
    pub fn new(
        embedder: EmbedderAdapter,
        store: IndexStore,
        chunking: ChunkingOptions,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            chunking,
            top_k,
            cached: RwLock::new(CacheSlot::default()),
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// chunk → embed → build → save. Any failure aborts the upload; a failed
    /// save also drops the cached bundle because the on-disk state is unknown.
    pub fn process_document(&self, text: &str) -> Result<DocumentSummary> {
        let chunks: Vec<String> = split_with(text, self.chunking)?
            .into_iter()
            .map(|chunk| chunk.text)
            .collect();
        log::info!("Processing document into {} chunks", chunks.len());

        let vectors = self.embedder.embed(&chunks)?;
        let index = FlatIndex::build(&vectors)?;

        let generation = match self.store.save(&index, &chunks) {
            Ok(generation) => generation,
            Err(err) => {
                self.set_cached(None);
                return Err(err);
            }
        };

        let bundle = Bundle {
            index,
            chunks,
            generation,
        };
        let summary = DocumentSummary {
            chunk_count: bundle.chunks.len(),
            dimensions: bundle.index.dimensions(),
            index_path: self.store.index_path().to_path_buf(),
            chunks_path: self.store.chunks_path().to_path_buf(),
            generation: bundle.generation_hex(),
        };
        self.set_cached(Some(Arc::new(bundle)));
        Ok(summary)
    }

    pub fn answer_query(&self, question: &str) -> Result<Retrieval> {
        self.answer_query_with(question, self.top_k)
    }

    /// embed question → cached or freshly loaded bundle → retrieve.
    pub fn answer_query_with(&self, question: &str, top_k: usize) -> Result<Retrieval> {
        ensure_question(question)?;
        let bundle = self.bundle()?;
        let query_vector = self.embedder.embed_one(question)?;
        retrieve(&bundle.index, &bundle.chunks, &query_vector, top_k)
    }

    /// The cached bundle, loading it from the store on first use.
    pub fn bundle(&self) -> Result<Arc<Bundle>> {
        let epoch = {
            let slot = self.cached.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bundle) = slot.bundle.as_ref() {
                return Ok(Arc::clone(bundle));
            }
            slot.epoch
        };

        let loaded = Arc::new(self.store.load()?);
        Ok(self.cache_loaded(epoch, loaded))
    }

    /// Forgets the cached bundle so the next query reads the store again.
    pub fn invalidate(&self) {
        self.set_cached(None);
    }

    /// Caches a bundle read at `epoch` unless an upload or invalidation has
    /// happened since. A bundle already in the slot wins over `loaded`.
    fn cache_loaded(&self, epoch: u64, loaded: Arc<Bundle>) -> Arc<Bundle> {
        let mut slot = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.bundle.as_ref() {
            return Arc::clone(current);
        }
        if slot.epoch == epoch {
            slot.bundle = Some(Arc::clone(&loaded));
        } else {
            log::debug!("Bundle changed while loading, not caching the stale copy");
        }
        loaded
    }

    fn set_cached(&self, bundle: Option<Arc<Bundle>>) {
        let mut slot = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        slot.bundle = bundle;
        slot.epoch = slot.epoch.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{Embedder, HashEmbedder};
    use crate::error::RetrievalError;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> Pipeline {
        Pipeline::new(
            EmbedderAdapter::new(Arc::new(HashEmbedder::new(64))),
            IndexStore::new(dir.path().join("embeddings/doc.index")).unwrap(),
            ChunkingOptions {
                chunk_size: 40,
                overlap: 10,
            },
            3,
        )
    }

    #[test]
    fn upload_then_ask() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let summary = pipeline
            .process_document(&"Rust ownership rules keep memory safe. ".repeat(6))
            .unwrap();
        assert!(summary.chunk_count > 1);
        assert_eq!(summary.dimensions, 64);
        assert!(pipeline.store().exists());

        let result = pipeline.answer_query("memory safety").unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn answers_from_disk_after_restart() {
        let dir = TempDir::new().unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let first = pipeline(&dir);
        first.process_document(text).unwrap();
        let expected = first.answer_query("gamma delta").unwrap();

        let second = pipeline(&dir);
        assert_eq!(second.answer_query("gamma delta").unwrap(), expected);
    }

    #[test]
    fn ask_without_upload_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            pipeline(&dir).answer_query("anything"),
            Err(RetrievalError::NotFound(_))
        ));
    }

    #[test]
    fn blank_question_is_invalid_even_without_bundle() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            pipeline(&dir).answer_query("  "),
            Err(RetrievalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_document_aborts_upload() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        assert!(matches!(
            pipeline.process_document(""),
            Err(RetrievalError::InvalidArgument(_))
        ));
        assert!(!pipeline.store().exists());
    }

    #[test]
    fn failed_embedding_aborts_upload() {
        struct Down;
        impl Embedder for Down {
            fn dim(&self) -> usize {
                4
            }
            fn embed_batch(&self, _: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
                anyhow::bail!("model offline")
            }
        }

        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            EmbedderAdapter::new(Arc::new(Down)),
            IndexStore::new(dir.path().join("doc.index")).unwrap(),
            ChunkingOptions::default(),
            3,
        );
        assert!(matches!(
            pipeline.process_document("some text"),
            Err(RetrievalError::EmbeddingFailure(_))
        ));
        assert!(!pipeline.store().exists());
    }

    #[test]
    fn new_upload_replaces_cached_bundle() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        pipeline.process_document(&"first document ".repeat(10)).unwrap();
        let before = pipeline.bundle().unwrap();

        pipeline.process_document("second").unwrap();
        let after = pipeline.bundle().unwrap();
        assert_ne!(before.generation, after.generation);
        assert_eq!(after.chunks, vec!["second".to_string()]);

        pipeline.invalidate();
        assert_eq!(pipeline.bundle().unwrap().generation, after.generation);
    }

    fn cache_epoch(pipeline: &Pipeline) -> u64 {
        pipeline.cached.read().unwrap().epoch
    }

    #[test]
    fn slow_load_does_not_overwrite_a_newer_upload() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        pipeline.process_document(&"old document ".repeat(10)).unwrap();
        pipeline.invalidate();

        // A query reads the old bundle, then an upload completes before it
        // gets to cache what it read.
        let epoch = cache_epoch(&pipeline);
        let old = Arc::new(pipeline.store().load().unwrap());
        pipeline.process_document("new").unwrap();

        let served = pipeline.cache_loaded(epoch, old);
        assert_eq!(served.chunks, vec!["new".to_string()]);
        assert_eq!(pipeline.bundle().unwrap().chunks, vec!["new".to_string()]);
    }

    #[test]
    fn stale_load_after_invalidation_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        pipeline.process_document(&"old document ".repeat(10)).unwrap();
        pipeline.invalidate();

        let epoch = cache_epoch(&pipeline);
        let old = Arc::new(pipeline.store().load().unwrap());
        pipeline.process_document("new").unwrap();
        pipeline.invalidate();

        let served = pipeline.cache_loaded(epoch, Arc::clone(&old));
        assert!(Arc::ptr_eq(&served, &old));
        assert_eq!(pipeline.bundle().unwrap().chunks, vec!["new".to_string()]);
    }

    #[test]
    fn racing_queries_end_on_the_latest_upload() {
        let dir = TempDir::new().unwrap();
        let pipeline = Arc::new(pipeline(&dir));

        for round in 0..20 {
            pipeline.process_document(&"old document ".repeat(50)).unwrap();
            pipeline.invalidate();

            let reader = {
                let pipeline = Arc::clone(&pipeline);
                std::thread::spawn(move || pipeline.bundle().map(|_| ()))
            };
            let text = format!("new {}", round);
            pipeline.process_document(&text).unwrap();
            reader.join().unwrap().unwrap();

            assert_eq!(pipeline.bundle().unwrap().chunks, vec![text]);
        }
    }

    #[test]
    fn failed_upload_reloads_from_disk() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        pipeline.process_document(&"first document ".repeat(10)).unwrap();
        let cached = pipeline.bundle().unwrap();

        std::fs::remove_file(pipeline.store().index_path()).unwrap();
        std::fs::create_dir(pipeline.store().index_path()).unwrap();
        std::fs::write(pipeline.store().index_path().join("occupied"), b"x").unwrap();

        assert!(matches!(
            pipeline.process_document("second document"),
            Err(RetrievalError::IoFailure { .. })
        ));
        assert!(pipeline.cached.read().unwrap().bundle.is_none());
        match pipeline.bundle() {
            Err(RetrievalError::NotFound(path)) => {
                assert_eq!(path, pipeline.store().index_path())
            }
            other => panic!("expected a reload from disk, got {:?}", other.map(|_| ())),
        }
        assert_eq!(cached.chunks.len(), cached.index.len());
    }
}
