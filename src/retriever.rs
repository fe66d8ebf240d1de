use serde::Serialize;

use crate::config::Number;
use crate::embedder::EmbedderAdapter;
use crate::error::{Result, RetrievalError};
use crate::index::FlatIndex;

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub position: usize,
    pub distance: Number,
    pub text: String,
}

/// Chunks relevant to one query, nearest first. May be empty: "no relevant
/// context" is a valid answer, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub hits: Vec<RetrievedChunk>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn positions(&self) -> Vec<usize> {
        self.hits.iter().map(|h| h.position).collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.text.as_str()).collect()
    }

    /// The `(chunk texts, positions)` pair, both in distance order.
    pub fn into_parts(self) -> (Vec<String>, Vec<usize>) {
        self.hits
            .into_iter()
            .map(|h| (h.text, h.position))
            .unzip()
    }
}

/// Searches `index` and maps each hit back to its chunk. Hits whose position
/// falls outside `chunks` are dropped, so a stale bundle yields fewer results
/// instead of a failed query.
pub fn retrieve(
    index: &FlatIndex,
    chunks: &[String],
    query_vector: &[Number],
    top_k: usize,
) -> Result<Retrieval> {
    let neighbors = index.search(query_vector, top_k)?;

    let mut hits = Vec::with_capacity(neighbors.len());
    for neighbor in neighbors {
        match chunks.get(neighbor.position) {
            Some(text) => hits.push(RetrievedChunk {
                position: neighbor.position,
                distance: neighbor.distance,
                text: text.clone(),
            }),
            None => log::warn!(
                "Skipping index position {} beyond {} chunks",
                neighbor.position,
                chunks.len()
            ),
        }
    }

    log::debug!("Retrieved {} chunks (top_k {})", hits.len(), top_k);
    Ok(Retrieval { hits })
}

/// Turns a question into chunks: validates it, embeds it, then retrieves.
#[derive(Clone)]
pub struct Retriever {
    embedder: EmbedderAdapter,
}

impl Retriever {
    pub fn new(embedder: EmbedderAdapter) -> Self {
        Self { embedder }
    }

    pub fn retrieve_text(
        &self,
        index: &FlatIndex,
        chunks: &[String],
        question: &str,
        top_k: usize,
    ) -> Result<Retrieval> {
        ensure_question(question)?;
        let query_vector = self.embedder.embed_one(question)?;
        retrieve(index, chunks, &query_vector, top_k)
    }
}

pub(crate) fn ensure_question(question: &str) -> Result<()> {
    if question.trim().is_empty() {
        return Err(RetrievalError::InvalidArgument(
            "query is empty, please enter a question".into(),
        ));
    }
    Ok(())
}
