use crate::embedder::EmbedderAdapter;
use crate::error::{Result, RetrievalError};
use crate::index::FlatIndex;

pub const DEFAULT_RECOMMEND_TOP_K: usize = 5;

/// Suggests questions from a fixed question bank that sit closest to what
/// the user typed.
pub struct QuestionRecommender {
    embedder: EmbedderAdapter,
    questions: Vec<String>,
    index: FlatIndex,
}

impl QuestionRecommender {
    /// Blank entries are dropped before embedding; the remaining questions
    /// are embedded in one batch.
    pub fn new(embedder: EmbedderAdapter, questions: Vec<String>) -> Result<Self> {
        let questions: Vec<String> = questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if questions.is_empty() {
            return Err(RetrievalError::EmptyInput(
                "question bank has no questions".into(),
            ));
        }

        let vectors = embedder.embed(&questions)?;
        let index = FlatIndex::build(&vectors)?;
        log::debug!("Question bank indexed with {} questions", questions.len());

        Ok(Self {
            embedder,
            questions,
            index,
        })
    }

    /// Parses a question bank with one question per line.
    pub fn from_lines(embedder: EmbedderAdapter, bank: &str) -> Result<Self> {
        Self::new(embedder, bank.lines().map(str::to_string).collect())
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Nearest questions first. Blank input gives no suggestions.
    pub fn recommend(&self, input: &str, top_k: usize) -> Result<Vec<String>> {
        if input.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed_one(input)?;
        Ok(self
            .index
            .search(&query, top_k)?
            .into_iter()
            .filter_map(|n| self.questions.get(n.position).cloned())
            .collect())
    }
}
