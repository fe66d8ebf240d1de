use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::config::{EmbedderKind, Number, Settings};
use crate::error::{Result, RetrievalError};
use crate::vector_ops::normalize_vector;

/// An external text-embedding model. Implementations receive a whole batch
/// per call and return one vector per input, in input order.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<Number>>>;
}

/// Wraps a model handle and checks what comes back from it.
///
/// The handle is constructed once at startup and shared read-only; cloning
/// the adapter only bumps the reference count.
#[derive(Clone)]
pub struct EmbedderAdapter {
    model: Arc<dyn Embedder>,
}

impl EmbedderAdapter {
    pub fn new(model: Arc<dyn Embedder>) -> Self {
        Self { model }
    }

    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    /// One model call for the whole batch. Failures are not retried.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        log::debug!("Embedding batch of {} texts", texts.len());
        let vectors = self
            .model
            .embed_batch(texts)
            .map_err(|err| RetrievalError::EmbeddingFailure(err.into()))?;

        if vectors.len() != texts.len() {
            return Err(RetrievalError::InvariantViolation(format!(
                "embedding model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let dimensions = vectors[0].len();
        if let Some((position, vector)) = vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != dimensions)
        {
            return Err(RetrievalError::InvariantViolation(format!(
                "embedding {} has {} dimensions, embedding 0 has {}",
                position,
                vector.len(),
                dimensions
            )));
        }
        if dimensions != self.model.dim() {
            return Err(RetrievalError::InvariantViolation(format!(
                "embedding model declared {} dimensions but returned {}",
                self.model.dim(),
                dimensions
            )));
        }

        Ok(vectors)
    }

    pub fn embed_one(&self, text: &str) -> Result<Vec<Number>> {
        let mut vectors = self.embed(&[text.to_string()])?;
        vectors.pop().ok_or_else(|| {
            RetrievalError::InvariantViolation("embedding model returned no vector".into())
        })
    }
}

/// Deterministic offline embedder: hashes lowercase word tokens and
/// character trigrams into a fixed number of buckets, then L2-normalises.
/// Texts sharing vocabulary land close together.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<Number> {
        let mut vector = vec![0.0; self.dimensions];
        let lowered = text.to_lowercase();

        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            self.accumulate(&mut vector, b"w", token, 1.0);

            let chars: Vec<char> = token.chars().collect();
            for gram in chars.windows(3) {
                let gram: String = gram.iter().collect();
                self.accumulate(&mut vector, b"g", &gram, 0.5);
            }
        }

        normalize_vector(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [Number], namespace: &[u8], feature: &str, weight: Number) {
        let digest = Sha256::new()
            .chain_update(namespace)
            .chain_update(feature.as_bytes())
            .finalize();
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<Number>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Runs an external program per batch: a JSON array of strings goes to its
/// stdin, a JSON array of float arrays is read from its stdout.
pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
    dimensions: usize,
}

impl CommandEmbedder {
    pub fn new(command_line: &str, dimensions: usize) -> anyhow::Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("Embedding command is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            dimensions,
        })
    }
}

impl Embedder for CommandEmbedder {
    fn dim(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<Number>>> {
        let payload = serde_json::to_vec(texts)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command '{}'", self.program))?;

        // Feed stdin from another thread so a chatty child cannot fill its
        // stdout pipe while we are still writing.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to open stdin of embedding command"))?;
        let writer = std::thread::spawn(move || stdin.write_all(&payload));

        let output = child
            .wait_with_output()
            .context("Failed to read embedding command output")?;
        let written = writer
            .join()
            .map_err(|_| anyhow!("stdin writer thread panicked"))?;

        if !output.status.success() {
            anyhow::bail!(
                "Embedding command exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        written.context("Failed to write texts to embedding command")?;

        let vectors: Vec<Vec<Number>> = serde_json::from_slice(&output.stdout)
            .context("Embedding command did not print a JSON array of vectors")?;
        Ok(vectors)
    }
}

/// Builds the model handle named by the settings.
pub fn default_embedder(settings: &Settings) -> anyhow::Result<Arc<dyn Embedder>> {
    match settings.embedder {
        EmbedderKind::Hash => {
            log::debug!("Using hash embedder with {} dimensions", settings.dimensions);
            Ok(Arc::new(HashEmbedder::new(settings.dimensions)))
        }
        EmbedderKind::Command => {
            let command = settings
                .embed_command
                .as_deref()
                .ok_or_else(|| anyhow!("DOCRAG_EMBED_COMMAND is not set"))?;
            log::debug!("Using embedding command '{}'", command);
            Ok(Arc::new(CommandEmbedder::new(command, settings.dimensions)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_ops::squared_l2_distance_simd;

    type Reply = fn(&[String]) -> anyhow::Result<Vec<Vec<Number>>>;

    struct Scripted {
        dim: usize,
        reply: Reply,
    }

    impl Embedder for Scripted {
        fn dim(&self) -> usize {
            self.dim
        }

        fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<Number>>> {
            (self.reply)(texts)
        }
    }

    fn adapter(dim: usize, reply: Reply) -> EmbedderAdapter {
        EmbedderAdapter::new(Arc::new(Scripted { dim, reply }))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hash_embedder_is_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(64);
        let vectors = embedder
            .embed_batch(&strings(&["hello world", "hello world"]))
            .unwrap();
        assert_eq!(vectors[0].len(), 64);
        assert_eq!(vectors[0], vectors[1]);
        let norm: Number = vectors[0].iter().map(|x| x * x).sum::<Number>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn hash_embedder_places_related_text_closer() {
        let embedder = HashEmbedder::new(384);
        let v = embedder
            .embed_batch(&strings(&[
                "invoice payment terms are thirty days",
                "what are the payment terms of the invoice",
                "the volcano erupted near the village",
            ]))
            .unwrap();
        let related = squared_l2_distance_simd(&v[0], &v[1]);
        let unrelated = squared_l2_distance_simd(&v[0], &v[2]);
        assert!(related < unrelated);
    }

    #[test]
    fn adapter_preserves_order_and_length() {
        let adapter = EmbedderAdapter::new(Arc::new(HashEmbedder::new(32)));
        let texts = strings(&["one", "two", "three"]);
        let vectors = adapter.embed(&texts).unwrap();
        assert_eq!(vectors.len(), 3);
        let direct = HashEmbedder::new(32).embed_batch(&texts).unwrap();
        assert_eq!(vectors, direct);
    }

    #[test]
    fn adapter_skips_model_for_empty_batch() {
        let adapter = adapter(2, |_| anyhow::bail!("model must not be called"));
        assert!(adapter.embed(&[]).unwrap().is_empty());
    }

    #[test]
    fn model_errors_become_embedding_failures() {
        let adapter = adapter(2, |_| anyhow::bail!("connection refused"));
        let err = adapter.embed(&strings(&["a"])).unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingFailure(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn ragged_output_is_an_invariant_violation() {
        let adapter = adapter(2, |_| Ok(vec![vec![0.0, 1.0], vec![0.0]]));
        assert!(matches!(
            adapter.embed(&strings(&["a", "b"])),
            Err(RetrievalError::InvariantViolation(_))
        ));
    }

    #[test]
    fn wrong_count_or_declared_dim_is_an_invariant_violation() {
        let short = adapter(2, |_| Ok(vec![vec![0.0, 1.0]]));
        assert!(matches!(
            short.embed(&strings(&["a", "b"])),
            Err(RetrievalError::InvariantViolation(_))
        ));

        let wide = adapter(2, |texts| Ok(texts.iter().map(|_| vec![0.0; 3]).collect()));
        assert!(matches!(
            wide.embed(&strings(&["a"])),
            Err(RetrievalError::InvariantViolation(_))
        ));
    }

    #[test]
    fn embed_one_returns_single_vector() {
        let adapter = EmbedderAdapter::new(Arc::new(HashEmbedder::new(8)));
        assert_eq!(adapter.embed_one("query").unwrap().len(), 8);
    }

    #[test]
    fn command_embedder_parses_command_line() {
        let embedder = CommandEmbedder::new("python3 -m embed --model mini", 384).unwrap();
        assert_eq!(embedder.program, "python3");
        assert_eq!(embedder.args, vec!["-m", "embed", "--model", "mini"]);
        assert!(CommandEmbedder::new("   ", 384).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_embedder_reads_vectors_from_stdout() {
        let embedder = CommandEmbedder {
            program: "sh".into(),
            args: vec!["-c".into(), "cat > /dev/null; echo '[[1.0, 0.0], [0.0, 1.0]]'".into()],
            dimensions: 2,
        };
        let vectors = embedder.embed_batch(&strings(&["a", "b"])).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[cfg(unix)]
    #[test]
    fn command_embedder_reports_failed_exit() {
        let embedder = CommandEmbedder {
            program: "sh".into(),
            args: vec!["-c".into(), "cat > /dev/null; echo boom >&2; exit 3".into()],
            dimensions: 2,
        };
        let err = embedder.embed_batch(&strings(&["a"])).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
