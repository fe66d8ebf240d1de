use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;

use crate::chunker::{ChunkingOptions, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::recommender::DEFAULT_RECOMMEND_TOP_K;
use crate::retriever::DEFAULT_TOP_K;

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

pub const DEFAULT_INDEX_PATH: &str = "embeddings/document.index";
pub const DEFAULT_DIMENSIONS: usize = 384;

#[derive(Deserialize)]
pub struct DocragConfig {
    pub index_path: Option<String>,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub top_k: Option<usize>,
    pub recommend_top_k: Option<usize>,
    pub dimensions: Option<usize>,
    pub embedder: Option<String>,
    pub embed_command: Option<String>,
    pub verbose: Option<bool>,
}

impl DocragConfig {
    /// Unset keys become `None`; a value of the wrong type is an error.
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(DocragConfig {
            index_path: optional(config, "index_path")?,
            chunk_size: optional(config, "chunk_size")?,
            overlap: optional(config, "overlap")?,
            top_k: optional(config, "top_k")?,
            recommend_top_k: optional(config, "recommend_top_k")?,
            dimensions: optional(config, "dimensions")?,
            embedder: optional(config, "embedder")?,
            embed_command: optional(config, "embed_command")?,
            verbose: optional(config, "verbose")?,
        })
    }
}

fn optional<T: DeserializeOwned>(config: &Config, key: &str) -> Result<Option<T>, ConfigError> {
    match config.get(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Hash,
    Command,
}

impl EmbedderKind {
    fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(EmbedderKind::Hash),
            "command" => Ok(EmbedderKind::Command),
            other => anyhow::bail!("Unknown embedder '{}' (expected 'hash' or 'command')", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedderKind::Hash => "hash",
            EmbedderKind::Command => "command",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub index_path: PathBuf,
    pub chunk_size: usize,
    pub overlap: usize,
    pub top_k: usize,
    pub recommend_top_k: usize,
    pub dimensions: usize,
    pub embedder: EmbedderKind,
    pub embed_command: Option<String>,
    pub verbose: bool,
}

impl Settings {
    /// Layers an optional `docrag_config` file under `DOCRAG_*` environment
    /// variables.
    pub fn new() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("docrag_config").required(false))
            .add_source(Environment::with_prefix("DOCRAG"))
            .build()
            .context("Failed to read docrag configuration")?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let raw = DocragConfig::try_from(config)?;

        let chunk_size = raw.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        let overlap = raw.overlap.unwrap_or(DEFAULT_OVERLAP);
        let top_k = raw.top_k.unwrap_or(DEFAULT_TOP_K);
        let recommend_top_k = raw.recommend_top_k.unwrap_or(DEFAULT_RECOMMEND_TOP_K);
        let dimensions = raw.dimensions.unwrap_or(DEFAULT_DIMENSIONS);
        let embedder = match raw.embedder.as_deref() {
            Some(name) => EmbedderKind::parse(name)?,
            None => EmbedderKind::Hash,
        };
        let embed_command = raw.embed_command.filter(|c| !c.trim().is_empty());

        if chunk_size <= overlap {
            anyhow::bail!(
                "DOCRAG_CHUNK_SIZE ({}) must be greater than DOCRAG_OVERLAP ({}).",
                chunk_size,
                overlap
            );
        }
        if dimensions == 0 {
            anyhow::bail!("DOCRAG_DIMENSIONS must be positive.");
        }
        if top_k == 0 || recommend_top_k == 0 {
            anyhow::bail!("DOCRAG_TOP_K and DOCRAG_RECOMMEND_TOP_K must be positive.");
        }
        if embedder == EmbedderKind::Command && embed_command.is_none() {
            anyhow::bail!("DOCRAG_EMBED_COMMAND must be set when DOCRAG_EMBEDDER=command.");
        }

        Ok(Self {
            index_path: PathBuf::from(
                raw.index_path
                    .unwrap_or_else(|| DEFAULT_INDEX_PATH.to_string()),
            ),
            chunk_size,
            overlap,
            top_k,
            recommend_top_k,
            dimensions,
            embedder,
            embed_command,
            verbose: raw.verbose.unwrap_or(false),
        })
    }

    pub fn chunking(&self) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }

    pub fn print_config(&self) {
        println!("index_path={}", self.index_path.display());
        println!("chunk_size={}", self.chunk_size);
        println!("overlap={}", self.overlap);
        println!("top_k={}", self.top_k);
        println!("recommend_top_k={}", self.recommend_top_k);
        println!("dimensions={}", self.dimensions);
        println!("embedder={}", self.embedder.as_str());
        println!(
            "embed_command={}",
            self.embed_command.as_deref().unwrap_or("")
        );
        println!("verbose={}", self.verbose);
    }
}

/// Sets up `env_logger` on stderr. `verbose` lowers the default filter to
/// `debug`; an explicit `RUST_LOG` always takes precedence.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .format_timestamp(None)
    .try_init();
}
