use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use docrag::config::{self, Settings};
use docrag::embedder::default_embedder;
use docrag::{EmbedderAdapter, IndexStore, Pipeline, QuestionRecommender};

#[derive(Parser)]
#[command(name = "docrag")]
#[command(version = "0.1")]
#[command(about = "Ask questions about a document using only its own text", long_about = None)]
struct Cli {
    /// Bundle path, overriding DOCRAG_INDEX_PATH
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index a plain-text document (stdin when no file is given)
    Ingest { file: Option<PathBuf> },
    /// Retrieve the chunks closest to a question
    Ask {
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// List the chunks of the stored bundle
    Chunks,
    /// Suggest similar questions from a question bank (one per line)
    Recommend {
        #[arg(long)]
        questions: PathBuf,
        input: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    Config,
}

fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
    let embedder = EmbedderAdapter::new(default_embedder(settings)?);
    let store = IndexStore::new(&settings.index_path)?;
    Ok(Pipeline::new(
        embedder,
        store,
        settings.chunking(),
        settings.top_k,
    ))
}

fn ingest_command(settings: &Settings, file: Option<PathBuf>) -> Result<()> {
    let text = match file {
        Some(path) => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read document '{}'", path.display()))?,
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read document from stdin")?;
            text
        }
    };

    let pipeline = build_pipeline(settings)?;
    let summary = pipeline
        .process_document(&text)
        .context("Failed to process document")?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn ask_command(settings: &Settings, question: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = top_k.unwrap_or(settings.top_k);
    let pipeline = build_pipeline(settings)?;
    let retrieval = pipeline
        .answer_query_with(question, top_k)
        .context("Failed to retrieve chunks")?;
    let bundle = pipeline.bundle()?;

    let output = serde_json::json!({
        "question": question,
        "bundle_chunk_count": bundle.chunks.len(),
        "generation": bundle.generation_hex(),
        "results": retrieval.hits,
        "actual_results_count": retrieval.len(),
        "requested_results_count": top_k,
    });

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn chunks_command(settings: &Settings) -> Result<()> {
    let store = IndexStore::new(&settings.index_path)?;
    let bundle = store.load()?;
    for (position, text) in bundle.chunks.iter().enumerate() {
        println!(
            "{}",
            serde_json::json!({ "position": position, "text": text })
        );
    }
    Ok(())
}

fn recommend_command(
    settings: &Settings,
    questions: &Path,
    input: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let bank = fs::read_to_string(questions)
        .with_context(|| format!("Failed to read question bank '{}'", questions.display()))?;
    let embedder = EmbedderAdapter::new(default_embedder(settings)?);
    let recommender = QuestionRecommender::from_lines(embedder, &bank)?;
    let top_k = top_k.unwrap_or(settings.recommend_top_k);
    let suggestions = recommender.recommend(input, top_k)?;

    let output = serde_json::json!({
        "input": input,
        "question_bank_size": recommender.len(),
        "suggestions": suggestions,
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn config_command(settings: &Settings) -> Result<()> {
    settings.print_config();
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let mut settings = Settings::new()?;
    if let Some(index) = args.index {
        settings.index_path = index;
    }
    config::init_logging(settings.verbose);
    log::debug!("Using bundle at {}", settings.index_path.display());

    match args.command {
        Commands::Ingest { file } => ingest_command(&settings, file)?,
        Commands::Ask { question, top_k } => ask_command(&settings, &question, top_k)?,
        Commands::Chunks => chunks_command(&settings)?,
        Commands::Recommend {
            questions,
            input,
            top_k,
        } => recommend_command(&settings, &questions, &input, top_k)?,
        Commands::Config => config_command(&settings)?,
    }
    Ok(())
}
