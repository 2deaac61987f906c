//! CLI entry point for sift.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sift_core::{
    answer_question, app_data_dir, build_index, get_notes_root, load_config, load_config_from, load_documents,
    set_notes_root, status, Chunker, Config, Embedder, OllamaClient, Rebuilder, Retriever,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "sift: ask questions about your own notes")]
struct Cli {
    /// Use this config file instead of the one in the app data directory.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status.
    Status,
    /// Show where sift stores its config and index (app data directory).
    DataDir,
    /// Load a directory or file and list the documents found.
    Scan {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Remember PATH as the default corpus.
    SetRoot {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Chunk, embed and index a corpus (defaults to the configured root).
    Ingest {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
        /// Write the index here instead of the configured location.
        #[arg(long, value_name = "FILE")]
        index: Option<PathBuf>,
    },
    /// Show the chunks most relevant to a question.
    Search {
        question: String,
        #[arg(short, long)]
        k: Option<usize>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from the indexed corpus.
    Ask {
        question: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Rebuild the index whenever the corpus changes.
    Watch {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    config.validate()?;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("sift");
            println!("  core: {}", status());
            println!("  embedding model: {}", config.embedding.model);
            println!("  generation model: {}", config.generation.model);
            if let Some(p) = config.index_path() {
                println!("  index: {}", p.display());
            }
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => return Err("could not determine app data directory".into()),
        },
        Commands::Scan { path } => {
            let docs = load_documents(&path)?;
            println!("Found {} document(s) under {}", docs.len(), path.display());
            for d in docs {
                let p = d.text.lines().next().unwrap_or("").trim();
                let preview: String = if p.chars().count() > 60 {
                    format!("{}...", p.chars().take(60).collect::<String>())
                } else {
                    p.to_string()
                };
                println!("  {}  {}", d.source, preview);
            }
        }
        Commands::SetRoot { path } => {
            set_notes_root(&path, cli.config.as_deref())?;
            println!("Corpus root set to {}", path.display());
        }
        Commands::Ingest { path, index } => {
            let root = corpus_root(path, &config)?;
            let index_path = index_path(index, &config)?;
            let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.overlap)?;
            let embedder = embedder(&config)?;
            let built = build_index(&root, &chunker, &embedder, &index_path).await?;
            println!("Indexed {} chunk(s) into {}", built.len(), index_path.display());
        }
        Commands::Search { question, k, json } => {
            let retriever = retriever(&config)?;
            let hits = retriever
                .answer_context(&question, k.unwrap_or(config.generation.top_k))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                for h in hits {
                    println!("[{:.3}] {} #{}", h.score, h.source, h.sequence_index);
                    println!("    {}", h.text.replace('\n', "\n    "));
                }
            }
        }
        Commands::Ask { question, k } => {
            let retriever = retriever(&config)?;
            let generator = OllamaClient::from_config(&config.embedding, &config.generation)?;
            let answer = answer_question(
                &retriever,
                &generator,
                &question,
                k.unwrap_or(config.generation.top_k),
            )
            .await?;
            println!("{}", answer.text.trim());
            println!();
            for c in &answer.context {
                println!("  source: {} #{} ({:.3})", c.source, c.sequence_index, c.score);
            }
        }
        Commands::Watch { path } => {
            let root = corpus_root(path, &config)?;
            let index_path = index_path(None, &config)?;
            let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.overlap)?;
            let embedder = embedder(&config)?;

            let rebuilder = Rebuilder::new(root.clone(), chunker, embedder, index_path);
            let built = rebuilder.rebuild().await?;
            println!(
                "Indexed {} chunk(s); watching {} (Ctrl+C to stop)",
                built.len(),
                root.display()
            );
            rebuilder.watch().await?;
        }
    }
    Ok(())
}

fn corpus_root(path: Option<PathBuf>, config: &Config) -> Result<PathBuf, Box<dyn std::error::Error>> {
    path.or_else(|| get_notes_root(config))
        .ok_or_else(|| "no corpus given and no root configured (see `sift set-root`)".into())
}

fn index_path(explicit: Option<PathBuf>, config: &Config) -> Result<PathBuf, Box<dyn std::error::Error>> {
    explicit
        .or_else(|| config.index_path())
        .ok_or_else(|| "could not determine index location".into())
}

fn embedder(config: &Config) -> Result<Embedder, Box<dyn std::error::Error>> {
    let client = OllamaClient::from_config(&config.embedding, &config.generation)?;
    Ok(Embedder::new(Arc::new(client), config.embedding.embed_settings()))
}

/// Loads the index once; a failed load ends the process.
fn retriever(config: &Config) -> Result<Retriever, Box<dyn std::error::Error>> {
    let path = index_path(None, config)?;
    if !path.exists() {
        return Err(format!("no index at {} (run `sift ingest` first)", path.display()).into());
    }
    let mut retriever = Retriever::new(embedder(config)?);
    retriever.load(&path)?;
    Ok(retriever)
}
