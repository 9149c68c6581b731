//! intent-rag command line
//!
//! Run with: cargo run -p intent-rag -- <command>

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intent_rag::classifier::{dataset, IntentClassifier};
use intent_rag::config::RagConfig;
use intent_rag::embeddings::{CrossEncoderReranker, OnnxEmbedder, Reranker, TextEmbedder};
use intent_rag::ingestion;
use intent_rag::routing::open_engine;
use intent_rag::server::RagServer;
use intent_rag::types::Intent;

/// Intent-routed retrieval and question answering
#[derive(Parser)]
#[command(name = "intent-rag")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// TOML configuration file; defaults plus environment otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load a directory of pre-chunked .jsonl files into an intent's knowledge base
    Index {
        /// Target intent (campus, fitness, paper, psychology, other)
        intent: Intent,
        /// Corpus directory
        dir: PathBuf,
        /// Discard the existing collection first
        #[arg(long)]
        reset: bool,
    },
    /// Train the intent classifier from labeled JSONL and persist it
    Train {
        /// `{text, intent}` lines
        data: PathBuf,
    },
    /// Interactive retrieval against an intent's knowledge base
    Search {
        intent: Intent,
        /// Coarse candidates
        #[arg(long)]
        top_k: Option<usize>,
        /// Results after rerank
        #[arg(long)]
        final_k: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intent_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => RagConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RagConfig::from_env(),
    };
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            runtime.block_on(serve(config))
        }
        Commands::Index { intent, dir, reset } => {
            let embedder = runtime.block_on(load_embedder(&config))?;
            index(&config, intent, &dir, reset, embedder)
        }
        Commands::Train { data } => {
            let embedder = runtime.block_on(load_embedder(&config))?;
            train(&config, &data, embedder)
        }
        Commands::Search {
            intent,
            top_k,
            final_k,
        } => {
            let embedder = runtime.block_on(load_embedder(&config))?;
            let reranker = Arc::new(CrossEncoderReranker::new(&config.reranker));
            runtime.block_on(reranker.prefetch())?;
            search(&config, intent, embedder, reranker, top_k, final_k)
        }
    }
}

async fn serve(config: RagConfig) -> anyhow::Result<()> {
    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                    Intent RAG Service                     ║
║        Intent-routed answers over topic knowledge         ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    tracing::info!("Configuration loaded");
    tracing::info!("  - Embedding model: {}", config.embeddings.model_repo);
    tracing::info!("  - Reranker model: {}", config.reranker.model_repo);
    tracing::info!("  - Index directory: {}", config.retrieval.index_dir.display());
    tracing::info!("  - Confidence threshold: {}", config.classifier.confidence_threshold);

    let server = RagServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /intent             - Classify a question");
    println!("  POST /query              - Streamed answer (general agent)");
    println!("  POST /query/simple       - Streamed plain text");
    println!("  POST /query_with_intent  - Intent-routed answer");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;
    Ok(())
}

async fn load_embedder(config: &RagConfig) -> anyhow::Result<Arc<dyn TextEmbedder>> {
    let embedder = OnnxEmbedder::new(&config.embeddings)?;
    embedder.prefetch().await?;
    Ok(Arc::new(embedder))
}

fn bar(len: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let template = format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} {{msg}}",
        unit
    );
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

fn index(
    config: &RagConfig,
    intent: Intent,
    dir: &std::path::Path,
    reset: bool,
    embedder: Arc<dyn TextEmbedder>,
) -> anyhow::Result<()> {
    let reranker = Arc::new(CrossEncoderReranker::new(&config.reranker));
    let engine = open_engine(config, intent, embedder, reranker)?;
    let files = ingestion::corpus_files(dir)?;

    println!(
        "Indexing {} files from {} into '{}'",
        files.len(),
        dir.display(),
        engine.index().collection()
    );

    let pb = bar(files.len() as u64, "files");
    let report = ingestion::bulk_load_with(&engine, dir, reset, |path, outcome| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match outcome {
            Ok(added) => pb.set_message(format!("{} (+{})", name, added)),
            Err(_) => pb.set_message(format!("{} (skipped)", name)),
        }
        pb.inc(1);
    })?;
    pb.finish_with_message("done");

    println!(
        "\nLoaded {}/{} files, {} chunks added, {} chunks in collection",
        report.files_loaded,
        report.files_seen,
        report.chunks_added,
        engine.index().count()
    );
    for failure in &report.failures {
        println!("  failed: {} ({})", failure.path.display(), failure.error);
    }
    Ok(())
}

fn train(config: &RagConfig, data: &std::path::Path, embedder: Arc<dyn TextEmbedder>) -> anyhow::Result<()> {
    let examples = dataset::load_labeled(data)?;
    println!("Training on {} labeled examples from {}", examples.len(), data.display());

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Embedding examples and fitting the classifier...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let classifier = IntentClassifier::new(embedder, config.classifier.clone());
    let start = Instant::now();
    let metrics = classifier.train_examples(&examples);
    spinner.finish_and_clear();
    let metrics = metrics?;

    println!("Trained in {:.1}s", start.elapsed().as_secs_f32());
    println!("  train accuracy:      {:.3}", metrics.train_accuracy);
    if let Some(val) = metrics.validation_accuracy {
        println!("  validation accuracy: {:.3}", val);
    }
    if !metrics.cross_val_scores.is_empty() {
        let scores: Vec<String> = metrics.cross_val_scores.iter().map(|s| format!("{:.3}", s)).collect();
        println!("  cross-validation:    [{}]", scores.join(", "));
    }
    if let Some(summary) = classifier.summary() {
        println!("\n{}", serde_json::to_string_pretty(&summary)?);
    }
    println!("\nSaved to {}", config.classifier.model_path.display());
    Ok(())
}

fn search(
    config: &RagConfig,
    intent: Intent,
    embedder: Arc<dyn TextEmbedder>,
    reranker: Arc<dyn Reranker>,
    top_k: Option<usize>,
    final_k: Option<usize>,
) -> anyhow::Result<()> {
    let engine = open_engine(config, intent, embedder, reranker)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let final_k = final_k.unwrap_or(config.retrieval.final_k);

    println!(
        "Searching '{}' ({} chunks). Enter a question, or 'exit' to quit.",
        engine.index().collection(),
        engine.index().count()
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("\n> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }

        let start = Instant::now();
        match engine.search(query, top_k, final_k) {
            Ok(chunks) if chunks.is_empty() => println!("No results."),
            Ok(chunks) => {
                for (rank, chunk) in chunks.iter().enumerate() {
                    let score = chunk
                        .score
                        .map(|s| format!("score {:.4}", s))
                        .unwrap_or_else(|| "no rerank".to_string());
                    println!(
                        "\n[{}] {} (distance {:.4}, {})\n{}",
                        rank + 1,
                        chunk.id,
                        chunk.distance,
                        score,
                        chunk.text
                    );
                }
            }
            Err(e) => println!("Search failed: {}", e),
        }
        println!("\n({:.0} ms)", start.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(())
}
