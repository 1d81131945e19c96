//! # Papertrail CLI (`papertrail`)
//!
//! Answers research questions against a curated corpus of papers, citing
//! the sources each answer is grounded in.
//!
//! ## Usage
//!
//! ```bash
//! papertrail --config ./config/papertrail.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `papertrail index` | Load the persisted index, rebuilding it if stale or missing |
//! | `papertrail ask "<question>"` | Answer a question with citations |
//! | `papertrail search "<query>"` | Show the most similar chunks without generating |
//! | `papertrail sources` | List registered documents |
//! | `papertrail interactive` | Ask questions in a loop until `quit` |
//!
//! Logs go to stderr; set `RUST_LOG=papertrail=debug` for detail.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use papertrail::app::Papertrail;
use papertrail::config::load_config;
use papertrail::index::BuildOrigin;
use papertrail::state::Answer;

/// Papertrail: grounded question answering over academic papers.
#[derive(Parser)]
#[command(name = "papertrail", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/papertrail.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load or build the vector index.
    ///
    /// Reuses the persisted index when it was built from the current
    /// registry, chunking parameters and embedding model.
    Index {
        /// Ignore the persisted index and rebuild from sources.
        #[arg(long)]
        rebuild: bool,
    },

    /// Answer a question from the indexed corpus.
    Ask {
        question: String,

        /// Print the answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the chunks most similar to a query.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List registered documents in registry order.
    Sources,

    /// Ask questions from stdin until `quit`, `exit` or `q`.
    Interactive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let app = Papertrail::from_config(&config)?;

    match cli.command {
        Commands::Index { rebuild } => {
            let report = app.prepare(rebuild).await?;
            match &report.origin {
                BuildOrigin::Reused | BuildOrigin::Loaded => {
                    println!("index up to date");
                }
                BuildOrigin::Rebuilt(reason) => {
                    println!("index rebuilt ({})", reason);
                }
            }
            println!("  path:    {}", app.index().path().display());
            println!("  sources: {}", app.entries().len());
            println!("  chunks:  {}", report.chunks);
            if !report.failures.is_empty() {
                println!("  failed sources: {}", report.failures.len());
                for failure in &report.failures {
                    println!("    - {}: {}", failure.source_id, failure.cause);
                }
            }
        }
        Commands::Ask { question, json } => {
            app.prepare(false).await?;
            let answer = ask_interruptible(&app, &question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Commands::Search { query, limit } => {
            app.prepare(false).await?;
            let limit = limit.unwrap_or(app.orchestrator().top_k());
            let hits = app.search(&query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let p = &hit.chunk.provenance;
                println!(
                    "{}. [{:.3}] {} ({})",
                    i + 1,
                    hit.score,
                    p.title,
                    hit.chunk.id()
                );
                println!("    {}", snippet(&hit.chunk.text, 200));
            }
        }
        Commands::Sources => {
            let entries = app.entries();
            if entries.is_empty() {
                println!("No sources registered.");
            }
            for e in entries.iter() {
                println!("{:<24} {:<10} {}", e.id, e.source_kind, e.title);
            }
        }
        Commands::Interactive => {
            app.prepare(false).await?;
            interactive(&app).await?;
        }
    }

    Ok(())
}

/// Ask, cancelling the query on Ctrl-C.
async fn ask_interruptible(app: &Papertrail, question: &str) -> Result<Answer> {
    let (tx, rx) = watch::channel(false);
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    let result = app.ask_with_cancel(question, rx).await;
    watcher.abort();
    Ok(result?)
}

async fn interactive(app: &Papertrail) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\nquestion> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }
        match ask_interruptible(app, question).await {
            Ok(answer) => print_answer(&answer),
            Err(e) => eprintln!("error: {:#}", e),
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer.trim());
    if !answer.references.is_empty() {
        println!();
        println!("References:");
        for r in &answer.references {
            println!("  {}", r);
        }
    }
    if !answer.unverified_citations.is_empty() {
        let tags: Vec<&str> = answer.unverified_citations.iter().map(String::as_str).collect();
        println!();
        println!("Unverified citations: {}", tags.join(", "));
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat,
    }
}
