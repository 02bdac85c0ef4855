use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use ragdb_core::config::{Config, Settings};
use ragdb_core::filter::{Filters, MetadataFilter};
use ragdb_core::loader::DocumentLoader;
use ragdb_core::types::Document;
use ragdb_hybrid::{HybridEngine, JsonStatusStore, SearchMode, SearchResults, StatusStore};

#[derive(Parser)]
#[command(name = "ragdb", version, about = "Hybrid lexical + vector retrieval over local text")]
struct Cli {
    /// -v for debug logs, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration profile (defaults to $RUST_ENV, then "dev")
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index every .txt/.md file under DIR
    Ingest {
        dir: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Search both indexes and print fused results or an assembled context
    Query {
        text: String,
        #[arg(short)]
        k: Option<usize>,
        /// Index-side filter: key=value, key>=value or key<=value
        #[arg(long = "filter")]
        filters: Vec<MetadataFilter>,
        /// Filter applied after fusion
        #[arg(long = "post-filter")]
        post_filters: Vec<MetadataFilter>,
        /// Print ranked hits instead of a context bundle
        #[arg(long)]
        raw: bool,
        #[arg(long)]
        budget: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show per-document ingestion status
    Status {
        #[arg(long)]
        failed: bool,
    },
    /// Re-ingest documents under DIR whose last ingestion failed
    RetryFailed { dir: PathBuf },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Ingest { .. } => "ingest",
            Command::Query { .. } => "query",
            Command::Status { .. } => "status",
            Command::RetryFailed { .. } => "retry-failed",
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_settings(env: Option<&str>) -> anyhow::Result<Settings> {
    let config = match env {
        Some(env) => Config::for_env(env),
        None => Config::load().context("loading configuration")?,
    };
    Ok(config.settings()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let settings = load_settings(cli.env.as_deref())?;
    let span = info_span!("command", name = cli.command.name());
    run(cli.command, settings).instrument(span).await
}

async fn run(command: Command, settings: Settings) -> anyhow::Result<()> {
    match command {
        Command::Ingest { dir, limit } => {
            let docs = DocumentLoader::new().with_limit(limit).load_dir(&dir)?;
            println!("Ingesting {} documents from {}", docs.len(), dir.display());
            let engine = HybridEngine::open(&settings).await?;
            ingest_all(&engine, docs).await;
        }
        Command::Query { text, k, filters, post_filters, raw, budget, json } => {
            let engine = HybridEngine::open(&settings).await?;
            let k = k.unwrap_or(settings.retrieval.default_k);
            let filters = Filters { index: filters, post: post_filters };
            let mode = if raw {
                SearchMode::Hits
            } else {
                SearchMode::Context { token_budget: budget.unwrap_or(settings.context.token_budget) }
            };
            let out = engine.search(&text, k, &filters, mode).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }
            if out.degraded {
                eprintln!("⚠️  degraded result (lexical: {:?}, vector: {:?})", out.lexical, out.vector);
            }
            print_results(&out.results);
        }
        Command::Status { failed } => {
            let store = JsonStatusStore::open(&settings.index.status_file())?;
            let entries = if failed { store.failed().await? } else { store.list().await? };
            if entries.is_empty() {
                println!("No documents.");
            }
            for s in entries {
                print!(
                    "{:<40} {:<20} chunks={:<4} lexical_only={:<3} attempts={} {}",
                    s.doc_id,
                    s.state.to_string(),
                    s.chunk_count,
                    s.lexical_only,
                    s.attempts,
                    s.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
                match s.error {
                    Some(error) => println!("  {error}"),
                    None => println!(),
                }
            }
        }
        Command::RetryFailed { dir } => {
            let engine = HybridEngine::open(&settings).await?;
            let failed: BTreeSet<String> = engine.status().failed().await?.into_iter().map(|s| s.doc_id).collect();
            info!(failed = failed.len(), "retrying failed documents");
            if failed.is_empty() {
                println!("✅ Nothing to retry");
                return Ok(());
            }
            let docs = load_matching(&dir, &failed)?;
            let missing = failed.len() - docs.len();
            if missing > 0 {
                eprintln!("⚠️  {missing} failed document(s) not found under {}", dir.display());
            }
            ingest_all(&engine, docs).await;
        }
    }
    Ok(())
}

fn load_matching(dir: &Path, ids: &BTreeSet<String>) -> anyhow::Result<Vec<Document>> {
    let docs = DocumentLoader::new().load_dir(dir)?;
    Ok(docs.into_iter().filter(|d| ids.contains(&d.doc_id)).collect())
}

async fn ingest_all(engine: &HybridEngine, docs: Vec<Document>) {
    let pb = ProgressBar::new(docs.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
        pb.set_style(style);
    }

    let (mut committed, mut failed, mut chunks, mut lexical_only) = (0usize, 0usize, 0usize, 0usize);
    let mut results = engine.pipeline().ingest_stream(docs);
    while let Some(result) = results.next().await {
        match result {
            Ok(report) => {
                committed += 1;
                chunks += report.chunk_count();
                lexical_only += report.lexical_only.len();
                pb.set_message(report.doc_id);
            }
            Err(err) => {
                failed += 1;
                pb.println(format!("❌ {err}"));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    info!(committed, failed, chunks, lexical_only, "ingestion finished");

    println!("\n✅ Committed {committed} documents ({chunks} chunks)");
    if lexical_only > 0 {
        println!("⚠️  {lexical_only} chunks indexed without embeddings");
    }
    if failed > 0 {
        println!("❌ {failed} documents failed; run `ragdb retry-failed <dir>` to re-ingest them");
    }
}

fn print_results(results: &SearchResults) {
    match results {
        SearchResults::Hits(hits) => {
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let sources: Vec<String> = hit.contributing_sources.iter().map(ToString::to_string).collect();
                println!(
                    "{}. [{:.4}] {} #{} ({})",
                    i + 1,
                    hit.fused_score,
                    hit.chunk.doc_id,
                    hit.chunk.chunk_index,
                    sources.join("+")
                );
                let preview: String = hit.chunk.text.chars().take(200).collect();
                println!("   {}", preview.replace('\n', " "));
            }
        }
        SearchResults::Context(bundle) => {
            print!("{}", bundle.render());
            println!(
                "📊 {} chunks, {} tokens{}",
                bundle.len(),
                bundle.total_tokens,
                if bundle.truncated { " (truncated)" } else { "" }
            );
        }
    }
}
