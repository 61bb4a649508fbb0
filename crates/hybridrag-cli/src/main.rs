//! `hybridrag` command-line tool: build, query and inspect hybrid indexes.

mod config;
mod loader;

use clap::{Parser, Subcommand, ValueEnum};
use config::HybridragConfig;
use hybridrag_core::MetadataFilter;
use hybridrag_index::{
    retrieve_context, HybridRetriever, IndexBuilder, IndexSnapshot, RetrievalResult,
};
use hybridrag_session::{FileHistory, HistoryStore, Turn, DEFAULT_WINDOW};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hybridrag", about = "Hybrid dense + BM25 document retrieval")]
struct Cli {
    /// Path to config file (defaults to ./hybridrag.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a JSON Lines document file
    Build {
        /// Input file, one {"id","text","metadata"} object per line
        input: PathBuf,
        /// Index directory (overrides config)
        #[arg(long)]
        index: Option<PathBuf>,
        /// Embedding batch size (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Query an index
    Search {
        /// Query text
        query: String,
        /// Number of results
        #[arg(short, long, default_value_t = 5)]
        k: usize,
        /// Dense weight in [0, 1] (overrides config)
        #[arg(long)]
        alpha: Option<f32>,
        /// Metadata filter as key=value, repeatable
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
        /// Which signal to rank by
        #[arg(long, value_enum, default_value_t = Mode::Hybrid)]
        mode: Mode,
        /// Print the numbered context block instead of a result list
        #[arg(long)]
        context: bool,
        /// Record the query and results in this conversation session
        #[arg(long)]
        session: Option<String>,
        /// Index directory (overrides config)
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Print index statistics
    Inspect {
        /// Index directory (overrides config)
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Manage conversation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show the latest turns of a session
    Show {
        session: String,
        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        last: usize,
    },
    /// Delete a session
    Clear { session: String },
    /// List known sessions
    List,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Hybrid,
    Dense,
    Lexical,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = HybridragConfig::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Build {
            input,
            index,
            batch_size,
        } => {
            let root = index.unwrap_or_else(|| config.index_dir.clone());
            let mut builder_config = config.builder;
            if let Some(batch_size) = batch_size {
                builder_config.batch_size = batch_size;
            }

            let documents = loader::read_jsonl(&input).await?;
            info!(input = %input.display(), documents = documents.len(), "Documents loaded");

            let builder = IndexBuilder::new(config.embedder(), builder_config, config.bm25)?;
            let snapshot = builder.build_and_persist(documents, &root).await?;
            println!(
                "Indexed {} documents into {}",
                snapshot.len(),
                root.display()
            );
        }
        Commands::Search {
            query,
            k,
            alpha,
            filters,
            mode,
            context,
            session,
            index,
        } => {
            let root = index.unwrap_or_else(|| config.index_dir.clone());
            let filters = parse_filters(&filters)?;
            let mut retriever_config = config.retriever;
            if let Some(alpha) = alpha {
                retriever_config.alpha = alpha;
            }

            let snapshot = load_snapshot(&root, &config).await?;
            let retriever = HybridRetriever::new(Arc::new(snapshot), retriever_config)?;

            let results = match mode {
                Mode::Lexical => retriever.search_lexical(&query, k, &filters)?,
                Mode::Dense | Mode::Hybrid => {
                    let embedding = config.embedder().embed(&query).await?;
                    if mode == Mode::Dense {
                        retriever.search_dense(&embedding, k, &filters)?
                    } else {
                        retriever.search(&query, &embedding, k, &filters)?
                    }
                }
            };

            let output = if context {
                retrieve_context(&results)
            } else {
                format_results(&results)
            };
            println!("{output}");

            if let Some(session) = session {
                let history = FileHistory::new(&config.history_dir).await?;
                history.append(&session, Turn::user(&query)).await?;
                history
                    .append(&session, Turn::assistant(retrieve_context(&results)))
                    .await?;
            }
        }
        Commands::Inspect { index } => {
            let root = index.unwrap_or_else(|| config.index_dir.clone());
            let snapshot = load_snapshot(&root, &config).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot.stats())?);
        }
        Commands::History { action } => {
            let history = FileHistory::new(&config.history_dir).await?;
            match action {
                HistoryAction::Show { session, last } => {
                    for turn in history.recent(&session, last).await? {
                        println!(
                            "[{}] {:?}: {}",
                            turn.timestamp.to_rfc3339(),
                            turn.role,
                            turn.content
                        );
                    }
                }
                HistoryAction::Clear { session } => {
                    history.clear(&session).await?;
                    println!("Cleared session {session}");
                }
                HistoryAction::List => {
                    for id in history.sessions().await? {
                        println!("{id}");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Load the index under `root`. BM25 parameters come from the index itself;
/// a differing `[bm25]` config section only takes effect on the next build.
async fn load_snapshot(root: &Path, config: &HybridragConfig) -> anyhow::Result<IndexSnapshot> {
    let snapshot = IndexSnapshot::load(root).await?;
    let stored = snapshot.lexical().params();
    if stored != config.bm25 {
        warn!(
            k1 = stored.k1,
            b = stored.b,
            "Index was built with different BM25 parameters than configured; using the index's"
        );
    }
    Ok(snapshot)
}

/// Parse repeated `key=value` flags. Values that read as JSON scalars
/// (numbers, booleans, null) keep that type; anything else is a string.
fn parse_filters(raw: &[String]) -> anyhow::Result<MetadataFilter> {
    let mut filters = MetadataFilter::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            anyhow::bail!("filter '{item}' must look like key=value");
        };
        let value = match serde_json::from_str::<serde_json::Value>(value) {
            Ok(v) if hybridrag_core::is_scalar(&v) && !v.is_string() => v,
            _ => serde_json::Value::String(value.to_string()),
        };
        filters.insert(key.trim().to_string(), value);
    }
    Ok(filters)
}

fn format_results(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "No results.".to_string();
    }
    let fmt_score = |s: Option<f32>| s.map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} (fused {:.3}, dense {}, bm25 {})\n   {}",
                i + 1,
                r.document_id,
                r.fused_score,
                fmt_score(r.dense_score),
                fmt_score(r.sparse_score),
                r.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters_types() {
        let filters = parse_filters(&[
            "kind=vehicle".to_string(),
            "year=2021".to_string(),
            "used=false".to_string(),
            "code=007x".to_string(),
        ])
        .unwrap();
        assert_eq!(filters["kind"], "vehicle");
        assert_eq!(filters["year"], 2021);
        assert_eq!(filters["used"], false);
        assert_eq!(filters["code"], "007x");
    }

    #[test]
    fn test_parse_filters_rejects_missing_equals() {
        assert!(parse_filters(&["novalue".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_load_snapshot_uses_stored_bm25_params() {
        use hybridrag_core::Document;
        use hybridrag_index::{Bm25Params, BuilderConfig, LocalEmbedding};

        let tmp = tempfile::tempdir().unwrap();
        let built_with = Bm25Params { k1: 0.2, b: 0.0 };
        IndexBuilder::new(
            Arc::new(LocalEmbedding::new(16)),
            BuilderConfig::default(),
            built_with,
        )
        .unwrap()
        .build_and_persist(vec![Document::new("d1", "red car")], tmp.path())
        .await
        .unwrap();

        let config = HybridragConfig::default();
        assert_ne!(config.bm25, built_with);
        let snapshot = load_snapshot(tmp.path(), &config).await.unwrap();
        assert_eq!(snapshot.lexical().params(), built_with);
    }

    #[test]
    fn test_format_results_empty() {
        assert_eq!(format_results(&[]), "No results.");
    }

    #[test]
    fn test_cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "hybridrag",
            "search",
            "red car",
            "-k",
            "3",
            "--filter",
            "kind=vehicle",
            "--mode",
            "lexical",
            "--context",
        ])
        .unwrap();
        match cli.command {
            Commands::Search {
                query,
                k,
                filters,
                mode,
                context,
                ..
            } => {
                assert_eq!(query, "red car");
                assert_eq!(k, 3);
                assert_eq!(filters, vec!["kind=vehicle"]);
                assert!(mode == Mode::Lexical);
                assert!(context);
            }
            _ => panic!("expected search command"),
        }
    }
}
