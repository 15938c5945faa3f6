use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use litrag::cache::sqlite::SqliteCacheStore;
use litrag::cache::ResponseCache;
use litrag::config::Config;
use litrag::embedding::openai::OpenAIEmbeddingProvider;
use litrag::embedding::EmbeddingClient;
use litrag::logging;
use litrag::models::TextChunk;
use litrag::rerank::cohere::CohereRerankProvider;
use litrag::rerank::{RerankProvider, Reranker};
use litrag::routing::{ModelRegistry, ModelTier};
use litrag::search::{build_context, paper_ids, CachedSearch, HybridRetriever};

#[derive(Parser)]
#[command(name = "litrag", version, about = "Hybrid retrieval and response caching over paper chunks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve the most relevant chunks for a query
    Search {
        /// Query text
        query: String,
        /// JSON file holding an array of chunks
        #[arg(long)]
        chunks: PathBuf,
        /// Write chunks back here, with any newly computed embeddings
        #[arg(long)]
        out: Option<PathBuf>,
        /// Candidates per retriever
        #[arg(long)]
        top_k: Option<usize>,
        /// Final result count
        #[arg(long)]
        rerank_top_k: Option<usize>,
        #[arg(long)]
        no_bm25: bool,
        #[arg(long)]
        no_dense: bool,
        #[arg(long)]
        no_rerank: bool,
        /// Consult this user's response cache before retrieving
        #[arg(long)]
        user: Option<String>,
        /// Generated answer to cache for --user on a miss
        #[arg(long, requires = "user")]
        answer: Option<String>,
    },
    /// Pick a generation model for a query and context size
    Route {
        query: String,
        /// Resolved context length in characters
        #[arg(long, default_value_t = 0)]
        context_chars: usize,
        /// Force a tier: economy, standard, premium
        #[arg(long)]
        tier: Option<ModelTier>,
    },
    /// Response cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count, expired entries and total hits for a user
    Stats {
        #[arg(long)]
        user: String,
    },
    /// Delete a user's expired entries
    Purge {
        #[arg(long)]
        user: String,
    },
    /// Delete a user's entries that cite any of the given papers
    Invalidate {
        #[arg(long)]
        user: String,
        #[arg(long = "paper", required = true)]
        papers: Vec<String>,
    },
}

/// Build the embeddings client, or None when no key is configured.
fn create_embedding_client(config: &Config) -> Option<EmbeddingClient> {
    match OpenAIEmbeddingProvider::new(&config.embedding) {
        Ok(provider) => Some(EmbeddingClient::new(Arc::new(provider), config.embedding.batch_size)),
        Err(e) => {
            tracing::warn!(error = %e, "Embedding provider unavailable");
            None
        }
    }
}

/// Build the reranker; without a key it runs the local heuristic only.
fn create_reranker(config: &Config) -> Reranker {
    match CohereRerankProvider::new(&config.rerank) {
        Ok(provider) => Reranker::new(Some(Arc::new(provider) as Arc<dyn RerankProvider>)),
        Err(e) => {
            tracing::warn!(error = %e, "Rerank provider unavailable, using local reranking");
            Reranker::local()
        }
    }
}

fn create_registry(config: &Config) -> Result<ModelRegistry> {
    match &config.models {
        Some(models) => Ok(ModelRegistry::new(models.clone())?),
        None => Ok(ModelRegistry::default()),
    }
}

async fn open_cache(config: &Config) -> Result<ResponseCache> {
    let store = SqliteCacheStore::new(&config.cache.db_path)
        .await
        .with_context(|| format!("Failed to open cache database {}", config.cache.db_path))?;
    tracing::info!(db_path = %config.cache.db_path, "Cache store opened");
    Ok(ResponseCache::from_config(Arc::new(store), &config.cache))
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Logging before anything else can emit events
    logging::init_logging(&config);

    match cli.command {
        Commands::Search {
            query,
            chunks,
            out,
            top_k,
            rerank_top_k,
            no_bm25,
            no_dense,
            no_rerank,
            user,
            answer,
        } => {
            let raw = std::fs::read_to_string(&chunks)
                .with_context(|| format!("Failed to read {}", chunks.display()))?;
            let mut corpus: Vec<TextChunk> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of chunks", chunks.display()))?;

            let mut retrieval = config.retrieval.clone();
            if let Some(k) = top_k {
                retrieval.top_k = k;
            }
            if let Some(k) = rerank_top_k {
                retrieval.rerank_top_k = k;
            }
            retrieval.use_bm25 &= !no_bm25;
            retrieval.use_dense_retrieval &= !no_dense;
            retrieval.use_reranking &= !no_rerank;

            let embedder = if retrieval.use_dense_retrieval {
                create_embedding_client(&config)
            } else {
                None
            };
            let reranker = if retrieval.use_reranking {
                create_reranker(&config)
            } else {
                Reranker::local()
            };
            let retriever = HybridRetriever::new(embedder, reranker);

            let pb = spinner(&format!("Searching {} chunks", corpus.len()));
            let cache = match &user {
                Some(_) => Some(open_cache(&config).await?),
                None => None,
            };
            let outcome = match (&cache, &user) {
                (Some(cache), Some(user)) => {
                    retriever
                        .retrieve_cached(cache, user, &query, &mut corpus, &retrieval)
                        .await
                }
                _ => retriever
                    .retrieve(&query, &mut corpus, &retrieval)
                    .await
                    .map(CachedSearch::Miss),
            };
            pb.finish_and_clear();

            let result = match outcome {
                Ok(CachedSearch::Hit(cached)) => {
                    let output = serde_json::json!({
                        "cached": true,
                        "response": cached.response,
                        "citations": cached.citations,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    return Ok(());
                }
                Ok(CachedSearch::Miss(result)) => result,
                Err(e) if e.is_unavailable() => {
                    return Err(anyhow::Error::new(e).context("Search unavailable"));
                }
                Err(e) => return Err(e.into()),
            };

            if result.stats.degraded() {
                eprintln!("Search degraded: reranker fell back to local scoring");
            }

            if let Some(path) = out {
                std::fs::write(&path, serde_json::to_string_pretty(&corpus)?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), "Wrote chunks with embeddings");
            }

            if let (Some(cache), Some(user), Some(answer)) = (&cache, &user, &answer) {
                cache
                    .set_cached_response(user, &query, &paper_ids(&corpus), answer, &result.citations)
                    .await;
            }

            let output = serde_json::json!({
                "cached": false,
                "results": result.results,
                "citations": result.citations,
                "stats": result.stats,
                "context": build_context(&result.results),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Route {
            query,
            context_chars,
            tier,
        } => {
            let registry = create_registry(&config)?;
            let selection = registry.select_model(&query, context_chars, tier);
            println!("{}", serde_json::to_string_pretty(&selection)?);
        }

        Commands::Cache { action } => {
            let cache = open_cache(&config).await?;
            match action {
                CacheAction::Stats { user } => {
                    let stats = cache.stats(&user).await?;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                CacheAction::Purge { user } => {
                    let deleted = cache.purge_expired(&user).await?;
                    println!("Purged {} expired entries for {}.", deleted, user);
                }
                CacheAction::Invalidate { user, papers } => {
                    let deleted = cache.invalidate_paper_cache(&user, &papers).await?;
                    println!("Invalidated {} entries for {}.", deleted, user);
                }
            }
        }
    }

    Ok(())
}
