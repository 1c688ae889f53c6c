use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commonplace_common::{Config, Item, ItemStatus, JobQueue, Origin, Stage};
use commonplace_library::oracle::{LlmCanonicalSynthesizer, LlmEmbedder, LlmSamenessJudge};
use commonplace_library::store::PgStore;
use commonplace_library::{HierarchyManager, ItemStore, SimilarItems};
use commonplace_pipeline::analyst::{ExaCrawler, ExaSearcher, LlmContentAnalyst};
use commonplace_pipeline::queue::run_worker;
use commonplace_pipeline::{Orchestrator, PipelineDeps, TokioQueue};
use exa_client::ExaClient;
use llm_client::LlmClient;

#[derive(Parser)]
#[command(name = "commonplace-worker", about = "Commonplace library pipeline worker")]
struct Cli {
    /// Article URLs to ingest on startup.
    #[arg(long = "ingest")]
    ingest: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting commonplace-worker");

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));
    store.migrate().await?;
    tracing::info!("Connected to database");

    let llm = || {
        LlmClient::new(
            &config.openrouter_api_key,
            &config.chat_model,
            &config.embedding_model,
        )
    };
    let embedder = Arc::new(LlmEmbedder::new(llm()));
    let judge = Arc::new(LlmSamenessJudge::new(llm()));
    let synthesizer = Arc::new(LlmCanonicalSynthesizer::new(llm()));
    let analyst = Arc::new(LlmContentAnalyst::new(llm()));
    let searcher = Arc::new(ExaSearcher::new(ExaClient::new(&config.exa_api_key)));
    let crawler = Arc::new(ExaCrawler::new(ExaClient::new(&config.exa_api_key)));

    let (queue, rx) = TokioQueue::channel();
    let queue = Arc::new(queue);

    let hierarchy = Arc::new(HierarchyManager::new(
        store.clone(),
        store.clone(),
        judge,
        synthesizer,
        embedder.clone(),
        queue.clone(),
    ));
    let related = Arc::new(SimilarItems::new(store.clone()));

    let deps = Arc::new(PipelineDeps {
        items: store.clone(),
        searches: store.clone(),
        embedder,
        analyst,
        web: searcher,
        crawler,
        queue: queue.clone(),
        hierarchy,
        related,
    });
    let orchestrator = Arc::new(Orchestrator::new(deps));

    for url in cli.ingest {
        let article = match store.get_by_url(&url).await? {
            Some(existing) => existing,
            None => {
                ItemStore::insert(&*store, Item::new_article(url.clone(), None, Origin::Manual))
                    .await?
            }
        };
        if article.status == ItemStatus::Pending {
            queue.enqueue(Stage::IngestArticle, article.id, None).await?;
            tracing::info!(%url, id = %article.id, "Queued article for ingestion");
        }
    }

    tokio::select! {
        _ = run_worker(orchestrator, queue.clone(), rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
