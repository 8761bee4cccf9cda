//! HTTP server binary: wires the engine's components into the axum router
//! from [`taskengine::api`]. Thin adapter only — see SPEC_FULL.md §4.M.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use taskengine::api::{build_router, AppState};
use taskengine::cache::embedding_cache::EmbeddingCache;
use taskengine::config::ConfigLoader;
use taskengine::embedding::provider::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
use taskengine::embedding::EmbeddingService;
use taskengine::evaluation::EvaluationLoop;
use taskengine::jobs::JobRegistry;
use taskengine::repository::TaskRepository;
use taskengine::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ConfigLoader::load(std::env::var("TASKENGINE_CONFIG").ok().map(std::path::PathBuf::from).as_deref())?;
    taskengine::observability::init(&cfg.logging);

    let repo = Arc::new(TaskRepository::open(&cfg.database_path)?);

    let embedding_tree = if cfg.embedding_cache.persistent {
        let db_path = std::path::Path::new(&cfg.database_path).with_extension("embeddings.sled");
        let db = sled::open(db_path)?;
        Some(db.open_tree("embeddings")?)
    } else {
        None
    };
    let embedding_cache = Arc::new(EmbeddingCache::new(
        cfg.embedding_cache.size,
        embedding_tree,
        Some(Duration::from_secs(cfg.embedding_cache.ttl_secs)),
    ));

    let provider: Arc<dyn EmbeddingProvider> = if cfg.embedding.mock {
        Arc::new(MockEmbeddingProvider::new(cfg.embedding.dimension))
    } else {
        Arc::new(HttpEmbeddingProvider::new(cfg.embedding.clone())?)
    };
    let embedding = Arc::new(EmbeddingService::new(provider, embedding_cache, cfg.embedding.clone()));

    let jobs = Arc::new(JobRegistry::new(cfg.jobs.clone()));

    let executor = taskengine::llm::build_executor(&cfg.llm)?;
    let evaluator = taskengine::llm::build_evaluator(&cfg.llm, &cfg.evaluation)?;
    let evaluation = Arc::new(EvaluationLoop::new(repo.clone(), cfg.evaluation.clone()));
    let scheduler = Arc::new(Scheduler::new(
        repo.clone(),
        executor.clone(),
        Some(evaluation.clone()),
        Some(evaluator.clone()),
        cfg.scheduler.clone(),
    ));

    let state = AppState {
        repo,
        embedding,
        jobs,
        config: Arc::new(cfg.clone()),
        scheduler,
        evaluation,
        executor,
        evaluator,
    };

    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port).parse()?;
    tracing::info!(%addr, "starting taskengine server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
