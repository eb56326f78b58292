use std::sync::Arc;

use wastewise::config::{self, WorkerConfig};
use wastewise::executor::Executor;
use wastewise::llm;
use wastewise::search;
use wastewise::skills::{
    BatchExtractorSkill, ContractAnalyzerSkill, CostOptimizerSkill, RegulatoryResearchSkill,
    SkillRegistry, WastewiseAnalyticsSkill,
};
use wastewise::store::{Database, LibSqlBackend};
use wastewise::worker::WorkerLoop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Preflight: fail with the full list of missing credentials, not just
    // the first one.
    let env_lookup = |key: &str| std::env::var(key).ok();
    let missing = config::missing_required(&env_lookup);
    if !missing.is_empty() {
        eprintln!("Error: missing required environment variables:");
        for name in &missing {
            eprintln!("  {name}");
        }
        std::process::exit(1);
    }

    let config = WorkerConfig::from_env()?.apply_args(std::env::args().skip(1))?;

    eprintln!("WasteWise worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Poll: {}s, concurrency: {}",
        config.poll_interval.as_secs(),
        config.concurrency
    );

    // ── Database ────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await.map_err(|e| {
        eprintln!("Error: failed to open database at {}: {e}", config.db_path);
        e
    })?);

    // ── Providers and skills ────────────────────────────────────────
    let llm = llm::create_provider(&config.llm);
    let search = search::create_provider(&config.search);

    let extractor = Arc::new(BatchExtractorSkill::new(llm.clone(), db.clone()));
    let regulatory = Arc::new(RegulatoryResearchSkill::new(
        llm.clone(),
        search,
        db.clone(),
        config.research_cache_days,
    ));
    let contracts = Arc::new(ContractAnalyzerSkill::new(llm));
    let optimizer = Arc::new(CostOptimizerSkill::new());
    let analytics = Arc::new(WastewiseAnalyticsSkill::new(
        extractor.clone(),
        regulatory.clone(),
        contracts.clone(),
        optimizer.clone(),
    ));

    let registry = Arc::new(
        SkillRegistry::new()
            .register(extractor)
            .register(regulatory)
            .register(contracts)
            .register(optimizer)
            .register(analytics),
    );
    tracing::info!(skills = ?registry.names(), "Skills registered");

    let executor = Arc::new(Executor::new(registry, db.clone()));

    // ── Worker loop ─────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = WorkerLoop::new(db, executor, config, shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, draining");
    let _ = shutdown_tx.send(true);
    worker_handle.await?;

    Ok(())
}
