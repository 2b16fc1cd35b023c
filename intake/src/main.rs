use common::{AppConfig, init_logging};
use intake::api::{self, AppState};
use intake::dispatch::{DispatchQueue, HttpQueue, OutboxRelay, RelayConfig};
use intake::languages::{LanguageRegistry, UploadLimits};
use intake::shutdown::install_shutdown_handler;
use intake::{AssignmentCatalog, ResultCorrelator, SubmissionIntake};
use std::net::SocketAddr;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let cfg = AppConfig::global();
    let _log_guard = init_logging(&cfg);

    if let Err(e) = run(cfg).await {
        tracing::error!(error = %e, "intake daemon failed");
        eprintln!("intake: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> Result<(), BoxError> {
    let token = install_shutdown_handler();

    let db = db::connect(&cfg.database_path).await?;
    db::migrate(&db).await?;

    let catalog = AssignmentCatalog::from_json_file(&cfg.catalog_path)?;
    tracing::info!(path = %cfg.catalog_path, assignments = catalog.len(), "catalog loaded");

    let registry = LanguageRegistry::with_defaults(UploadLimits::from(&cfg));
    for assignment in catalog.iter() {
        for language in assignment.languages() {
            if !registry.contains(language) {
                tracing::warn!(
                    assignment = %assignment.slug,
                    language = %language,
                    "assignment enables a language with no handler"
                );
            }
        }
    }

    let correlator = ResultCorrelator::new(db.clone());
    if cfg.retire_removed_assignments {
        let retired = correlator.retire_removed(&catalog).await?;
        tracing::info!(retired, "startup retirement done");
    }

    let queue: Arc<dyn DispatchQueue> = Arc::new(HttpQueue::from_config(&cfg)?);
    let relay = OutboxRelay::new(db.clone(), queue, RelayConfig::from_config(&cfg));
    tracing::info!(backlog = relay.backlog().await?, "dispatch outbox");
    let relay_task = relay.clone().spawn(token.clone());

    let intake = SubmissionIntake::from_config(
        &cfg,
        db.clone(),
        Arc::new(catalog),
        Arc::new(registry),
        relay.clone(),
    );
    tracing::info!(
        artifacts = %intake.store().root().display(),
        persist_timeout = ?intake.persist_timeout(),
        "submission intake ready"
    );

    let app = api::routes(
        AppState::new(correlator)
            .with_relay(relay)
            .with_intake(intake)
            .with_max_upload_bytes(cfg.max_upload_bytes),
    );
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting {} on http://{}", cfg.project_name, addr);

    let shutdown = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    token.cancel();
    if let Err(e) = relay_task.await {
        tracing::warn!(error = %e, "outbox relay task ended abnormally");
    }
    tracing::info!("intake stopped");
    Ok(())
}
