use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::{info, warn};

use security_master::app;
use security_master::cli::{Cli, Commands};
use security_master::config::AppConfig;
use security_master::db::{InMemorySecurityRepository, PgSecurityRepository, SecurityRepository};
use security_master::external::{ObjectStore, ProwessClient, S3ObjectStore};
use security_master::jobs::security_upsert_job::{self, RunStatus, UpsertContext};
use security_master::logging::{init_logging, LoggingConfig};
use security_master::services::abbreviation_service::AbbreviationService;
use security_master::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(LoggingConfig::from_env())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let config = AppConfig::from_env().context("invalid configuration")?;

    match cli.command() {
        Commands::Serve => serve(config).await,
        Commands::Upsert { dry_run } => upsert(config, dry_run).await,
        Commands::Migrate => {
            let pool = connect(&config).await?;
            run_migrations(&pool).await
        }
    }
}

async fn connect(config: &AppConfig) -> Result<PgPool> {
    let url = config.database.url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
        .context("failed to connect to the database")?;
    info!("🗄️ Connected to database (max {} connections)", config.database.max_connections);
    Ok(pool)
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run migrations")?;
    info!("✅ Migrations applied");
    Ok(())
}

fn object_store(config: &AppConfig) -> Option<Arc<dyn ObjectStore>> {
    match &config.object_store {
        Some(store) => {
            let s3 = S3ObjectStore::new(store);
            info!("📦 Object store: s3://{} ({})", s3.bucket(), store.region);
            Some(Arc::new(s3))
        }
        None => {
            warn!("AWS_S3_BUCKET not set, operation logs will not be archived");
            None
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let pool = connect(&config).await?;
    if config.database.run_migrations {
        run_migrations(&pool).await?;
    }

    let state = AppState {
        repository: Arc::new(PgSecurityRepository::new(pool)),
        object_store: object_store(&config),
        server: Arc::new(config.server.clone()),
    };
    let app = app::create_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("🚀 Security master API running at http://{}/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

async fn upsert(config: AppConfig, dry_run: bool) -> Result<()> {
    let prowess = config
        .prowess
        .clone()
        .context("PROWESS_API_KEY must be set to run the upsert")?;
    let vendor = ProwessClient::new(prowess)?;
    let abbreviations = AbbreviationService::from_config(&config.expansion).await;

    let repository: Arc<dyn SecurityRepository>;
    let store: Option<Arc<dyn ObjectStore>>;
    if dry_run {
        info!("🧪 Dry run: writing to an in-memory table, nothing is archived");
        repository = Arc::new(InMemorySecurityRepository::new());
        store = None;
    } else {
        let pool = connect(&config).await?;
        if config.database.run_migrations {
            run_migrations(&pool).await?;
        }
        repository = Arc::new(PgSecurityRepository::new(pool));
        store = object_store(&config);
    }

    let ctx = UpsertContext {
        repository,
        vendor: Arc::new(vendor),
        abbreviations: Arc::new(abbreviations),
        object_store: store,
        batch_size: config.pipeline.batch_size,
    };

    let report = security_upsert_job::run_security_upsert(&ctx).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == RunStatus::Error {
        anyhow::bail!("upsert run {} failed for every row", report.run_id);
    }
    Ok(())
}
