use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use tenantgate_common::{GlobalConfig, GlobalConfigPatch};
use tenantgate_core::{TenantId, UsageGate, build_resolver};
use tenantgate_router::{TenantState, tenant_router};
use tenantgate_storage::{CachedRegistry, NewTenant, StorageBus, StorageBusConfig, TenantStorage};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{info, warn};

mod cli;
mod data_dir;
mod dsn;

use crate::cli::{Cli, Command};
use crate::data_dir::resolve_data_dir;
use crate::dsn::resolve_dsn;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("tenantgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(&cli.data_dir);
    let dsn = resolve_dsn(cli.dsn.as_deref(), &data_dir)?;

    let mut patch = GlobalConfigPatch::default();
    patch.overlay(cli.config_patch(dsn));
    let config = patch.into_config()?;

    let storage = TenantStorage::connect(&config.dsn).await?;
    info!(dsn = %config.dsn, "db connected");
    storage.sync().await?;

    match cli.command {
        Some(Command::AddTenant {
            key,
            custom_hosts,
            tier,
        }) => {
            let tenant = storage
                .insert_tenant(
                    &config.base_domain,
                    NewTenant {
                        tenant_id: TenantId::new_v4(),
                        tenant_key: key,
                        custom_hosts,
                        tier,
                    },
                )
                .await?;
            info!(
                tenant_id = %tenant.tenant_id,
                tenant_key = %tenant.tenant_key,
                primary_host = %tenant.primary_host,
                "tenant registered"
            );
            return Ok(());
        }
        Some(Command::DeleteTenant { key }) => {
            if !storage.soft_delete_tenant(&key, OffsetDateTime::now_utc()).await? {
                return Err(format!("unknown tenant key {key:?}").into());
            }
            info!(tenant_key = %key, "tenant deleted");
            return Ok(());
        }
        None => {}
    }

    serve(
        config,
        storage,
        Duration::from_secs(cli.refresh_secs.max(1)),
        Duration::from_millis(cli.drain_grace_ms),
    )
    .await
}

async fn serve(
    config: GlobalConfig,
    storage: TenantStorage,
    refresh_every: Duration,
    drain_grace: Duration,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let registry = Arc::new(CachedRegistry::load(storage.clone()).await?);
    let resolver = build_resolver(registry.clone(), &config.base_domain, config.dev_mode)?;
    info!(
        host = %config.host,
        port = config.port,
        base_domain = %config.base_domain,
        dev_mode = config.dev_mode,
        "config loaded"
    );

    let bus = StorageBus::spawn(storage.clone(), StorageBusConfig::default());
    let state = TenantState {
        resolver,
        usage: UsageGate::new(Arc::new(bus.usage_sink())),
    };
    let refresher = spawn_refresh(registry, refresh_every);

    let app = axum::Router::new()
        .route("/health", get(health))
        .with_state(storage)
        .merge(tenant_router(state, axum::Router::new()));

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    refresher.abort();
    bus.shutdown(drain_grace).await;
    served?;
    Ok(())
}

fn spawn_refresh(registry: Arc<CachedRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match registry.refresh().await {
                Ok(tenants) => info!(event = "registry_refreshed", tenants),
                Err(err) => warn!(event = "registry_refresh_failed", error = %err),
            }
        }
    })
}

async fn health(State(storage): State<TenantStorage>) -> impl IntoResponse {
    match storage.health().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
        Err(err) => {
            warn!(event = "health_failed", error = %err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "ok": false })),
            )
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl_c handler failed; shutting down");
    }
    info!("shutdown requested");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenantgate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
