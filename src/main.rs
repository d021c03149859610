use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tracing::info;

use todo_api::authentication::{SessionStore, Verifier};
use todo_api::config::Config;
use todo_api::repository::Repository;
use todo_api::session_store::{MemoryStore, RedisStore};
use todo_api::{app, cors_layer, AppState};

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("todo_api=debug,info"));

    let subscriber = fmt().with_env_filter(filter).with_target(false);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let repository = Repository::connect(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    repository.migrate().await.context("running migrations")?;

    let sessions: Arc<dyn SessionStore> = match &config.redis_url {
        Some(redis_url) => Arc::new(RedisStore::connect(redis_url).await?),
        None => {
            tracing::warn!("REDIS_URL not set, session tokens are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(repository, sessions, Verifier::new(config.token_policy()));

    let origin = HeaderValue::from_str(&config.cors_origin)
        .with_context(|| format!("invalid CORS_ORIGIN {}", config.cors_origin))?;
    let router = app(state).layer(cors_layer(origin));

    let listener = TcpListener::bind(config.listen_address())
        .await
        .with_context(|| format!("binding {}", config.listen_address()))?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    if let Err(err) = run_server(config).await {
        tracing::error!(error = ?err, "run server error");
        return Err(err);
    }
    Ok(())
}
