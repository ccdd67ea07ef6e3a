//! CLI command implementations

pub mod catalog;
pub mod config;
pub mod learner;
pub mod simulate;

use std::sync::Arc;

use ade_engine::{AdaptiveEngine, EngineConfig, PgStore};
use anyhow::{Context, Result};

/// Connect to PostgreSQL using the `[postgres]` section
pub async fn connect(config: &EngineConfig) -> Result<Arc<PgStore>> {
    let store = PgStore::connect(&config.postgres)
        .await
        .with_context(|| format!("failed to connect to {}", redact_url(&config.postgres.url)))?;
    Ok(Arc::new(store))
}

/// Engine backed by PostgreSQL for every repository
pub async fn pg_engine(config: &EngineConfig) -> Result<AdaptiveEngine> {
    let store = connect(config).await?;
    Ok(AdaptiveEngine::with_store(config, store))
}

/// Hide the password part of a connection URL
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
