//! Budget calculation engine with a JSON API.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::path::Path;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cache::{CacheStats, SessionCache};
use crate::config::Config;
use crate::engine::{Engine, EngineContext, FrameworkCatalog, ModelDefinition, ModelRegistry};

const BUILTIN_MODELS: &str = include_str!("../data/models.json");
const BUILTIN_FRAMEWORK: &str = include_str!("../data/framework.json");

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineContext,
    pub sessions: SessionCache,
}

impl AppState {
    pub fn new(engine: EngineContext, sessions: SessionCache) -> Self {
        Self { engine, sessions }
    }

    /// Load models and framework catalog named by `config`, falling back to
    /// the built-in definitions.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let models_json = read_or_builtin(config.models_path.as_deref(), BUILTIN_MODELS)?;
        let definitions: Vec<ModelDefinition> =
            serde_json::from_str(&models_json).context("Failed to parse model definitions")?;
        let registry = ModelRegistry::from_definitions(definitions)?;

        let framework_json = read_or_builtin(config.framework_path.as_deref(), BUILTIN_FRAMEWORK)?;
        let catalog = FrameworkCatalog::from_json(&framework_json)?;
        info!("Loaded framework catalog with {} categories", catalog.categories.len());

        let engine = EngineContext::new(registry, catalog, Engine::new(config.solver));
        let sessions = SessionCache::new(config.session_capacity, config.session_ttl);
        Ok(Self::new(engine, sessions))
    }
}

fn read_or_builtin(path: Option<&Path>, builtin: &str) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(builtin.to_string()),
    }
}

/// Initialize tracing with `RUST_LOG`, defaulting to `info`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    models: usize,
    cache: CacheStats,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        models: state.engine.registry.len(),
        cache: state.sessions.stats(),
    })
}

/// Build the application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(engine::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
