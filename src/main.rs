use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod error;
mod logging;
mod routes;
mod services;
pub mod models;

use services::session_store::{MemorySessionStore, SessionStore};
use services::set_ops::SetOpLimits;
use services::table::{AnalysisLimits, TableAnalyzer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = config::load_config()?;
    let addr = config.bind_addr;

    // Build our application state
    let state = Arc::new(AppState::new(config));
    spawn_session_sweeper(state.clone());

    let app = routes::app(state);

    // Run it
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drops sessions idle for longer than the configured TTL.
fn spawn_session_sweeper(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = state.store.evict_expired();
            if removed > 0 {
                tracing::info!("Evicted {} expired sessions", removed);
            }
        }
    });
}

// Application state
pub struct AppState {
    config: config::Config,
    store: Arc<MemorySessionStore>,
    analyzer: TableAnalyzer,
    set_op_limits: SetOpLimits,
}

impl AppState {
    fn new(config: config::Config) -> Self {
        let store = Arc::new(MemorySessionStore::new(
            Duration::from_secs(config.session_ttl_secs),
            config.max_files_per_session,
        ));
        let analyzer = TableAnalyzer::new(AnalysisLimits {
            preview_rows: config.preview_rows,
            max_na_cells: config.max_na_cells,
        });
        let set_op_limits = SetOpLimits {
            values_preview_limit: config.values_preview_limit,
            max_result_values: config.max_result_values,
        };
        Self { config, store, analyzer, set_op_limits }
    }
}
