//! Othello match server
//!
//! Serves the websocket protocol on `bind_addr`. Configuration comes from
//! the TOML file named by `OTHELLO_CONFIG` (default `othello.toml`).

use std::path::Path;
use std::process;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use othello_server::{app, ws, AppState, MemoryStore, ServerConfig, SqliteStore, Store};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = ServerConfig::default_path();
    let config = match ServerConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let store: Arc<dyn Store> = if config.database_path.is_empty() {
        warn!("no database configured, ratings are kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        match SqliteStore::open(Path::new(&config.database_path)) {
            Ok(store) => {
                info!("using database {}", config.database_path);
                Arc::new(store)
            }
            Err(e) => {
                error!("failed to open database {}: {}", config.database_path, e);
                process::exit(1);
            }
        }
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, store);
    app::spawn_matchmaker(state.clone());

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", bind_addr, e);
            process::exit(1);
        }
    };
    info!("Othello server listening on {}", bind_addr);
    if let Err(e) = axum::serve(listener, ws::router(state)).await {
        error!("server error: {}", e);
    }
}
