//! YubiKey OTP validation service HTTP entrypoint.
//!
//! Endpoints:
//! - `GET /wsapi/2.0/verify` — validate an OTP (the Yubico wire protocol)
//! - `GET /sync` — inbound replication push from a sibling replica
//! - `GET /sync/resync` — trigger a resync against all siblings
//! - `GET /health` — liveness probe
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT`, `DATABASE_URL`, `SYNC_LEVEL`, `SYNC_TIMEOUT`,
//!   `USE_NATIVE_YKKSM`, `TS_ABS_TOLERANCE`, `TS_REL_TOLERANCE` — see `config.rs`

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;

use yubikey_valsrv::clock::SystemClock;
use yubikey_valsrv::config::Config;
use yubikey_valsrv::handlers::{self, AppState};
use yubikey_valsrv::ksm::{KsmClient, LocalKsm, RemoteKsm};
use yubikey_valsrv::sig_down::SigDown;
use yubikey_valsrv::store::sqlite::SqliteStore;
use yubikey_valsrv::sync_engine::SyncEngine;
use yubikey_valsrv::validator::{Validator, ValidatorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    yubikey_valsrv::telemetry::init();

    let config = Config::load()?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(SqliteStore::new(pool));
    store.ensure_schema().await?;
    seed_clients(&store, &config).await?;

    let ksm: Arc<dyn KsmClient> = if config.use_native_ykksm {
        Arc::new(LocalKsm::new(load_keys(&config)?))
    } else {
        Arc::new(RemoteKsm::new(config.ykksm_servers.clone()))
    };

    let clock = Arc::new(SystemClock);
    let sync = Arc::new(SyncEngine::new(
        store.clone(),
        store.clone(),
        config.sync_servers.clone(),
        config.sync_level,
        Duration::from_secs(config.sync_timeout_secs),
        clock.clone(),
    ));

    let validator = Arc::new(Validator::new(
        store.clone(),
        ksm,
        sync.clone(),
        clock,
        ValidatorConfig {
            ts_abs_tolerance: config.ts_abs_tolerance,
            ts_rel_tolerance: config.ts_rel_tolerance,
            sync_level: config.sync_level,
            timestamp_in_response: false,
        },
    ));

    let app = handlers::routes(AppState { validator, sync });

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        std::process::exit(1);
    });

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}

async fn seed_clients(store: &SqliteStore, config: &Config) -> Result<(), sqlx::Error> {
    for client in &config.clients {
        store.upsert_client(client.client_id, &client.secret, client.active).await?;
    }
    Ok(())
}

fn load_keys(config: &Config) -> Result<HashMap<String, [u8; 16]>, Box<dyn std::error::Error>> {
    let mut keys = HashMap::new();
    for key in &config.keys {
        let bytes = hex::decode(&key.aes_key_hex)?;
        let array: [u8; 16] = bytes
            .try_into()
            .map_err(|_| format!("key for {} is not 16 bytes", key.public_name))?;
        keys.insert(key.public_name.clone(), array);
    }
    Ok(keys)
}
