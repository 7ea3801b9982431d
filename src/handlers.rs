//! HTTP surface (`SPEC_FULL.md` component C8): thin axum routes binding the
//! wire paths to the Validator and Sync engine, following the teacher's
//! `routes<A>()` / per-handler `#[instrument]` shape in its own `handlers.rs`.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::ValidatorError;
use crate::store::sqlite::SqliteStore;
use crate::sync_engine::SyncEngine;
use crate::validator::Validator;
use crate::wire::{SyncQuery, VerifyQuery};

pub type Store = SqliteStore;

#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<Validator<Store, Store>>,
    pub sync: Arc<SyncEngine<Store, Store>>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/wsapi/2.0/verify", get(get_verify))
        .route("/sync", get(get_sync))
        .route("/sync/resync", get(get_resync))
        .route("/health", get(get_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[instrument(skip_all)]
async fn get_verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    let otp = match query.otp {
        Some(otp) => otp,
        None => return ValidatorError::MissingParameter("otp".into()).into_response(),
    };
    let client_id = match query.client_id {
        None => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => return ValidatorError::InvalidParameter("client_id".into()).into_response(),
        },
    };
    let timestamp_requested = query.timestamp.as_deref() == Some("1");
    let timeout = match query.timeout {
        None => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(t) => Some(t),
            Err(_) => return ValidatorError::InvalidParameter("timeout".into()).into_response(),
        },
    };
    let sync_level = match query.sl {
        None => None,
        Some(raw) => match raw.parse::<u8>() {
            Ok(sl) => Some(sl),
            Err(_) => return ValidatorError::InvalidParameter("sl".into()).into_response(),
        },
    };

    match state
        .validator
        .verify(otp, client_id, query.nonce, timestamp_requested, timeout, sync_level)
        .await
    {
        Ok(response) => {
            let body = response.render(SystemClock.now());
            (axum::http::StatusCode::OK, body).into_response()
        }
        Err(err) => {
            warn!(error = %err, "verify rejected");
            err.into_response()
        }
    }
}

#[instrument(skip_all)]
async fn get_sync(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> impl IntoResponse {
    let params = match sync_query_to_params(query) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    match state.sync.sync_local(&params).await {
        Ok(outcome) => {
            let status = if outcome.disabled { "DISABLED_TOKEN" } else { "OK" };
            let body = crate::wire::render_sync_response(status, &outcome.record);
            (axum::http::StatusCode::OK, body).into_response()
        }
        Err(e) => ValidatorError::from(e).into_response(),
    }
}

#[instrument(skip_all)]
async fn get_resync(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> impl IntoResponse {
    let target = match query.yk_publicname {
        Some(name) => name,
        None => return ValidatorError::MissingParameter("yk_publicname".into()).into_response(),
    };
    match state.sync.resync_local(&target).await {
        Ok(enqueued) => (axum::http::StatusCode::OK, format!("status=OK\r\nenqueued={enqueued}")).into_response(),
        Err(e) => ValidatorError::from(e).into_response(),
    }
}

#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}

fn sync_query_to_params(query: SyncQuery) -> Result<crate::model::OtpParams, ValidatorError> {
    let require = |field: Option<String>, name: &str| {
        field.ok_or_else(|| ValidatorError::MissingParameter(name.into()))
    };
    let parse_i64 = |s: String, name: &str| {
        s.parse::<i64>()
            .map_err(|_| ValidatorError::InvalidParameter(name.into()))
    };

    Ok(crate::model::OtpParams {
        modified: parse_i64(require(query.modified, "modified")?, "modified")?,
        otp: require(query.otp, "otp")?,
        nonce: require(query.nonce, "nonce")?,
        public_name: require(query.yk_publicname, "yk_publicname")?,
        yk_counter: parse_i64(require(query.yk_counter, "yk_counter")?, "yk_counter")?,
        yk_use: parse_i64(require(query.yk_use, "yk_use")?, "yk_use")?,
        yk_high: parse_i64(require(query.yk_high, "yk_high")?, "yk_high")?,
        yk_low: parse_i64(require(query.yk_low, "yk_low")?, "yk_low")?,
    })
}
