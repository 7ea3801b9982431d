//! Error plumbing. Each component gets its own `thiserror` enum; all of them
//! flow into [`ValidatorError`], whose variants are the wire error kinds of
//! the verify response, mirroring the teacher's layered
//! `PaymentError` -> `ErrorReason` -> `IntoResponse` chain.

use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures from a `CounterStore` or `QueueStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("record not found for {0}")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Failures talking to a key storage module (local or remote).
#[derive(Debug, Error)]
pub enum KsmError {
    #[error("no KSM configured")]
    NotConfigured,
    #[error("token could not be decoded by any KSM")]
    Undecodable,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failures building or checking a signature.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid base64 secret")]
    BadSecret,
    #[error("signature mismatch")]
    Mismatch,
}

/// Failures during cross-replica replication.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sibling proved this OTP was already used")]
    ProvedReplay,
    #[error("quorum of {needed} valid answers not reached ({got} received)")]
    QuorumUnmet { needed: usize, got: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Config file/env loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    JsonParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The wire-level outcome of a `verify` call (`spec.md` §7).
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("BAD_OTP")]
    BadOtp,
    #[error("REPLAYED_OTP")]
    ReplayedOtp,
    #[error("REPLAYED_REQUEST")]
    ReplayedRequest,
    #[error("DELAYED_OTP")]
    DelayedOtp,
    #[error("NO_SUCH_CLIENT")]
    NoSuchClient,
    #[error("DISABLED_TOKEN")]
    DisabledToken,
    #[error("MISSING_PARAMETER: {0}")]
    MissingParameter(String),
    #[error("INVALID_PARAMETER: {0}")]
    InvalidParameter(String),
    #[error("NOT_ENOUGH_ANSWERS")]
    NotEnoughAnswers,
    #[error("BACKEND_ERROR: {0}")]
    BackendError(String),
}

impl ValidatorError {
    /// The literal status string sent back on the wire (`spec.md` §6/§7).
    pub fn wire_status(&self) -> &'static str {
        match self {
            ValidatorError::BadOtp => "BAD_OTP",
            ValidatorError::ReplayedOtp => "REPLAYED_OTP",
            ValidatorError::ReplayedRequest => "REPLAYED_REQUEST",
            ValidatorError::DelayedOtp => "DELAYED_OTP",
            ValidatorError::NoSuchClient => "NO_SUCH_CLIENT",
            ValidatorError::DisabledToken => "DISABLED_TOKEN",
            ValidatorError::MissingParameter(_) => "MISSING_PARAMETER",
            ValidatorError::InvalidParameter(_) => "INVALID_PARAMETER",
            ValidatorError::NotEnoughAnswers => "NOT_ENOUGH_ANSWERS",
            ValidatorError::BackendError(_) => "BACKEND_ERROR",
        }
    }
}

impl From<KsmError> for ValidatorError {
    fn from(e: KsmError) -> Self {
        match e {
            KsmError::NotConfigured => ValidatorError::BackendError("no KSM configured".into()),
            KsmError::Undecodable => ValidatorError::BadOtp,
            KsmError::Transport(msg) => ValidatorError::BackendError(msg),
        }
    }
}

impl From<StoreError> for ValidatorError {
    fn from(e: StoreError) -> Self {
        ValidatorError::BackendError(e.to_string())
    }
}

impl From<SyncError> for ValidatorError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::ProvedReplay => ValidatorError::ReplayedOtp,
            SyncError::QuorumUnmet { .. } => ValidatorError::NotEnoughAnswers,
            SyncError::Store(e) => ValidatorError::BackendError(e.to_string()),
        }
    }
}

/// Every error bubbles to the Validator boundary as a `status=<kind>` body
/// in the protocol's own wire format, not JSON — real OTP validation
/// servers always answer with HTTP 200 and let `status=` carry the outcome
/// (`spec.md` §6/§7).
impl IntoResponse for ValidatorError {
    fn into_response(self) -> Response {
        let mut body = format!("status={}", self.wire_status());
        match &self {
            ValidatorError::MissingParameter(p) | ValidatorError::InvalidParameter(p) => {
                body.push_str(&format!("\r\ninfo={p}"));
            }
            ValidatorError::BackendError(msg) => body.push_str(&format!("\r\ninfo={msg}")),
            _ => {}
        }
        body.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_status_matches_variant() {
        assert_eq!(ValidatorError::BadOtp.wire_status(), "BAD_OTP");
        assert_eq!(
            ValidatorError::InvalidParameter("nonce".into()).wire_status(),
            "INVALID_PARAMETER"
        );
    }

    #[test]
    fn sync_quorum_unmet_maps_to_not_enough_answers() {
        let e: ValidatorError = SyncError::QuorumUnmet { needed: 2, got: 1 }.into();
        assert_eq!(e.wire_status(), "NOT_ENOUGH_ANSWERS");
    }

    #[test]
    fn sync_proved_replay_maps_to_replayed_otp() {
        let e: ValidatorError = SyncError::ProvedReplay.into();
        assert_eq!(e.wire_status(), "REPLAYED_OTP");
    }
}
