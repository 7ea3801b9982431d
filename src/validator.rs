//! The Validator: the six-step `verify` pipeline (`spec.md` §4.5), mirroring
//! the teacher's `assert_valid_payment` / `transferWithAuthorization_0` step
//! decomposition in `facilitator_local.rs` — one method, private associated
//! steps, each instrumented and erroring out as soon as a step fails.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::ValidatorError;
use crate::ksm::KsmClient;
use crate::model::{Counters, OtpParams};
use crate::modhex;
use crate::signer;
use crate::store::CounterStore;
use crate::sync_engine::SyncEngine;
use crate::wire::VerifyResponse;

const TOKEN_LEN: usize = 32;
const OTP_MAX_LEN: usize = 48;

/// Timestamp tick duration: YubiKeys clock their on-token timestamp at 8Hz.
pub const TS_SEC: f64 = 1.0 / 8.0;

pub struct ValidatorConfig {
    pub ts_abs_tolerance: f64,
    pub ts_rel_tolerance: f64,
    pub sync_level: u8,
    pub timestamp_in_response: bool,
}

pub struct Validator<C, Q> {
    counters: Arc<C>,
    ksm: Arc<dyn KsmClient>,
    sync: Arc<SyncEngine<C, Q>>,
    clock: Arc<dyn Clock>,
    config: ValidatorConfig,
    nonce_re: Regex,
}

/// What survives sanitize: a well-formed, fully-defaulted request.
struct SanitizedRequest {
    client_id: Option<i64>,
    secret: Option<String>,
    otp: String,
    nonce: String,
    sync_level: u8,
    timestamp_requested: bool,
}

impl<C, Q> Validator<C, Q>
where
    C: CounterStore,
{
    pub fn new(
        counters: Arc<C>,
        ksm: Arc<dyn KsmClient>,
        sync: Arc<SyncEngine<C, Q>>,
        clock: Arc<dyn Clock>,
        config: ValidatorConfig,
    ) -> Self {
        Validator {
            counters,
            ksm,
            sync,
            clock,
            config,
            nonce_re: Regex::new(r"^[A-Za-z0-9]{16,40}$").expect("static regex"),
        }
    }

    #[instrument(skip_all, err)]
    pub async fn verify(
        &self,
        otp: String,
        client_id: Option<i64>,
        nonce: Option<String>,
        timestamp_requested: bool,
        timeout: Option<u64>,
        sync_level: Option<u8>,
    ) -> Result<VerifyResponse, ValidatorError> {
        let request = self
            .sanitize(otp, client_id, nonce, timestamp_requested, sync_level)
            .await?;

        let decoded = self
            .ksm
            .decode(&request.otp, TOKEN_LEN)
            .await
            .map_err(ValidatorError::from)?;

        let public_name = request.otp[..request.otp.len() - TOKEN_LEN].to_string();
        let now = self.clock.now();

        // Step 3 — load local_params and reject disabled keys immediately,
        // before otp_params even exists: a disabled key never gets a write
        // from this path.
        let local = self
            .counters
            .get_or_create(&public_name, now)
            .await
            .map_err(ValidatorError::from)?;
        if !local.active {
            return Err(ValidatorError::DisabledToken);
        }

        let otp_params = OtpParams {
            modified: now,
            otp: request.otp.clone(),
            nonce: request.nonce.clone(),
            public_name: public_name.clone(),
            yk_counter: decoded.yk_counter,
            yk_use: decoded.yk_use,
            yk_high: decoded.yk_high,
            yk_low: decoded.yk_low,
        };

        self.replay_check(&local, &otp_params)?;

        let mut accepted = local.clone();
        accepted.yk_counter = otp_params.yk_counter;
        accepted.yk_use = otp_params.yk_use;
        accepted.yk_high = otp_params.yk_high;
        accepted.yk_low = otp_params.yk_low;
        accepted.nonce = otp_params.nonce.clone();
        accepted.modified = now;
        self.counters
            .conditional_update(&accepted)
            .await
            .map_err(ValidatorError::from)?;

        let sl_success_rate = self
            .sync
            .sync_remote(
                &local,
                &otp_params,
                Some(request.sync_level),
                timeout.map(Duration::from_secs),
            )
            .await?;

        self.phishing_test(&local, &otp_params, now)?;

        Ok(self.respond(&request, &otp_params, sl_success_rate))
    }

    /// Step 1 — sanitize.
    async fn sanitize(
        &self,
        otp: String,
        client_id: Option<i64>,
        nonce: Option<String>,
        timestamp_requested: bool,
        sync_level: Option<u8>,
    ) -> Result<SanitizedRequest, ValidatorError> {
        if let Some(id) = client_id {
            if id <= 0 {
                return Err(ValidatorError::InvalidParameter("client_id".into()));
            }
        }
        if let Some(level) = sync_level {
            if level > 100 {
                return Err(ValidatorError::InvalidParameter("sync_level".into()));
            }
        }

        if otp.len() < TOKEN_LEN || otp.len() > OTP_MAX_LEN || !modhex::is_modhex(&otp) {
            return Err(ValidatorError::BadOtp);
        }

        let secret = if let Some(id) = client_id {
            let client = self
                .counters
                .get_client(id)
                .await
                .map_err(|_| ValidatorError::NoSuchClient)?;
            if !client.active {
                return Err(ValidatorError::NoSuchClient);
            }
            Some(client.secret)
        } else {
            None
        };

        let nonce = match (client_id, nonce) {
            (Some(_), None) => return Err(ValidatorError::MissingParameter("nonce".into())),
            (Some(_), Some(n)) => {
                if !self.nonce_re.is_match(&n) {
                    return Err(ValidatorError::InvalidParameter("nonce".into()));
                }
                n
            }
            // Fill a missing nonce with the server-generated one for either role
            // (open question resolved in `spec.md` §9).
            (None, Some(n)) if self.nonce_re.is_match(&n) => n,
            (None, _) => crate::clock::generate_nonce(None),
        };

        let sync_level = sync_level.unwrap_or(self.config.sync_level);

        Ok(SanitizedRequest {
            client_id,
            secret,
            otp,
            nonce,
            sync_level,
            timestamp_requested,
        })
    }

    /// Step 3 — replay check (decision only; the write happens in `verify`
    /// once the caller knows whether the key is active).
    fn replay_check(
        &self,
        local: &crate::model::KeyRecord,
        otp_params: &OtpParams,
    ) -> Result<(), ValidatorError> {
        if Counters::eq(local.counters(), otp_params.counters()) && local.nonce == otp_params.nonce
        {
            return Err(ValidatorError::ReplayedRequest);
        }
        if Counters::gte(local.counters(), otp_params.counters()) {
            return Err(ValidatorError::ReplayedOtp);
        }
        Ok(())
    }

    /// Step 5 — phishing / timing test, only when the session counter did
    /// not advance (same power cycle).
    fn phishing_test(
        &self,
        local: &crate::model::KeyRecord,
        otp_params: &OtpParams,
        now: i64,
    ) -> Result<(), ValidatorError> {
        if otp_params.yk_counter != local.yk_counter {
            return Ok(());
        }
        let new_ts = (otp_params.yk_high << 16) | otp_params.yk_low;
        let old_ts = (local.yk_high << 16) | local.yk_low;
        let token_delta = (new_ts - old_ts) as f64 * TS_SEC;
        let wall_elapsed = (now - local.modified) as f64;
        let deviation = (wall_elapsed - token_delta).abs();
        let percent = if wall_elapsed == 0.0 {
            1.0
        } else {
            deviation / wall_elapsed
        };
        debug!(deviation, percent, "phishing/timing test");
        if deviation > self.config.ts_abs_tolerance && percent > self.config.ts_rel_tolerance {
            warn!(deviation, percent, "token delta diverges from wall clock");
            return Err(ValidatorError::DelayedOtp);
        }
        Ok(())
    }

    /// Step 6 — respond, signing under the client's secret when present.
    fn respond(
        &self,
        request: &SanitizedRequest,
        otp_params: &OtpParams,
        sl_success_rate: u8,
    ) -> VerifyResponse {
        let mut response = VerifyResponse {
            otp: otp_params.otp.clone(),
            nonce: request.nonce.clone(),
            sl: sl_success_rate,
            status: "OK",
            h: None,
            timestamp: None,
            sessioncounter: None,
            sessionuse: None,
        };
        if request.timestamp_requested {
            response.timestamp = Some((otp_params.yk_high << 16) | otp_params.yk_low);
            response.sessioncounter = Some(otp_params.yk_counter);
            response.sessionuse = Some(otp_params.yk_use);
        }
        if let Some(secret) = &request.secret {
            let rendered = response.render(self.clock.now());
            let pairs: Vec<(&str, &str)> = rendered
                .split("\r\n")
                .filter_map(|line| line.split_once('='))
                .collect();
            match signer::sign(&pairs, secret) {
                Ok(sig) => response.h = Some(sig),
                Err(err) => warn!(%err, "failed to sign verify response"),
            }
        }
        response
    }
}
