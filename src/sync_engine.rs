//! Cross-replica replication (`spec.md` §4.4/§4.6), grounded in the `Sync`
//! class of `examples/original_source/yubistack/ykval.py`. Outbound fan-out
//! uses one `tokio::spawn`ed task per sibling URL collected through an
//! `mpsc` channel under a bounded-wait loop — the teacher's concurrency idiom
//! (see `sig_down.rs`'s `TaskTracker`) rather than the original's
//! thread-per-sibling + `queue.Queue` polling, but with the same 200ms poll
//! granularity and 1.5xT overall deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::{StoreError, SyncError};
use crate::model::{Counters, KeyRecord, OtpParams, QueueEntry};
use crate::store::{CounterStore, QueueStore};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The (possibly updated) local record after an inbound sync push, plus
/// whether the key is disabled (`spec.md` §4.4 Inbound step 5/6).
pub struct SyncLocalOutcome {
    pub record: KeyRecord,
    pub disabled: bool,
}

/// A sibling's parsed reply to an outbound sync push (`spec.md` §6: "the
/// same counter fields plus the responder's local counters").
struct SiblingReply {
    yk_counter: i64,
    yk_use: i64,
    yk_high: i64,
    yk_low: i64,
    nonce: Option<String>,
    modified: Option<i64>,
}

impl SiblingReply {
    fn counters(&self) -> Counters {
        Counters {
            yk_counter: self.yk_counter,
            yk_use: self.yk_use,
        }
    }
}

pub struct SyncEngine<C, Q> {
    counters: Arc<C>,
    queue: Arc<Q>,
    http: reqwest::Client,
    siblings: Vec<String>,
    default_sync_level: u8,
    sync_timeout: Duration,
    clock: Arc<dyn Clock>,
}

/// A sibling's raw answer to an outbound fetch: either a response body
/// (classified by the collector against `local`/`otp_params`) or a failure
/// (connection error, non-2xx, timeout).
enum FetchOutcome {
    Responded(String),
    Failed,
}

impl<C, Q> SyncEngine<C, Q>
where
    C: CounterStore,
    Q: QueueStore,
{
    pub fn new(
        counters: Arc<C>,
        queue: Arc<Q>,
        siblings: Vec<String>,
        default_sync_level: u8,
        sync_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SyncEngine {
            counters,
            queue,
            http: reqwest::Client::new(),
            siblings,
            default_sync_level,
            sync_timeout,
            clock,
        }
    }

    /// Outbound replication of a freshly accepted OTP to every sibling,
    /// returning the achieved success rate (`spec.md` §4.4 Outbound).
    /// `sync_level` overrides the server default when the caller specified
    /// one; `timeout_override` likewise overrides the per-sibling deadline.
    #[instrument(skip_all, fields(public_name = %params.public_name))]
    pub async fn sync_remote(
        &self,
        local: &KeyRecord,
        params: &OtpParams,
        sync_level: Option<u8>,
        timeout_override: Option<Duration>,
    ) -> Result<u8, SyncError> {
        let n = self.siblings.len();

        // Enqueue one outbox row per sibling unconditionally, before the
        // quorum is even computed — a reader must see these writes.
        for url in &self.siblings {
            self.queue
                .enqueue(QueueEntry {
                    server_url: url.clone(),
                    modified: params.modified,
                    server_nonce: params.nonce.clone(),
                    otp: params.otp.clone(),
                    info: Self::build_info(params),
                    queued: Some(self.clock.now()),
                })
                .await?;
        }

        let sync_level = sync_level.unwrap_or(self.default_sync_level);
        let quorum = ((n as f64) * (sync_level as f64) / 100.0).round() as usize;
        if quorum == 0 || n == 0 {
            debug!("sync_level requires no confirmations; replication advisory");
            return Ok(100);
        }

        // Step 1 — read back exactly the rows just enqueued, rather than
        // rebuilding the query independently of what's in the outbox.
        let rows = self.queue.get_queue(params.modified, &params.nonce).await?;
        let timeout = timeout_override.unwrap_or(self.sync_timeout);

        let (tx, mut rx) = mpsc::channel::<(QueueEntry, FetchOutcome)>(n.max(1));
        for row in rows {
            let tx = tx.clone();
            let http = self.http.clone();
            let query = format!("otp={}&modified={}&{}", row.otp, row.modified, row.info);
            let url = row.server_url.clone();
            tokio::spawn(async move {
                let outcome = fetch_sibling(&http, &url, &query, timeout).await;
                let _ = tx.send((row, outcome)).await;
            });
        }
        drop(tx);

        let start = Instant::now();
        let overall_deadline = timeout.mul_f64(1.5);
        let mut valid_answers = 0usize;
        let mut proved_replay = false;
        let mut received = 0usize;
        let mut pending: Vec<String> = self.siblings.clone();

        while received < n && valid_answers < quorum && start.elapsed() < overall_deadline {
            match tokio::time::timeout(POLL_INTERVAL, rx.recv()).await {
                Ok(Some((row, outcome))) => {
                    received += 1;
                    pending.retain(|s| s != &row.server_url);
                    match outcome {
                        FetchOutcome::Responded(body) => {
                            let Some(resp) = parse_sibling_reply(&body) else {
                                warn!(sibling = %row.server_url, "unparsable sync reply");
                                self.queue
                                    .null_queued(&row.server_url, row.modified, &row.server_nonce)
                                    .await?;
                                continue;
                            };

                            let merged = KeyRecord {
                                active: local.active,
                                public_name: params.public_name.clone(),
                                yk_counter: resp.yk_counter,
                                yk_use: resp.yk_use,
                                yk_high: resp.yk_high,
                                yk_low: resp.yk_low,
                                nonce: resp.nonce.clone().unwrap_or_else(|| local.nonce.clone()),
                                modified: resp.modified.unwrap_or(params.modified),
                                created: local.created,
                            };
                            self.counters.conditional_update(&merged).await?;
                            self.queue
                                .remove(&row.server_url, row.modified, &row.server_nonce)
                                .await?;

                            if Counters::gt(local.counters(), resp.counters()) {
                                warn!(sibling = %row.server_url, "remote out of sync");
                            } else if Counters::gt(resp.counters(), local.counters()) {
                                warn!(sibling = %row.server_url, "local out of sync");
                            } else if Counters::eq(resp.counters(), local.counters())
                                && (resp.nonce.as_deref() != Some(local.nonce.as_str())
                                    || resp.modified != Some(local.modified))
                            {
                                warn!(sibling = %row.server_url, "divergent record at equal counters");
                            }

                            if Counters::gt(resp.counters(), params.counters())
                                || (Counters::eq(resp.counters(), params.counters())
                                    && resp.nonce.as_deref() != Some(params.nonce.as_str()))
                            {
                                proved_replay = true;
                            } else {
                                valid_answers += 1;
                            }
                        }
                        FetchOutcome::Failed => {
                            warn!(sibling = %row.server_url, "sibling unreachable during replication");
                            self.queue
                                .null_queued(&row.server_url, row.modified, &row.server_nonce)
                                .await?;
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => continue, // poll tick elapsed, re-check overall deadline
            }
        }

        // Regardless of how collection ended, NULL any remaining outbox rows
        // so a background drainer retries them.
        for url in &pending {
            self.queue.null_queued(url, params.modified, &params.nonce).await?;
        }

        if proved_replay {
            return Err(SyncError::ProvedReplay);
        }
        if valid_answers < quorum {
            return Err(SyncError::QuorumUnmet {
                needed: quorum,
                got: valid_answers,
            });
        }
        Ok((100 * valid_answers / n) as u8)
    }

    /// Apply a sibling's inbound sync push (`sync_local` in the original,
    /// `spec.md` §4.4 Inbound): apply the update unconditionally, then warn
    /// on any of the four divergence shapes, then report whether the local
    /// record is disabled.
    #[instrument(skip_all, fields(public_name = %params.public_name))]
    pub async fn sync_local(&self, params: &OtpParams) -> Result<SyncLocalOutcome, StoreError> {
        let local = self.counters.get_or_create(&params.public_name, params.modified).await?;

        let mut merged = local.clone();
        merged.yk_counter = params.yk_counter;
        merged.yk_use = params.yk_use;
        merged.yk_high = params.yk_high;
        merged.yk_low = params.yk_low;
        merged.nonce = params.nonce.clone();
        merged.modified = params.modified;
        self.counters.conditional_update(&merged).await?;

        if Counters::gte(local.counters(), params.counters()) {
            warn!(public_name = %params.public_name, "inbound sync sender is out of sync");
        }
        if Counters::eq(local.counters(), params.counters()) {
            if local.nonce == params.nonce {
                if (local.modified - params.modified).abs() <= 1 {
                    debug!(public_name = %params.public_name, "duplicate retransmit");
                } else {
                    warn!(public_name = %params.public_name, "potential replay at different times");
                }
            } else {
                warn!(public_name = %params.public_name, "sibling accepted a revalidation we also accepted");
            }
        }

        let record = self.counters.get_or_create(&params.public_name, params.modified).await?;
        Ok(SyncLocalOutcome {
            record,
            disabled: !local.active,
        })
    }

    /// `resync_local({yk: "all" | <public_name>})`: enumerate the identities
    /// to resync, construct a sentinel OTP (`'c'.repeat(32)`), and enqueue a
    /// sync message per (key, sibling) pair under a single server nonce. This
    /// is advisory only — a background drainer (out of scope) consumes the
    /// outbox and applies whatever the siblings report back.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn resync_local(&self, target: &str) -> Result<usize, StoreError> {
        const FAKE_OTP_BODY: &str = "cccccccccccccccccccccccccccccccc";

        let identities = if target == "all" {
            self.counters.list_active_identities().await?
        } else {
            vec![target.to_string()]
        };

        let server_nonce = crate::clock::generate_nonce(None);
        let now = self.clock.now();
        let mut enqueued = 0usize;

        for public_name in &identities {
            for url in &self.siblings {
                self.queue
                    .enqueue(QueueEntry {
                        server_url: url.clone(),
                        modified: now,
                        server_nonce: server_nonce.clone(),
                        otp: FAKE_OTP_BODY.to_string(),
                        info: format!("resync yk_publicname={public_name}"),
                        queued: Some(now),
                    })
                    .await?;
                enqueued += 1;
            }
        }

        Ok(enqueued)
    }

    /// The outbox `info` column: everything a sibling needs besides `otp`
    /// and `modified`, which are already their own `QueueEntry` columns
    /// (`spec.md` §6: `GET <server_url>?otp=..&modified=..&<info-prefix>`).
    fn build_info(params: &OtpParams) -> String {
        format!(
            "nonce={}&yk_publicname={}&yk_counter={}&yk_use={}&yk_high={}&yk_low={}",
            params.nonce, params.public_name, params.yk_counter, params.yk_use, params.yk_high, params.yk_low,
        )
    }
}

async fn fetch_sibling(http: &reqwest::Client, url: &str, query: &str, timeout: Duration) -> FetchOutcome {
    let request = http.get(format!("{url}/sync?{query}")).timeout(timeout).send();
    match request.await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(body) => FetchOutcome::Responded(body),
            Err(_) => FetchOutcome::Failed,
        },
        _ => FetchOutcome::Failed,
    }
}

/// Parse a sync response body's counter fields plus the responder's nonce
/// and modified time, used to classify the outbound reply (`spec.md` §4.4
/// Outbound step 4). `yk_counter`/`yk_use` are REQUIRED; the rest default.
fn parse_sibling_reply(body: &str) -> Option<SiblingReply> {
    let mut yk_counter = None;
    let mut yk_use = None;
    let mut yk_high = 0i64;
    let mut yk_low = 0i64;
    let mut nonce = None;
    let mut modified = None;
    for line in body.split(|c| c == '\r' || c == '\n' || c == '&') {
        if let Some(v) = line.strip_prefix("yk_counter=") {
            yk_counter = v.parse().ok();
        }
        if let Some(v) = line.strip_prefix("yk_use=") {
            yk_use = v.parse().ok();
        }
        if let Some(v) = line.strip_prefix("yk_high=") {
            yk_high = v.parse().unwrap_or(0);
        }
        if let Some(v) = line.strip_prefix("yk_low=") {
            yk_low = v.parse().unwrap_or(0);
        }
        if let Some(v) = line.strip_prefix("nonce=") {
            nonce = Some(v.to_string());
        }
        if let Some(v) = line.strip_prefix("modified=") {
            modified = v.parse().ok();
        }
    }
    Some(SiblingReply {
        yk_counter: yk_counter?,
        yk_use: yk_use?,
        yk_high,
        yk_low,
        nonce,
        modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sibling_reply_from_crlf_body() {
        let body = "status=OK\r\nyk_counter=5\r\nyk_use=2\r\nnonce=abcdefghij0123456789\r\nmodified=1700000000";
        let reply = parse_sibling_reply(body).unwrap();
        assert_eq!(reply.yk_counter, 5);
        assert_eq!(reply.yk_use, 2);
        assert_eq!(reply.modified, Some(1_700_000_000));
    }

    #[test]
    fn missing_counter_fields_yield_none() {
        assert!(parse_sibling_reply("status=OK").is_none());
    }

    #[tokio::test]
    async fn unreachable_sibling_yields_not_enough_answers() {
        use crate::clock::FixedClock;
        use crate::store::memory::InMemoryStore;

        let store = Arc::new(InMemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(1_700_000_000));
        // Port 1 is a reserved, never-listening port: the connection is
        // refused immediately rather than timing out, keeping the test fast.
        let engine = SyncEngine::new(
            store.clone(),
            store.clone(),
            vec!["http://127.0.0.1:1".to_string()],
            100,
            Duration::from_millis(200),
            clock,
        );

        let params = OtpParams {
            modified: 1_700_000_000,
            otp: "ccccccbchvthexampletokenbody1234".into(),
            nonce: "abcdefghij0123456789".into(),
            public_name: "ccccccbchvth".into(),
            yk_counter: 1,
            yk_use: 0,
            yk_high: 0,
            yk_low: 0,
        };
        let local = store.get_or_create(&params.public_name, params.modified).await.unwrap();

        let err = engine.sync_remote(&local, &params, None, None).await.unwrap_err();
        assert!(matches!(err, SyncError::QuorumUnmet { needed: 1, got: 0 }));

        let redrive = store.list_due_for_redrive().await.unwrap();
        assert_eq!(redrive.len(), 1);
    }

    #[tokio::test]
    async fn zero_sync_level_is_advisory_success() {
        use crate::clock::FixedClock;
        use crate::store::memory::InMemoryStore;

        let store = Arc::new(InMemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(1_700_000_000));
        let engine = SyncEngine::new(
            store.clone(),
            store.clone(),
            vec!["http://127.0.0.1:1".to_string()],
            0,
            Duration::from_millis(200),
            clock,
        );
        let params = OtpParams {
            modified: 1_700_000_000,
            otp: "ccccccbchvthexampletokenbody1234".into(),
            nonce: "abcdefghij0123456789".into(),
            public_name: "ccccccbchvth".into(),
            yk_counter: 1,
            yk_use: 0,
            yk_high: 0,
            yk_low: 0,
        };
        let local = store.get_or_create(&params.public_name, params.modified).await.unwrap();
        assert_eq!(engine.sync_remote(&local, &params, None, None).await.unwrap(), 100);
    }
}
