//! Wire-level request/response shapes for `/wsapi/2.0/verify` and the inbound
//! sync endpoint (`spec.md` §6), plus the canonical `k=v\r\n...` response
//! encoding the protocol uses instead of JSON.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::ValidatorError;
use crate::model::KeyRecord;

/// Raw query parameters for `GET /wsapi/2.0/verify`, deserialized by axum
/// before any semantic validation — field presence here only means "this
/// query string had this key", not "this value is well-formed" (that's
/// `Validator::sanitize`'s job, per `spec.md` §4.5 step 2).
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyQuery {
    pub otp: Option<String>,
    pub client_id: Option<String>,
    pub nonce: Option<String>,
    pub timestamp: Option<String>,
    pub timeout: Option<String>,
    pub sl: Option<String>,
}

/// Raw query parameters for the inbound sync endpoint (`sync_local`).
#[derive(Debug, Clone, Deserialize)]
pub struct SyncQuery {
    pub modified: Option<String>,
    pub otp: Option<String>,
    pub nonce: Option<String>,
    pub yk_publicname: Option<String>,
    pub yk_counter: Option<String>,
    pub yk_use: Option<String>,
    pub yk_high: Option<String>,
    pub yk_low: Option<String>,
}

/// A successfully validated verify response, rendered as the classic
/// newline-delimited `k=v` body (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct VerifyResponse {
    pub otp: String,
    pub nonce: String,
    pub sl: u8,
    pub status: &'static str,
    /// Signature over every other field, under the client's secret. `None`
    /// when the request carried no `client_id` (no `h=` on the wire, §4.3).
    pub h: Option<String>,
    /// Present only when the request asked for `timestamp=1` (§4.5 step 6).
    pub timestamp: Option<i64>,
    pub sessioncounter: Option<i64>,
    pub sessionuse: Option<i64>,
}

impl VerifyResponse {
    /// Render in the canonical, sorted `k=v\r\n` form the signer also uses.
    pub fn render(&self, t: i64) -> String {
        let mut fields: BTreeMap<&str, String> = BTreeMap::from([
            ("otp", self.otp.clone()),
            ("nonce", self.nonce.clone()),
            ("sl", self.sl.to_string()),
            ("status", self.status.to_string()),
            ("t", t.to_string()),
        ]);
        if let Some(h) = &self.h {
            fields.insert("h", h.clone());
        }
        if let Some(timestamp) = self.timestamp {
            fields.insert("timestamp", timestamp.to_string());
        }
        if let Some(sessioncounter) = self.sessioncounter {
            fields.insert("sessioncounter", sessioncounter.to_string());
        }
        if let Some(sessionuse) = self.sessionuse {
            fields.insert("sessionuse", sessionuse.to_string());
        }
        fields
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

/// Render the inbound-sync response body (`sync_local`'s return value):
/// `status` plus the (possibly updated) local record's counter fields, so a
/// sibling's own `Sync Engine` can parse and cross-check them (`spec.md`
/// §4.4 Inbound step 6, §6).
pub fn render_sync_response(status: &str, record: &KeyRecord) -> String {
    format!(
        "status={status}\r\nyk_counter={}\r\nyk_use={}\r\nyk_high={}\r\nyk_low={}\r\nnonce={}\r\nmodified={}",
        record.yk_counter, record.yk_use, record.yk_high, record.yk_low, record.nonce, record.modified,
    )
}

impl From<ValidatorError> for &'static str {
    fn from(e: ValidatorError) -> Self {
        e.wire_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_sorted_and_crlf_joined() {
        let resp = VerifyResponse {
            otp: "ccccccbchvthelloworldmodhextoken".into(),
            nonce: "abcdefghij0123456789".into(),
            sl: 100,
            status: "OK",
            h: None,
            timestamp: None,
            sessioncounter: None,
            sessionuse: None,
        };
        let rendered = resp.render(1_700_000_000);
        let lines: Vec<&str> = rendered.split("\r\n").collect();
        assert_eq!(lines[0], "nonce=abcdefghij0123456789");
        assert!(lines.contains(&"status=OK"));
        assert!(lines.contains(&"t=1700000000"));
    }

    #[test]
    fn h_and_timestamp_fields_are_omitted_unless_present() {
        let resp = VerifyResponse {
            otp: "ccccccbchvthelloworldmodhextoken".into(),
            nonce: "abcdefghij0123456789".into(),
            sl: 100,
            status: "OK",
            h: Some("sig==".into()),
            timestamp: Some(42),
            sessioncounter: Some(1),
            sessionuse: Some(0),
        };
        let rendered = resp.render(1_700_000_000);
        assert!(rendered.contains("h=sig=="));
        assert!(rendered.contains("timestamp=42"));
        assert!(rendered.contains("sessioncounter=1"));
        assert!(rendered.contains("sessionuse=0"));
    }

    #[test]
    fn sync_response_carries_full_counter_fields() {
        let record = KeyRecord {
            active: true,
            public_name: "ccccccbchvth".into(),
            yk_counter: 3,
            yk_use: 1,
            yk_high: 0,
            yk_low: 99,
            nonce: "abcdefghij0123456789".into(),
            modified: 1_700_000_000,
            created: 1_600_000_000,
        };
        let body = render_sync_response("OK", &record);
        assert!(body.starts_with("status=OK"));
        assert!(body.contains("yk_counter=3"));
        assert!(body.contains("yk_use=1"));
        assert!(body.contains("nonce=abcdefghij0123456789"));
    }
}
