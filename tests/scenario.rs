//! End-to-end scenario tests driving `Validator::verify` against the
//! in-memory store, the way a real deployment's request path would see it:
//! no mocked Validator internals, just otp in / wire response out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use yubikey_valsrv::clock::{Clock, FixedClock};
use yubikey_valsrv::ksm::{encrypt_token_for_test, KsmClient, LocalKsm};
use yubikey_valsrv::model::ClientRecord;
use yubikey_valsrv::store::memory::InMemoryStore;
use yubikey_valsrv::sync_engine::SyncEngine;
use yubikey_valsrv::validator::{Validator, ValidatorConfig};

const PUBLIC_NAME: &str = "ccccccbchvth";
const CLIENT_SECRET: &str = "c2VjcmV0LWJ5dGVz";

fn build(
    now: i64,
    key: [u8; 16],
) -> (Validator<InMemoryStore, InMemoryStore>, Arc<InMemoryStore>) {
    let mut keys = HashMap::new();
    keys.insert(PUBLIC_NAME.to_string(), key);
    let ksm: Arc<dyn KsmClient> = Arc::new(LocalKsm::new(keys));

    let store = Arc::new(InMemoryStore::new().with_client(ClientRecord {
        client_id: 1,
        secret: CLIENT_SECRET.into(),
        active: true,
    }));

    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now));
    let sync = Arc::new(SyncEngine::new(
        store.clone(),
        store.clone(),
        vec![],
        100,
        Duration::from_millis(500),
        clock.clone(),
    ));

    let validator = Validator::new(
        store.clone(),
        ksm,
        sync,
        clock,
        ValidatorConfig {
            ts_abs_tolerance: 20.0,
            ts_rel_tolerance: 0.3,
            sync_level: 100,
            timestamp_in_response: false,
        },
    );
    (validator, store)
}

fn otp_for(key: [u8; 16], counter: u16, use_ctr: u8) -> String {
    let uid = [1, 2, 3, 4, 5, 6];
    let token = encrypt_token_for_test(&uid, &key, counter, 0, 0, use_ctr, 0xabcd);
    format!("{PUBLIC_NAME}{token}")
}

#[tokio::test]
async fn fresh_otp_is_accepted_and_signed() {
    let key = [0x55u8; 16];
    let (validator, _store) = build(1_700_000_000, key);
    let otp = otp_for(key, 1, 0);

    let result = validator
        .verify(otp.clone(), Some(1), Some("abcdefghij0123456789".into()), false, None, None)
        .await
        .unwrap();

    assert_eq!(result.status, "OK");
    assert_eq!(result.otp, otp);
    assert!(result.h.is_some(), "a client with a secret should get a signature");
}

#[tokio::test]
async fn anonymous_request_gets_no_signature() {
    let key = [0x56u8; 16];
    let (validator, _store) = build(1_700_000_000, key);
    let otp = otp_for(key, 1, 0);

    let result = validator.verify(otp, None, None, false, None, None).await.unwrap();
    assert_eq!(result.status, "OK");
    assert!(result.h.is_none(), "no client_id means no h= on the wire");
}

#[tokio::test]
async fn exact_retransmit_is_replayed_request() {
    let key = [0x57u8; 16];
    let (validator, _store) = build(1_700_000_000, key);
    let otp = otp_for(key, 1, 0);
    let nonce = Some("abcdefghij0123456789".to_string());

    validator.verify(otp.clone(), Some(1), nonce.clone(), false, None, None).await.unwrap();
    let err = validator.verify(otp, Some(1), nonce, false, None, None).await.unwrap_err();
    assert_eq!(err.wire_status(), "REPLAYED_REQUEST");
}

#[tokio::test]
async fn stale_counters_under_a_new_nonce_are_replayed_otp() {
    let key = [0x58u8; 16];
    let (validator, _store) = build(1_700_000_000, key);
    let otp = otp_for(key, 1, 0);

    validator
        .verify(otp.clone(), Some(1), Some("abcdefghij0123456789".into()), false, None, None)
        .await
        .unwrap();
    let err = validator
        .verify(otp, Some(1), Some("zyxwvutsrq9876543210".into()), false, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.wire_status(), "REPLAYED_OTP");
}

#[tokio::test]
async fn otp_below_minimum_length_is_bad_otp() {
    let key = [0x59u8; 16];
    let (validator, _store) = build(1_700_000_000, key);
    let err = validator
        .verify("short".into(), None, None, false, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.wire_status(), "BAD_OTP");
}

#[tokio::test]
async fn zero_sync_level_still_accepts_with_no_siblings_configured() {
    let key = [0x5au8; 16];
    let (validator, _store) = build(1_700_000_000, key);
    let otp = otp_for(key, 1, 0);

    let result = validator
        .verify(otp, Some(1), Some("abcdefghij0123456789".into()), false, None, Some(0))
        .await
        .unwrap();
    assert_eq!(result.status, "OK");
    assert_eq!(result.sl, 100, "no configured siblings means replication is vacuously complete");
}

#[tokio::test]
async fn disabled_key_is_rejected_without_writing_counters() {
    let key = [0x5bu8; 16];
    let (validator, store) = build(1_700_000_000, key);

    let mut disabled = store.get_or_create(PUBLIC_NAME, 1_700_000_000).await.unwrap();
    disabled.active = false;
    store.seed_key(disabled);

    let otp = otp_for(key, 1, 0);
    let err = validator
        .verify(otp, Some(1), Some("abcdefghij0123456789".into()), false, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.wire_status(), "DISABLED_TOKEN");

    let still_sentinel = store.get_or_create(PUBLIC_NAME, 1_700_000_000).await.unwrap();
    assert_eq!(still_sentinel.yk_counter, yubikey_valsrv::model::NEVER);
}

#[tokio::test]
async fn timestamp_requested_returns_session_fields() {
    let key = [0x5cu8; 16];
    let (validator, _store) = build(1_700_000_000, key);
    let otp = otp_for(key, 3, 1);

    let result = validator
        .verify(otp, Some(1), Some("abcdefghij0123456789".into()), true, None, None)
        .await
        .unwrap();
    assert_eq!(result.sessioncounter, Some(3));
    assert_eq!(result.sessionuse, Some(1));
    assert!(result.timestamp.is_some());
}
