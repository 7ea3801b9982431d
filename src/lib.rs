//! A multi-replica validation service for Yubico's OTP protocol (v2.0).
//!
//! A single process decrypts a one-time password, reconciles its counters
//! against a local store, replicates the acceptance to sibling replicas under
//! a configurable sync-level quorum, and rejects replays and clock-skewed
//! ("phishing") tokens. See `SPEC_FULL.md` for the full component breakdown.
//!
//! # Modules
//!
//! - [`model`] — the data model: key/client/queue records, the OTP parameter bag.
//! - [`modhex`] — Yubico's 16-symbol alphabet.
//! - [`error`] — per-component error types and the wire error kinds.
//! - [`clock`] — wall-clock access and nonce generation.
//! - [`signer`] — canonical HMAC-SHA1 request signing.
//! - [`ksm`] — Key Storage Module clients (in-process AES, remote HTTP).
//! - [`store`] — `CounterStore`/`QueueStore` traits plus SQLite and in-memory implementations.
//! - [`sync_engine`] — outbound/inbound cross-replica replication.
//! - [`validator`] — the six-step `verify` pipeline.
//! - [`wire`] — HTTP query/response shapes.
//! - [`client`] — signed verify-query builder for callers.
//! - [`config`] — server configuration loading.
//! - [`handlers`] — the axum HTTP surface.

pub mod clock;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ksm;
pub mod model;
pub mod modhex;
pub mod sig_down;
pub mod signer;
pub mod store;
pub mod sync_engine;
pub mod telemetry;
pub mod validator;
pub mod wire;
