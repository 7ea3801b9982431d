//! Storage traits (`spec.md` §3/§4.1), object-safe and `async_trait`-based so
//! the Validator and Sync engine are generic over persistence and testable
//! without a database, matching the shape of the teacher's `ProviderMap` /
//! `Facilitator` traits.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{ClientRecord, KeyRecord, QueueEntry};

/// The per-key counter table (`spec.md` §4.1).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Load the current record for `public_name`, autovivifying a sentinel
    /// record (`spec.md` I2) if none exists yet.
    async fn get_or_create(&self, public_name: &str, created: i64) -> Result<KeyRecord, StoreError>;

    /// Apply the accepted record iff its counters are strictly greater than
    /// what's currently stored, in one round trip (`spec.md` §4.1/§5).
    /// Returns `true` if the write took effect.
    async fn conditional_update(&self, record: &KeyRecord) -> Result<bool, StoreError>;

    /// Look up a client by id for the verify-request authorization check.
    async fn get_client(&self, client_id: i64) -> Result<ClientRecord, StoreError>;

    /// All active `public_name`s, for a full-fleet resync (`spec.md` §4.1's
    /// `list_active(public_name | "all")`).
    async fn list_active_identities(&self) -> Result<Vec<String>, StoreError>;
}

/// The replication outbox (`spec.md` §3/§4.4).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Add a row awaiting a sibling's confirmation.
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), StoreError>;

    /// Read all outbox rows matching `(modified, server_nonce)` — one per
    /// sibling (`spec.md` §4.1's `dequeue`, and Outbound step 1; a read, not
    /// a destructive pop, despite the name the spec gives it).
    async fn get_queue(&self, modified: i64, server_nonce: &str) -> Result<Vec<QueueEntry>, StoreError>;

    /// Mark a queued row confirmed by its sibling (removes it from the
    /// outbox; `remove(server, modified, server_nonce)` in `spec.md` §4.1).
    async fn remove(&self, server_url: &str, modified: i64, server_nonce: &str) -> Result<(), StoreError>;

    /// Mark a row abandoned without deleting it: `queued = NULL`, left for a
    /// background drainer (`null_queue` in the original).
    async fn null_queued(&self, server_url: &str, modified: i64, server_nonce: &str) -> Result<(), StoreError>;

    /// All rows for a given sibling still awaiting confirmation.
    async fn list_active(&self, server_url: &str) -> Result<Vec<QueueEntry>, StoreError>;

    /// Rows with `queued IS NULL`: the primitive a redrive daemon would poll.
    async fn list_due_for_redrive(&self) -> Result<Vec<QueueEntry>, StoreError>;
}
