//! In-memory `CounterStore`/`QueueStore` test double, used by unit and
//! scenario tests in place of the `sqlx` backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::model::{ClientRecord, Counters, KeyRecord, QueueEntry};
use crate::store::{CounterStore, QueueStore};

#[derive(Default)]
pub struct InMemoryStore {
    keys: Mutex<HashMap<String, KeyRecord>>,
    clients: Mutex<HashMap<i64, ClientRecord>>,
    queue: Mutex<Vec<QueueEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(self, client: ClientRecord) -> Self {
        self.clients.lock().unwrap().insert(client.client_id, client.clone());
        self
    }

    pub fn seed_key(&self, record: KeyRecord) {
        self.keys.lock().unwrap().insert(record.public_name.clone(), record);
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn get_or_create(&self, public_name: &str, created: i64) -> Result<KeyRecord, StoreError> {
        let mut keys = self.keys.lock().unwrap();
        Ok(keys
            .entry(public_name.to_string())
            .or_insert_with(|| KeyRecord::sentinel(public_name, created))
            .clone())
    }

    async fn conditional_update(&self, record: &KeyRecord) -> Result<bool, StoreError> {
        let mut keys = self.keys.lock().unwrap();
        let current = keys
            .get(&record.public_name)
            .cloned()
            .unwrap_or_else(|| KeyRecord::sentinel(&record.public_name, record.created));
        if Counters::gt(record.counters(), current.counters()) {
            keys.insert(record.public_name.clone(), record.clone());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_client(&self, client_id: i64) -> Result<ClientRecord, StoreError> {
        self.clients
            .lock()
            .unwrap()
            .get(&client_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("client {client_id}")))
    }

    async fn list_active_identities(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .values()
            .filter(|k| k.active)
            .map(|k| k.public_name.clone())
            .collect())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), StoreError> {
        self.queue.lock().unwrap().push(entry);
        Ok(())
    }

    async fn get_queue(&self, modified: i64, server_nonce: &str) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.modified == modified && e.server_nonce == server_nonce)
            .cloned()
            .collect())
    }

    async fn remove(&self, server_url: &str, modified: i64, server_nonce: &str) -> Result<(), StoreError> {
        self.queue.lock().unwrap().retain(|e| {
            !(e.server_url == server_url && e.modified == modified && e.server_nonce == server_nonce)
        });
        Ok(())
    }

    async fn null_queued(&self, server_url: &str, modified: i64, server_nonce: &str) -> Result<(), StoreError> {
        let mut queue = self.queue.lock().unwrap();
        for entry in queue.iter_mut() {
            if entry.server_url == server_url && entry.modified == modified && entry.server_nonce == server_nonce {
                entry.queued = None;
            }
        }
        Ok(())
    }

    async fn list_active(&self, server_url: &str) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.server_url == server_url && e.queued.is_some())
            .cloned()
            .collect())
    }

    async fn list_due_for_redrive(&self) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.queued.is_none())
            .cloned()
            .collect())
    }
}
