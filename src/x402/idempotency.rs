//! Idempotency tokens for paid requests
//!
//! One token per (payer, url, method). A caller that retries a whole paid
//! operation after a transport failure gets the same token back, and the
//! server side deduplicates settlement on it. Entries are written once and
//! never updated; only [`IdempotencyStore::invalidate`] removes them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::RwLock;
use tracing::debug;

use crate::prelude::{FIELD_SEPARATOR, RwArc};
use crate::sha256_namespaced;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// The token for this key, minting one on first use
    async fn get_or_create(&self, payer: &str, url: &str, method: &str) -> String;

    /// Drop one payer's tokens, or every token when `payer` is `None`
    async fn invalidate(&self, payer: Option<&str>);
}

type RecordKey = (String, String, String);

/// In-memory [`IdempotencyStore`]
#[derive(Debug, Clone, Default)]
pub struct IdempotencyRegistry {
    records: RwArc<HashMap<RecordKey, String>>,
}

static SHARED: Lazy<Arc<IdempotencyRegistry>> =
    Lazy::new(|| Arc::new(IdempotencyRegistry::new()));

impl IdempotencyRegistry {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The process-wide registry
    pub fn shared() -> Arc<IdempotencyRegistry> {
        SHARED.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn mint(payer: &str, url: &str, method: &str) -> String {
        let salt: [u8; 32] = rand::random();
        let digest = sha256_namespaced!(
            b"swap402.idempotency",
            payer.as_bytes(),
            FIELD_SEPARATOR,
            url.as_bytes(),
            FIELD_SEPARATOR,
            method.to_ascii_uppercase().as_bytes(),
            FIELD_SEPARATOR,
            &salt
        );
        hex::encode(digest)
    }
}

#[async_trait]
impl IdempotencyStore for IdempotencyRegistry {
    async fn get_or_create(&self, payer: &str, url: &str, method: &str) -> String {
        let key = (
            payer.to_string(),
            url.to_string(),
            method.to_ascii_uppercase(),
        );

        if let Some(token) = self.records.read().await.get(&key) {
            return token.clone();
        }

        // Another caller may have inserted between the read and write locks;
        // the entry API keeps whichever token landed first.
        let mut records = self.records.write().await;
        records
            .entry(key)
            .or_insert_with(|| {
                debug!(payer, url, method, "minted idempotency token");
                Self::mint(payer, url, method)
            })
            .clone()
    }

    async fn invalidate(&self, payer: Option<&str>) {
        let mut records = self.records.write().await;
        match payer {
            Some(payer) => records.retain(|(p, _, _), _| p != payer),
            None => records.clear(),
        }
    }
}
