//! Key-value persistence of resource metadata: a pluggable backend trait
//! with its error codes, plus the typed facade the coordinators use. Keys
//! are canonical resource names, values json-serialized records.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;

mod etcd;
mod mem;

pub use etcd::Etcd;
pub use mem::MemStore;

/// Definition of errors that can be returned from the key-value store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum StoreError {
    /// Failed to connect to the key-value store.
    #[snafu(display("Failed to connect to store. Error {}", source))]
    Connect { source: etcd_client::Error },
    /// Failed to 'put' an entry in the store.
    #[snafu(display("Failed to 'put' entry with key {}. Error {}", key, source))]
    Put {
        key: String,
        source: etcd_client::Error,
    },
    /// Failed to 'get' an entry from the store.
    #[snafu(display("Failed to 'get' entry with key {}. Error {}", key, source))]
    Get {
        key: String,
        source: etcd_client::Error,
    },
    /// Failed to 'delete' an entry from the store.
    #[snafu(display("Failed to 'delete' entry with key {}. Error {}", key, source))]
    Delete {
        key: String,
        source: etcd_client::Error,
    },
    /// Failed to list entries under a prefix.
    #[snafu(display("Failed to list entries under prefix {}. Error {}", prefix, source))]
    List {
        prefix: String,
        source: etcd_client::Error,
    },
    /// Failed to deserialise a value.
    #[snafu(display("Failed to deserialise value of key {}. Error {}", key, source))]
    DeserialiseValue {
        key: String,
        source: serde_json::Error,
    },
    /// Failed to serialise a value.
    #[snafu(display("Failed to serialise value. Error {}", source))]
    SerialiseValue { source: serde_json::Error },
}

/// Operations that can be performed on a key-value store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Put an entry into the store.
    async fn put_kv(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Get an entry from the store.
    async fn get_kv(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete an entry from the store.
    async fn delete_kv(&self, key: &str) -> Result<(), StoreError>;

    /// Range scan: all entries whose key starts with the prefix, ordered by
    /// key.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Identify whether or not the store is online.
    async fn online(&self) -> bool;
}

/// Typed facade over a store backend. The facade owns serialization so that
/// coordinators only ever see records, never bytes.
#[derive(Clone)]
pub struct MetaStore {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetaStore")
    }
}

impl MetaStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn set<V: Serialize + Sync>(&self, name: &str, value: &V) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).context(SerialiseValue)?;
        self.store.put_kv(name, bytes).await
    }

    pub async fn get<V: DeserializeOwned>(&self, name: &str) -> Result<Option<V>, StoreError> {
        match self.store.get_kv(name).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).context(DeserialiseValue {
                    key: name.to_string(),
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.store.delete_kv(name).await
    }

    /// All records under a collection prefix, ordered by name.
    pub async fn list<V: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<V>, StoreError> {
        let entries = self.store.get_prefix(prefix).await?;
        let mut values = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            values.push(serde_json::from_slice(&bytes).context(DeserialiseValue { key })?);
        }
        Ok(values)
    }

    /// Records under a prefix whose full key passes the filter, ordered by
    /// name. Collections whose prefix also covers nested collections use
    /// this to list only their direct members.
    pub async fn list_matching<V, F>(&self, prefix: &str, matches: F) -> Result<Vec<V>, StoreError>
    where
        V: DeserializeOwned,
        F: Fn(&str) -> bool,
    {
        let entries = self.store.get_prefix(prefix).await?;
        let mut values = Vec::new();
        for (key, bytes) in entries {
            if !matches(&key) {
                continue;
            }
            values.push(serde_json::from_slice(&bytes).context(DeserialiseValue { key })?);
        }
        Ok(values)
    }

    /// Number of entries under a prefix, for referential-integrity probes.
    pub async fn count(&self, prefix: &str) -> Result<usize, StoreError> {
        Ok(self.store.get_prefix(prefix).await?.len())
    }

    pub async fn online(&self) -> bool {
        self.store.online().await
    }
}
