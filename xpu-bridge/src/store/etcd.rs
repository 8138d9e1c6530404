//! Implementation of an etcd key-value store.

use super::{Connect, Delete, Get, List, Put, Store, StoreError};
use async_trait::async_trait;
use etcd_client::{Client, GetOptions};
use snafu::ResultExt;

/// etcd client
#[derive(Clone)]
pub struct Etcd(Client);

impl std::fmt::Debug for Etcd {
    fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Ok(())
    }
}

impl Etcd {
    /// Create a new instance of the etcd client
    pub async fn new(endpoint: &str) -> Result<Etcd, StoreError> {
        Ok(Self(
            Client::connect([endpoint], None).await.context(Connect {})?,
        ))
    }
}

#[async_trait]
impl Store for Etcd {
    /// 'Put' a key-value pair into etcd.
    async fn put_kv(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut client = self.0.clone();
        client.put(key, value, None).await.context(Put {
            key: key.to_string(),
        })?;
        Ok(())
    }

    /// 'Get' the value for the given key from etcd.
    async fn get_kv(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut client = self.0.clone();
        let resp = client.get(key, None).await.context(Get {
            key: key.to_string(),
        })?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    /// 'Delete' the entry with the given key from etcd.
    async fn delete_kv(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.0.clone();
        client.delete(key, None).await.context(Delete {
            key: key.to_string(),
        })?;
        Ok(())
    }

    /// Range scan over a key prefix; etcd returns the range sorted by key.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut client = self.0.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .context(List {
                prefix: prefix.to_string(),
            })?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).to_string(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }

    async fn online(&self) -> bool {
        let mut client = self.0.clone();
        client.status().await.is_ok()
    }
}
