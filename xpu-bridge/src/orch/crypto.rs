//! Coordinator for encrypted volumes: an accel crypto key plus a crypto
//! bdev stacked on the referenced base volume. The cipher dictates the key
//! material length exactly; the two half-keys are handed to the data-plane
//! hex-encoded.

use crate::{
    api::{self, names},
    error::{self, OpError},
    orch::{
        plan::{CompensationStack, DeleteReport},
        resolve_id, CtxRef,
    },
};

const AES_XTS: &str = "AES_XTS";

#[derive(Clone, Debug)]
pub struct EncryptedVolumeCoordinator {
    ctx: CtxRef,
}

impl EncryptedVolumeCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    fn validate(spec: &api::EncryptedVolumeSpec) -> Result<(), OpError> {
        if spec.volume_name_ref.is_empty() {
            return Err(OpError::invalid("volume reference is required"));
        }
        let expected = spec.cipher.key_size_bits();
        let provided = spec.key.len() * 8;
        if provided != expected {
            return Err(OpError::invalid(format!(
                "expected key size {}b, provided size {}b",
                expected, provided
            )));
        }
        Ok(())
    }

    /// The two hex-encoded half-keys of the xts pair.
    fn split_key(key: &[u8]) -> (String, String) {
        let half = key.len() / 2;
        (hex::encode(&key[.. half]), hex::encode(&key[half ..]))
    }

    #[tracing::instrument(level = "debug", skip(self, spec), err)]
    pub async fn create(
        &self,
        id: Option<String>,
        spec: api::EncryptedVolumeSpec,
    ) -> Result<api::Volume, OpError> {
        let id = resolve_id(id)?;
        let name = names::volume(&id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        Self::validate(&spec)?;
        let record = api::Volume {
            name: name.clone(),
            spec: api::VolumeSpec::Encrypted(spec.clone()),
        };
        if let Some(existing) = self.ctx.store.get::<api::Volume>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        let rollback = self.create_plan(&id, &spec).await?;
        if let Err(err) = self.ctx.store.set(&name, &record).await {
            rollback.unwind().await;
            return Err(err.into());
        }
        rollback.discard();
        Ok(record)
    }

    /// Key creation followed by the crypto bdev, each with its registered
    /// compensation.
    async fn create_plan(
        &self,
        id: &str,
        spec: &api::EncryptedVolumeSpec,
    ) -> Result<CompensationStack, OpError> {
        let mut rollback = CompensationStack::new();
        let (key, key2) = Self::split_key(&spec.key);

        self.ctx
            .spdk
            .accel_crypto_key_create(id, AES_XTS, &key, &key2)
            .await?;
        {
            let spdk = self.ctx.spdk.clone();
            let key_name = id.to_string();
            rollback.push("accel_crypto_key_destroy", async move {
                spdk.accel_crypto_key_destroy(&key_name).await.map_err(Into::into)
            });
        }

        if let Err(err) = self
            .ctx
            .spdk
            .bdev_crypto_create(id, &spec.volume_name_ref, id)
            .await
        {
            rollback.unwind().await;
            return Err(err.into());
        }
        {
            let spdk = self.ctx.spdk.clone();
            let bdev = id.to_string();
            rollback.push("bdev_crypto_delete", async move {
                spdk.bdev_crypto_delete(&bdev).await.map_err(Into::into)
            });
        }
        Ok(rollback)
    }

    /// Update re-keys the volume with a strict delete-then-create sequence;
    /// any failing step terminates the update with that step's error.
    #[tracing::instrument(level = "debug", skip(self, spec), err)]
    pub async fn update(
        &self,
        name: &str,
        spec: api::EncryptedVolumeSpec,
    ) -> Result<api::Volume, OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let existing = match self.ctx.store.get::<api::Volume>(name).await? {
            Some(existing) => existing,
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        if !matches!(existing.spec, api::VolumeSpec::Encrypted(_)) {
            return Err(OpError::invalid(format!(
                "volume '{}' is not an encrypted volume",
                name
            )));
        }
        Self::validate(&spec)?;

        let id = names::last_segment(name).to_string();
        let (key, key2) = Self::split_key(&spec.key);

        self.ctx.spdk.bdev_crypto_delete(&id).await?;
        self.ctx.spdk.accel_crypto_key_destroy(&id).await?;
        self.ctx
            .spdk
            .accel_crypto_key_create(&id, AES_XTS, &key, &key2)
            .await?;
        self.ctx
            .spdk
            .bdev_crypto_create(&id, &spec.volume_name_ref, &id)
            .await?;

        let record = api::Volume {
            name: name.to_string(),
            spec: api::VolumeSpec::Encrypted(spec),
        };
        self.ctx.store.set(name, &record).await?;
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let existing = self.ctx.store.get::<api::Volume>(name).await?;
        match existing {
            Some(api::Volume {
                spec: api::VolumeSpec::Encrypted(_),
                ..
            }) => (),
            Some(_) => {
                return Err(OpError::invalid(format!(
                    "volume '{}' is not an encrypted volume",
                    name
                )))
            }
            None if allow_missing => return Ok(()),
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        }

        let id = names::last_segment(name).to_string();
        let mut report = DeleteReport::new(name);
        report.record(
            "bdev_crypto_delete",
            self.ctx.spdk.bdev_crypto_delete(&id).await.map_err(Into::into),
        );
        report.record(
            "accel_crypto_key_destroy",
            self.ctx
                .spdk
                .accel_crypto_key_destroy(&id)
                .await
                .map_err(Into::into),
        );
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    pub async fn get(&self, name: &str) -> Result<api::Volume, OpError> {
        match self.ctx.store.get::<api::Volume>(name).await? {
            Some(volume) if matches!(volume.spec, api::VolumeSpec::Encrypted(_)) => Ok(volume),
            _ => error::NotFound {
                name: name.to_string(),
            }
            .fail(),
        }
    }

    pub async fn list(
        &self,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::Volume>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/", names::VOLUMES);
        let mut volumes: Vec<api::Volume> = self.ctx.store.list(&prefix).await?;
        volumes.retain(|volume| matches!(volume.spec, api::VolumeSpec::Encrypted(_)));
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(volumes, offset, size))
    }

    pub async fn stats(&self, name: &str) -> Result<api::VolumeStats, OpError> {
        let volume = self.get(name).await?;
        let stat = self
            .ctx
            .spdk
            .bdev_get_iostat(names::last_segment(&volume.name))
            .await?;
        Ok(stat.into())
    }
}
