//! Coordinator for backing volumes: the AIO, Null and Malloc bdevs other
//! resources reference by name. All three kinds live in the shared
//! `volumes/` namespace.

use crate::{
    api::{self, names},
    error::{self, OpError},
    orch::{plan::DeleteReport, resolve_id, CtxRef},
};

#[derive(Clone, Debug)]
pub struct VolumeCoordinator {
    ctx: CtxRef,
}

impl VolumeCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    fn validate(spec: &api::VolumeSpec) -> Result<(), OpError> {
        match spec {
            api::VolumeSpec::Aio(aio) => {
                if aio.filename.is_empty() {
                    return Err(OpError::invalid("aio volume requires a filename"));
                }
                if aio.block_size < 0 {
                    return Err(OpError::invalid("block size cannot be negative"));
                }
            }
            api::VolumeSpec::Null(null) => {
                if null.block_size <= 0 || null.blocks_count <= 0 {
                    return Err(OpError::invalid(
                        "null volume requires a block size and a block count",
                    ));
                }
            }
            api::VolumeSpec::Malloc(malloc) => {
                if malloc.block_size <= 0 || malloc.blocks_count <= 0 {
                    return Err(OpError::invalid(
                        "malloc volume requires a block size and a block count",
                    ));
                }
            }
            api::VolumeSpec::Encrypted(_) => {
                return Err(OpError::invalid(
                    "encrypted volumes are managed by their own coordinator",
                ));
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn create(
        &self,
        id: Option<String>,
        spec: api::VolumeSpec,
    ) -> Result<api::Volume, OpError> {
        let id = resolve_id(id)?;
        let name = names::volume(&id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        Self::validate(&spec)?;
        let record = api::Volume {
            name: name.clone(),
            spec,
        };
        if let Some(existing) = self.ctx.store.get::<api::Volume>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        match &record.spec {
            api::VolumeSpec::Aio(aio) => {
                self.ctx
                    .spdk
                    .bdev_aio_create(&id, &aio.filename, aio.block_size)
                    .await?;
            }
            api::VolumeSpec::Null(null) => {
                self.ctx
                    .spdk
                    .bdev_null_create(&id, null.blocks_count, null.block_size)
                    .await?;
            }
            api::VolumeSpec::Malloc(malloc) => {
                self.ctx
                    .spdk
                    .bdev_malloc_create(
                        &id,
                        malloc.blocks_count,
                        malloc.block_size,
                        malloc.uuid.as_deref(),
                    )
                    .await?;
            }
            api::VolumeSpec::Encrypted(_) => {
                return Err(OpError::invalid(
                    "encrypted volumes are managed by their own coordinator",
                ));
            }
        }

        if let Err(err) = self.ctx.store.set(&name, &record).await {
            if let Err(undo) = self.destroy_bdev(&id, &record.spec).await {
                error!(error = %undo, "compensation 'delete bdev' failed");
            }
            return Err(err.into());
        }
        Ok(record)
    }

    async fn destroy_bdev(&self, id: &str, spec: &api::VolumeSpec) -> Result<(), OpError> {
        match spec {
            api::VolumeSpec::Aio(_) => self.ctx.spdk.bdev_aio_delete(id).await?,
            api::VolumeSpec::Null(_) => self.ctx.spdk.bdev_null_delete(id).await?,
            api::VolumeSpec::Malloc(_) => self.ctx.spdk.bdev_malloc_delete(id).await?,
            api::VolumeSpec::Encrypted(_) => {
                return Err(OpError::invalid(
                    "encrypted volumes are managed by their own coordinator",
                ))
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let volume = match self.ctx.store.get::<api::Volume>(name).await? {
            Some(volume) => volume,
            None if allow_missing => return Ok(()),
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        if matches!(volume.spec, api::VolumeSpec::Encrypted(_)) {
            return Err(OpError::invalid(
                "encrypted volumes are managed by their own coordinator",
            ));
        }

        let id = names::last_segment(name).to_string();
        let mut report = DeleteReport::new(name);
        let step = match volume.spec {
            api::VolumeSpec::Aio(_) => "bdev_aio_delete",
            api::VolumeSpec::Null(_) => "bdev_null_delete",
            api::VolumeSpec::Malloc(_) => "bdev_malloc_delete",
            api::VolumeSpec::Encrypted(_) => "bdev_crypto_delete",
        };
        report.record(step, self.destroy_bdev(&id, &volume.spec).await);
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    /// Fetch the record and cross-check the bdev on the data-plane.
    pub async fn get(&self, name: &str) -> Result<api::Volume, OpError> {
        let volume = match self.ctx.store.get::<api::Volume>(name).await? {
            Some(volume) if !matches!(volume.spec, api::VolumeSpec::Encrypted(_)) => volume,
            _ => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        let bdevs = self
            .ctx
            .spdk
            .bdev_get_bdevs(Some(names::last_segment(name)))
            .await?;
        crate::spdk::expect_single(bdevs, "bdev_get_bdevs")?;
        Ok(volume)
    }

    /// List backing volumes, optionally restricted to one kind.
    pub async fn list(
        &self,
        kind: Option<&str>,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::Volume>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/", names::VOLUMES);
        let mut volumes: Vec<api::Volume> = self.ctx.store.list(&prefix).await?;
        volumes.retain(|volume| !matches!(volume.spec, api::VolumeSpec::Encrypted(_)));
        if let Some(kind) = kind {
            volumes.retain(|volume| volume.spec.kind() == kind);
        }
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
