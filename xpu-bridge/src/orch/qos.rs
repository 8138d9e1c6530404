//! Coordinator for QoS volumes: a max-rate throttle applied to an existing
//! volume with a single data-plane call. Only max limits are supported and
//! the underlying volume of a QoS record can never change.

use crate::{
    api::{self, names},
    error::{self, OpError},
    orch::{plan::DeleteReport, resolve_id, CtxRef},
    spdk,
};

#[derive(Clone, Debug)]
pub struct QosVolumeCoordinator {
    ctx: CtxRef,
}

impl QosVolumeCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    fn validate(spec: &api::QosVolumeSpec) -> Result<(), OpError> {
        if spec.volume_name_ref.is_empty() {
            return Err(OpError::invalid("volume reference is required"));
        }
        if spec.min_limit.is_some() {
            return Err(OpError::invalid("min limits are not supported"));
        }
        let max = &spec.max_limit;
        if max.rd_iops_kiops != 0 {
            return Err(OpError::invalid("read iops limit is not supported"));
        }
        if max.wr_iops_kiops != 0 {
            return Err(OpError::invalid("write iops limit is not supported"));
        }
        if max.rw_iops_kiops < 0 || max.rd_mbs < 0 || max.wr_mbs < 0 || max.rw_mbs < 0 {
            return Err(OpError::invalid("limit values cannot be negative"));
        }
        if max.rw_iops_kiops == 0 && max.rd_mbs == 0 && max.wr_mbs == 0 && max.rw_mbs == 0 {
            return Err(OpError::invalid("at least one limit must be set"));
        }
        Ok(())
    }

    fn limit_args(volume_ref: &str, max: &api::QosLimit) -> spdk::QosLimitArgs {
        spdk::QosLimitArgs {
            name: volume_ref.to_string(),
            rw_ios_per_sec: max.rw_iops_kiops * 1000,
            r_mbytes_per_sec: max.rd_mbs,
            w_mbytes_per_sec: max.wr_mbs,
            rw_mbytes_per_sec: max.rw_mbs,
        }
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn create(
        &self,
        id: Option<String>,
        spec: api::QosVolumeSpec,
    ) -> Result<api::QosVolume, OpError> {
        let id = resolve_id(id)?;
        let name = names::qos_volume(&id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        Self::validate(&spec)?;
        let record = api::QosVolume {
            name: name.clone(),
            spec,
        };
        if let Some(existing) = self.ctx.store.get::<api::QosVolume>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        let args = Self::limit_args(&record.spec.volume_name_ref, &record.spec.max_limit);
        self.ctx.spdk.bdev_set_qos_limit(&args).await?;

        if let Err(err) = self.ctx.store.set(&name, &record).await {
            let reset = Self::limit_args(&record.spec.volume_name_ref, &api::QosLimit::default());
            if let Err(undo) = self.ctx.spdk.bdev_set_qos_limit(&reset).await {
                error!(error = %undo, "compensation 'bdev_set_qos_limit' failed");
            }
            return Err(err.into());
        }
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn update(
        &self,
        name: &str,
        spec: api::QosVolumeSpec,
    ) -> Result<api::QosVolume, OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let existing = match self.ctx.store.get::<api::QosVolume>(name).await? {
            Some(existing) => existing,
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        if existing.spec.volume_name_ref != spec.volume_name_ref {
            return Err(OpError::invalid(format!(
                "Change of underlying volume {} to a new one {} is forbidden",
                existing.spec.volume_name_ref, spec.volume_name_ref
            )));
        }
        Self::validate(&spec)?;

        let args = Self::limit_args(&spec.volume_name_ref, &spec.max_limit);
        self.ctx.spdk.bdev_set_qos_limit(&args).await?;

        let record = api::QosVolume {
            name: name.to_string(),
            spec,
        };
        self.ctx.store.set(name, &record).await?;
        Ok(record)
    }

    /// Deleting a QoS volume lifts the throttle by resetting every limit to
    /// zero, the data-plane's unset encoding.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let existing = match self.ctx.store.get::<api::QosVolume>(name).await? {
            Some(existing) => existing,
            None if allow_missing => return Ok(()),
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };

        let mut report = DeleteReport::new(name);
        let reset = Self::limit_args(&existing.spec.volume_name_ref, &api::QosLimit::default());
        report.record(
            "bdev_set_qos_limit",
            self.ctx.spdk.bdev_set_qos_limit(&reset).await.map_err(Into::into),
        );
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    pub async fn get(&self, name: &str) -> Result<api::QosVolume, OpError> {
        match self.ctx.store.get(name).await? {
            Some(volume) => Ok(volume),
            None => error::NotFound {
                name: name.to_string(),
            }
            .fail(),
        }
    }

    pub async fn list(
        &self,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::QosVolume>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/", names::QOS_VOLUMES);
        let mut volumes: Vec<api::QosVolume> = self.ctx.store.list(&prefix).await?;
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(volumes, offset, size))
    }

    pub async fn stats(&self, name: &str) -> Result<api::VolumeStats, OpError> {
        let volume = self.get(name).await?;
        let stat = self
            .ctx
            .spdk
            .bdev_get_iostat(&volume.spec.volume_name_ref)
            .await?;
        Ok(stat.into())
    }
}
