//! Coordinator for Virtio-blk devices: a data-plane vhost controller whose
//! socket is hot-plugged into the guest as a vhost-user-blk PCI device.

use crate::{
    api::{self, names},
    error::{self, OpError},
    monitor::to_hypervisor_id,
    orch::{
        plan::{CompensationStack, DeleteReport},
        resolve_id, CtxRef,
    },
};

const VHOST_BLK_DRIVER: &str = "vhost-user-blk-pci";

#[derive(Clone, Debug)]
pub struct VirtioBlkCoordinator {
    ctx: CtxRef,
}

impl VirtioBlkCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn create(
        &self,
        id: Option<String>,
        spec: api::VirtioBlkSpec,
    ) -> Result<api::VirtioBlk, OpError> {
        let id = resolve_id(id)?;
        let name = names::virtio_blk(&id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        if spec.volume_name_ref.is_empty() {
            return Err(OpError::invalid("volume reference is required"));
        }
        let pcie = match spec.pcie {
            Some(pcie) => pcie,
            None => return error::NoPcieEndpoint { name }.fail(),
        };
        let record = api::VirtioBlk {
            name: name.clone(),
            spec,
        };

        if let Some(existing) = self.ctx.store.get::<api::VirtioBlk>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        let location = self.ctx.locator.calculate(pcie.physical_function)?;
        super::ensure_location_free(&self.ctx, &location).await?;

        let mut rollback = CompensationStack::new();
        self.ctx
            .spdk
            .vhost_create_blk_controller(&id, &record.spec.volume_name_ref)
            .await?;
        {
            let spdk = self.ctx.spdk.clone();
            let ctrlr = id.clone();
            rollback.push("vhost_delete_controller", async move {
                spdk.vhost_delete_controller(&ctrlr).await.map_err(Into::into)
            });
        }

        if let Some(monitor) = &self.ctx.monitor {
            let mut session = match monitor.session().await {
                Ok(session) => session,
                Err(err) => {
                    rollback.unwind().await;
                    return Err(err);
                }
            };
            let hyp_id = to_hypervisor_id(&id);
            let socket = self.ctx.ctrlr_dir.join(&id).display().to_string();

            if let Err(err) = session.chardev_add(&hyp_id, &socket).await {
                rollback.unwind().await;
                return Err(err);
            }
            {
                let monitor = monitor.clone();
                let hyp_id = hyp_id.clone();
                rollback.push("chardev-remove", async move {
                    monitor.session().await?.chardev_remove(&hyp_id).await
                });
            }

            if let Err(err) = session
                .device_add(VHOST_BLK_DRIVER, &hyp_id, Some(&hyp_id), None, &location)
                .await
            {
                rollback.unwind().await;
                return Err(err);
            }
            {
                let monitor = monitor.clone();
                rollback.push("device_del", async move {
                    monitor.session().await?.device_del(&hyp_id).await
                });
            }
        }

        if let Err(err) = self.ctx.store.set(&name, &record).await {
            rollback.unwind().await;
            return Err(err.into());
        }
        rollback.discard();
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        if self.ctx.store.get::<api::VirtioBlk>(name).await?.is_none() {
            if allow_missing {
                return Ok(());
            }
            return error::NotFound {
                name: name.to_string(),
            }
            .fail();
        }
        let id = names::last_segment(name).to_string();

        let mut report = DeleteReport::new(name);
        if let Some(monitor) = &self.ctx.monitor {
            let hyp_id = to_hypervisor_id(&id);
            match monitor.session().await {
                Ok(mut session) => {
                    report.record("device_del", session.device_del(&hyp_id).await);
                    report.record("chardev-remove", session.chardev_remove(&hyp_id).await);
                }
                Err(err) => {
                    report.record("hypervisor session", Err(err));
                }
            }
        }
        report.record(
            "vhost_delete_controller",
            self.ctx
                .spdk
                .vhost_delete_controller(&id)
                .await
                .map_err(Into::into),
        );
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    /// Fetch the record and cross-check the vhost controller on the
    /// data-plane.
    pub async fn get(&self, name: &str) -> Result<api::VirtioBlk, OpError> {
        let blk: api::VirtioBlk = match self.ctx.store.get(name).await? {
            Some(blk) => blk,
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        let id = names::last_segment(name);
        let controllers = self.ctx.spdk.vhost_get_controllers(Some(id)).await?;
        crate::spdk::expect_single(controllers, "vhost_get_controllers")?;
        Ok(blk)
    }

    pub async fn list(
        &self,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::VirtioBlk>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/", names::VIRTIO_BLKS);
        let mut blks: Vec<api::VirtioBlk> = self.ctx.store.list(&prefix).await?;
        blks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(blks, offset, size))
    }

    /// I/O statistics of the exported volume.
    pub async fn stats(&self, name: &str) -> Result<api::VolumeStats, OpError> {
        let blk = self.get(name).await?;
        let stat = self.ctx.spdk.bdev_get_iostat(&blk.spec.volume_name_ref).await?;
        Ok(stat.into())
    }
}
