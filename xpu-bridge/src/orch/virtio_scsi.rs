//! Coordinator for Virtio-SCSI controllers. These stay on the vhost socket
//! side only; there is no hypervisor hot-plug involved.

use crate::{
    api::{self, names},
    error::{self, OpError},
    orch::{plan::DeleteReport, resolve_id, CtxRef},
};

#[derive(Clone, Debug)]
pub struct VirtioScsiCoordinator {
    ctx: CtxRef,
}

impl VirtioScsiCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn create(
        &self,
        id: Option<String>,
        spec: api::VirtioScsiControllerSpec,
    ) -> Result<api::VirtioScsiController, OpError> {
        let id = resolve_id(id)?;
        let name = names::virtio_scsi_controller(&id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        let record = api::VirtioScsiController {
            name: name.clone(),
            spec,
        };
        if let Some(existing) = self
            .ctx
            .store
            .get::<api::VirtioScsiController>(&name)
            .await?
        {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        self.ctx.spdk.vhost_create_scsi_controller(&id).await?;
        if let Err(err) = self.ctx.store.set(&name, &record).await {
            if let Err(undo) = self.ctx.spdk.vhost_delete_controller(&id).await {
                error!(error = %undo, "compensation 'vhost_delete_controller' failed");
            }
            return Err(err.into());
        }
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        if self
            .ctx
            .store
            .get::<api::VirtioScsiController>(name)
            .await?
            .is_none()
        {
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
    pub async fn get(&self, name: &str) -> Result<api::VirtioScsiController, OpError> {
        let controller: api::VirtioScsiController = match self.ctx.store.get(name).await? {
            Some(controller) => controller,
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        let id = names::last_segment(name);
        let live = self.ctx.spdk.vhost_get_controllers(Some(id)).await?;
        crate::spdk::expect_single(live, "vhost_get_controllers")?;
        Ok(controller)
    }

    pub async fn list(
        &self,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::VirtioScsiController>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/", names::VIRTIO_SCSI_CONTROLLERS);
        let mut controllers: Vec<api::VirtioScsiController> =
            self.ctx.store.list(&prefix).await?;
        controllers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(controllers, offset, size))
    }
}
