//! Coordinators for Nvme-over-Fabrics remote controllers and their paths.
//! A remote controller is pure metadata until paths attach to it; each path
//! maps to one `bdev_nvme_attach_controller` call against the data-plane,
//! all paths of one controller sharing the controller's bdev name so the
//! data-plane stacks them into a multipath set.

use crate::{
    api::{self, names},
    error::{self, OpError},
    orch::{plan::DeleteReport, resolve_id, CtxRef},
    spdk,
};
use snafu::ensure;
use std::path::Path;

#[derive(Clone, Debug)]
pub struct RemoteControllerCoordinator {
    ctx: CtxRef,
}

impl RemoteControllerCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    fn validate(spec: &api::RemoteControllerSpec) -> Result<(), OpError> {
        if spec.trtype == api::TrType::VfioUser {
            return Err(OpError::invalid(
                "remote controllers do not support the VFIOUSER transport",
            ));
        }
        if spec.psk.is_some() && spec.trtype != api::TrType::Tcp {
            return Err(OpError::invalid("PSK is only supported on TCP transports"));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, spec), err)]
    pub async fn create(
        &self,
        id: Option<String>,
        spec: api::RemoteControllerSpec,
    ) -> Result<api::RemoteController, OpError> {
        let id = resolve_id(id)?;
        let name = names::remote_controller(&id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        Self::validate(&spec)?;
        let record = api::RemoteController {
            name: name.clone(),
            spec,
        };
        if let Some(existing) = self.ctx.store.get::<api::RemoteController>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        // a remote controller is metadata only; the data-plane is touched
        // once paths attach
        self.ctx.store.set(&name, &record).await?;
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self, spec), err)]
    pub async fn update(
        &self,
        name: &str,
        spec: api::RemoteControllerSpec,
    ) -> Result<api::RemoteController, OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        ensure!(
            self.ctx
                .store
                .get::<api::RemoteController>(name)
                .await?
                .is_some(),
            error::NotFound {
                name: name.to_string(),
            }
        );
        let paths = self.ctx.store.count(&format!("{}/", name)).await?;
        ensure!(
            paths == 0,
            error::HasChildren {
                name: name.to_string(),
                children: paths,
            }
        );
        Self::validate(&spec)?;

        let record = api::RemoteController {
            name: name.to_string(),
            spec,
        };
        self.ctx.store.set(name, &record).await?;
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        if self
            .ctx
            .store
            .get::<api::RemoteController>(name)
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

        // paths must be detached first
        let paths = self.ctx.store.count(&format!("{}/", name)).await?;
        ensure!(
            paths == 0,
            error::HasChildren {
                name: name.to_string(),
                children: paths,
            }
        );

        self.ctx.store.delete(name).await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<api::RemoteController, OpError> {
        match self.ctx.store.get(name).await? {
            Some(controller) => Ok(controller),
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
    ) -> Result<(Vec<api::RemoteController>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/", names::NVME_REMOTE_CONTROLLERS);
        let mut controllers: Vec<api::RemoteController> = self
            .ctx
            .store
            .list_matching(&prefix, |key| {
                names::parse(key, &[names::NVME_REMOTE_CONTROLLERS]).is_some()
            })
            .await?;
        controllers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(controllers, offset, size))
    }

    /// The data-plane's view of the attached controller; the result must
    /// contain exactly one entry.
    pub async fn stats(&self, name: &str) -> Result<serde_json::Value, OpError> {
        let _controller = self.get(name).await?;
        let id = names::last_segment(name);
        let controllers = self.ctx.spdk.bdev_nvme_get_controllers(Some(id)).await?;
        let info = spdk::expect_single(controllers, "bdev_nvme_get_controllers")?;
        Ok(serde_json::json!({ "name": info.name }))
    }
}

#[derive(Clone, Debug)]
pub struct RemotePathCoordinator {
    ctx: CtxRef,
}

impl RemotePathCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    fn validate(spec: &api::RemotePathSpec) -> Result<(), OpError> {
        if spec.traddr.is_empty() {
            return Err(OpError::invalid("path requires a traddr"));
        }
        if spec.trtype == api::TrType::Tcp && spec.trsvcid.is_empty() {
            return Err(OpError::invalid("TCP paths require a trsvcid"));
        }
        Ok(())
    }

    async fn parent(&self, parent: &str) -> Result<api::RemoteController, OpError> {
        match self.ctx.store.get(parent).await? {
            Some(controller) => Ok(controller),
            None => error::NotFound {
                name: parent.to_string(),
            }
            .fail(),
        }
    }

    fn attach_args(
        controller_id: &str,
        controller: &api::RemoteControllerSpec,
        spec: &api::RemotePathSpec,
        psk_path: Option<&Path>,
    ) -> spdk::AttachControllerArgs {
        spdk::AttachControllerArgs {
            name: controller_id.to_string(),
            trtype: spec.trtype.to_string(),
            traddr: spec.traddr.clone(),
            adrfam: spec.adrfam.map(|adrfam| adrfam.to_string()),
            trsvcid: (!spec.trsvcid.is_empty()).then(|| spec.trsvcid.clone()),
            subnqn: spec.subnqn.clone(),
            hostnqn: spec.hostnqn.clone(),
            multipath: Some(controller.multipath.to_string()),
            hdgst: Some(controller.hdgst),
            ddgst: Some(controller.ddgst),
            psk: psk_path.map(|path| path.display().to_string()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn create(
        &self,
        parent: &str,
        id: Option<String>,
        spec: api::RemotePathSpec,
    ) -> Result<api::RemotePath, OpError> {
        let parent_ids = names::parse(parent, &[names::NVME_REMOTE_CONTROLLERS])
            .ok_or_else(|| OpError::invalid(format!("invalid parent name '{}'", parent)))?;
        let controller_id = parent_ids[0].to_string();
        let id = resolve_id(id)?;
        let name = names::remote_path(&controller_id, &id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        Self::validate(&spec)?;
        let record = api::RemotePath {
            name: name.clone(),
            spec,
        };
        if let Some(existing) = self.ctx.store.get::<api::RemotePath>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        let controller = self.parent(parent).await?;

        // PSK material lives in a transient key file for the duration of
        // the attach call
        let psk_path = match &controller.spec.psk {
            Some(psk) => {
                let path = self.ctx.ctrlr_dir.join(format!("{}.psk", controller_id));
                super::controller::write_key_file(&path, psk)?;
                Some(path)
            }
            None => None,
        };
        let args = Self::attach_args(
            &controller_id,
            &controller.spec,
            &record.spec,
            psk_path.as_deref(),
        );
        let attach = self.ctx.spdk.bdev_nvme_attach_controller(&args).await;
        if let Some(path) = &psk_path {
            if let Err(error) = super::controller::remove_path(path) {
                error!(%error, "could not remove transient key file");
            }
        }
        attach?;

        if let Err(err) = self.ctx.store.set(&name, &record).await {
            let detach = spdk::DetachControllerArgs {
                name: controller_id.clone(),
                trtype: Some(record.spec.trtype.to_string()),
                traddr: Some(record.spec.traddr.clone()),
                adrfam: record.spec.adrfam.map(|adrfam| adrfam.to_string()),
                trsvcid: (!record.spec.trsvcid.is_empty())
                    .then(|| record.spec.trsvcid.clone()),
                subnqn: record.spec.subnqn.clone(),
            };
            if let Err(undo) = self.ctx.spdk.bdev_nvme_detach_controller(&detach).await {
                error!(error = %undo, "compensation 'bdev_nvme_detach_controller' failed");
            }
            return Err(err.into());
        }
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let path = match self.ctx.store.get::<api::RemotePath>(name).await? {
            Some(path) => path,
            None if allow_missing => return Ok(()),
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        let ids = names::parse(name, &[names::NVME_REMOTE_CONTROLLERS, names::NVME_PATHS])
            .ok_or_else(|| OpError::invalid(format!("invalid resource name '{}'", name)))?;
        let controller_id = ids[0].to_string();

        let mut report = DeleteReport::new(name);
        let detach = spdk::DetachControllerArgs {
            name: controller_id,
            trtype: Some(path.spec.trtype.to_string()),
            traddr: Some(path.spec.traddr.clone()),
            adrfam: path.spec.adrfam.map(|adrfam| adrfam.to_string()),
            trsvcid: (!path.spec.trsvcid.is_empty()).then(|| path.spec.trsvcid.clone()),
            subnqn: path.spec.subnqn.clone(),
        };
        report.record(
            "bdev_nvme_detach_controller",
            self.ctx
                .spdk
                .bdev_nvme_detach_controller(&detach)
                .await
                .map_err(Into::into),
        );
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    pub async fn get(&self, name: &str) -> Result<api::RemotePath, OpError> {
        match self.ctx.store.get(name).await? {
            Some(path) => Ok(path),
            None => error::NotFound {
                name: name.to_string(),
            }
            .fail(),
        }
    }

    pub async fn list(
        &self,
        parent: &str,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::RemotePath>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/{}/", parent, names::NVME_PATHS);
        let mut paths: Vec<api::RemotePath> = self
            .ctx
            .store
            .list_matching(&prefix, |key| {
                names::parse(key, &[names::NVME_REMOTE_CONTROLLERS, names::NVME_PATHS]).is_some()
            })
            .await?;
        paths.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(paths, offset, size))
    }
}
