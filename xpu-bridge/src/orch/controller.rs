//! Coordinator for Nvme controllers: the data-plane listener of a parent
//! subsystem, optionally hot-plugged into the guest as a vfio-user PCI
//! device.
//!
//! A PCIE/VFIOUSER controller owns a per-controller directory under the
//! configured socket directory; the data-plane listens on it and the
//! hypervisor consumes the `cntrl` socket the listener creates inside. A
//! TCP controller only owns the listener, plus a key file when the listener
//! is secured with a PSK.

use crate::{
    api::{self, names},
    error::{self, OpError},
    monitor::to_hypervisor_id,
    orch::{
        plan::{CompensationStack, DeleteReport},
        resolve_id, CtxRef,
    },
    spdk,
};
use snafu::ResultExt;
use std::{
    fs,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

const VFIO_USER_DRIVER: &str = "vfio-user-pci";

#[derive(Clone, Debug)]
pub struct ControllerCoordinator {
    ctx: CtxRef,
}

impl ControllerCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    /// Transport well-formedness: TCP needs a populated tcp endpoint,
    /// PCIE/VFIOUSER need a PCI endpoint, and VFIOUSER additionally pins
    /// port and virtual function to zero.
    fn validate(spec: &api::NvmeControllerSpec, name: &str) -> Result<(), OpError> {
        match spec.trtype {
            api::TrType::Tcp => {
                let tcp = spec
                    .tcp
                    .as_ref()
                    .ok_or_else(|| OpError::invalid("TCP transport requires a tcp endpoint"))?;
                if tcp.traddr.is_empty() || tcp.trsvcid.is_empty() {
                    return Err(OpError::invalid(
                        "TCP transport requires traddr and trsvcid",
                    ));
                }
            }
            api::TrType::Pcie | api::TrType::VfioUser => {
                let pcie = match spec.pcie {
                    Some(pcie) => pcie,
                    None => {
                        return error::NoPcieEndpoint {
                            name: name.to_string(),
                        }
                        .fail()
                    }
                };
                if spec.trtype == api::TrType::VfioUser
                    && (pcie.port_id != 0 || pcie.virtual_function != 0)
                {
                    return Err(OpError::invalid(
                        "VFIOUSER transport requires port 0 and virtual function 0",
                    ));
                }
            }
        }
        Ok(())
    }

    async fn parent(&self, parent: &str) -> Result<api::NvmeSubsystem, OpError> {
        match self.ctx.store.get(parent).await? {
            Some(subsystem) => Ok(subsystem),
            None => error::NotFound {
                name: parent.to_string(),
            }
            .fail(),
        }
    }

    fn controller_dir(&self, subsystem_id: &str) -> PathBuf {
        self.ctx.ctrlr_dir.join(subsystem_id)
    }

    fn psk_path(&self, controller_id: &str) -> PathBuf {
        self.ctx.ctrlr_dir.join(format!("{}.psk", controller_id))
    }

    #[tracing::instrument(level = "debug", skip(self, spec), err)]
    pub async fn create(
        &self,
        parent: &str,
        id: Option<String>,
        spec: api::NvmeControllerSpec,
    ) -> Result<api::NvmeController, OpError> {
        let parent_ids = names::parse(parent, &[names::NVME_SUBSYSTEMS])
            .ok_or_else(|| OpError::invalid(format!("invalid parent name '{}'", parent)))?;
        let subsystem_id = parent_ids[0].to_string();
        let id = resolve_id(id)?;
        let name = names::controller(&subsystem_id, &id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        Self::validate(&spec, &name)?;
        let record = api::NvmeController {
            name: name.clone(),
            spec,
        };

        if let Some(existing) = self.ctx.store.get::<api::NvmeController>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        let subsystem = self.parent(parent).await?;
        let rollback = match record.spec.trtype {
            api::TrType::Tcp => self.create_tcp(&subsystem, &id, &record).await?,
            api::TrType::Pcie | api::TrType::VfioUser => {
                self.create_vfio_user(&subsystem, &subsystem_id, &id, &record).await?
            }
        };

        if let Err(err) = self.ctx.store.set(&name, &record).await {
            rollback.unwind().await;
            return Err(err.into());
        }
        rollback.discard();
        Ok(record)
    }

    /// TCP plan: materialize the PSK if any, add the data-plane listener on
    /// the requested address.
    async fn create_tcp(
        &self,
        subsystem: &api::NvmeSubsystem,
        id: &str,
        record: &api::NvmeController,
    ) -> Result<CompensationStack, OpError> {
        let mut rollback = CompensationStack::new();
        let tcp = record.spec.tcp.clone().unwrap_or_default();

        let psk_path = match &record.spec.psk {
            Some(psk) => {
                let path = self.psk_path(id);
                write_key_file(&path, psk)?;
                let compensation_path = path.clone();
                rollback.push("remove psk file", async move {
                    remove_path(&compensation_path)
                });
                Some(path)
            }
            None => None,
        };

        let listen = spdk::ListenAddress {
            trtype: api::TrType::Tcp.to_string(),
            traddr: tcp.traddr.clone(),
            trsvcid: Some(tcp.trsvcid.clone()),
            adrfam: tcp.adrfam.map(|adrfam| adrfam.to_string()),
        };
        let psk_arg = psk_path.as_ref().map(|path| path.display().to_string());
        if let Err(err) = self
            .ctx
            .spdk
            .nvmf_subsystem_add_listener(&subsystem.spec.nqn, &listen, psk_arg.as_deref())
            .await
        {
            rollback.unwind().await;
            return Err(err.into());
        }
        {
            let spdk = self.ctx.spdk.clone();
            let nqn = subsystem.spec.nqn.clone();
            rollback.push("nvmf_subsystem_remove_listener", async move {
                spdk.nvmf_subsystem_remove_listener(&nqn, &listen)
                    .await
                    .map_err(Into::into)
            });
        }
        Ok(rollback)
    }

    /// PCIE/VFIOUSER plan: per-controller directory, vfiouser listener on
    /// it, then chardev plus vfio-user device on the hypervisor.
    async fn create_vfio_user(
        &self,
        subsystem: &api::NvmeSubsystem,
        subsystem_id: &str,
        id: &str,
        record: &api::NvmeController,
    ) -> Result<CompensationStack, OpError> {
        let mut rollback = CompensationStack::new();
        let pcie = record.spec.pcie.unwrap_or_default();
        let location = self.ctx.locator.calculate(pcie.physical_function)?;
        super::ensure_location_free(&self.ctx, &location).await?;

        let dir = self.controller_dir(subsystem_id);
        // the directory is keyed by the subsystem and may already exist when
        // it hosts another controller; only a directory we created ourselves
        // is removed on rollback
        let created = match fs::DirBuilder::new().mode(0o600).create(&dir) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(err) => {
                return Err(err).context(error::FailedToCreateNvmeDir { path: dir.clone() })
            }
        };
        if created {
            let dir = dir.clone();
            rollback.push("remove controller dir", async move { remove_dir(&dir) });
        }

        let listen = spdk::ListenAddress {
            trtype: api::TrType::VfioUser.to_string(),
            traddr: dir.display().to_string(),
            trsvcid: None,
            adrfam: None,
        };
        if let Err(err) = self
            .ctx
            .spdk
            .nvmf_subsystem_add_listener(&subsystem.spec.nqn, &listen, None)
            .await
        {
            rollback.unwind().await;
            return Err(err.into());
        }
        {
            let spdk = self.ctx.spdk.clone();
            let nqn = subsystem.spec.nqn.clone();
            let listen = listen.clone();
            rollback.push("nvmf_subsystem_remove_listener", async move {
                spdk.nvmf_subsystem_remove_listener(&nqn, &listen)
                    .await
                    .map_err(Into::into)
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
            let hyp_id = to_hypervisor_id(id);
            let socket = dir.join("cntrl").display().to_string();

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
                .device_add(VFIO_USER_DRIVER, &hyp_id, None, Some(&socket), &location)
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
        Ok(rollback)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let controller = match self.ctx.store.get::<api::NvmeController>(name).await? {
            Some(controller) => controller,
            None if allow_missing => return Ok(()),
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        let ids = names::parse(name, &[names::NVME_SUBSYSTEMS, names::NVME_CONTROLLERS])
            .ok_or_else(|| OpError::invalid(format!("invalid resource name '{}'", name)))?;
        let subsystem_id = ids[0].to_string();
        let id = ids[1].to_string();
        let parent = names::subsystem(&subsystem_id);
        let subsystem = self.ctx.store.get::<api::NvmeSubsystem>(&parent).await?;

        let mut report = DeleteReport::new(name);
        match controller.spec.trtype {
            api::TrType::Tcp => {
                self.delete_tcp(&controller, subsystem.as_ref(), &id, &mut report)
                    .await;
            }
            api::TrType::Pcie | api::TrType::VfioUser => {
                self.delete_vfio_user(subsystem.as_ref(), &subsystem_id, &id, &mut report)
                    .await;
            }
        }
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    async fn delete_tcp(
        &self,
        controller: &api::NvmeController,
        subsystem: Option<&api::NvmeSubsystem>,
        id: &str,
        report: &mut DeleteReport,
    ) {
        let tcp = controller.spec.tcp.clone().unwrap_or_default();
        let listen = spdk::ListenAddress {
            trtype: api::TrType::Tcp.to_string(),
            traddr: tcp.traddr,
            trsvcid: Some(tcp.trsvcid),
            adrfam: tcp.adrfam.map(|adrfam| adrfam.to_string()),
        };
        report.record(
            "nvmf_subsystem_remove_listener",
            self.remove_listener(subsystem, &listen).await,
        );
        if controller.spec.psk.is_some() {
            report.record("remove psk file", remove_path(&self.psk_path(id)));
        }
    }

    async fn delete_vfio_user(
        &self,
        subsystem: Option<&api::NvmeSubsystem>,
        subsystem_id: &str,
        id: &str,
        report: &mut DeleteReport,
    ) {
        if let Some(monitor) = &self.ctx.monitor {
            let hyp_id = to_hypervisor_id(id);
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

        let dir = self.controller_dir(subsystem_id);
        let listen = spdk::ListenAddress {
            trtype: api::TrType::VfioUser.to_string(),
            traddr: dir.display().to_string(),
            trsvcid: None,
            adrfam: None,
        };
        report.record(
            "nvmf_subsystem_remove_listener",
            self.remove_listener(subsystem, &listen).await,
        );
        report.record("remove controller dir", remove_dir(&dir));
    }

    async fn remove_listener(
        &self,
        subsystem: Option<&api::NvmeSubsystem>,
        listen: &spdk::ListenAddress,
    ) -> Result<(), OpError> {
        let subsystem = match subsystem {
            Some(subsystem) => subsystem,
            None => {
                return Err(OpError::invalid(
                    "parent subsystem record is gone, cannot resolve the listener nqn",
                ))
            }
        };
        self.ctx
            .spdk
            .nvmf_subsystem_remove_listener(&subsystem.spec.nqn, listen)
            .await
            .map_err(Into::into)
    }

    pub async fn get(&self, name: &str) -> Result<api::NvmeController, OpError> {
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
        parent: &str,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::NvmeController>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/{}/", parent, names::NVME_CONTROLLERS);
        let mut controllers: Vec<api::NvmeController> = self
            .ctx
            .store
            .list_matching(&prefix, |key| {
                names::parse(key, &[names::NVME_SUBSYSTEMS, names::NVME_CONTROLLERS]).is_some()
            })
            .await?;
        controllers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(controllers, offset, size))
    }

    /// Raw data-plane statistics of the parent subsystem, scoped to this
    /// controller's listener.
    pub async fn stats(&self, name: &str) -> Result<serde_json::Value, OpError> {
        let _controller = self.get(name).await?;
        let ids = names::parse(name, &[names::NVME_SUBSYSTEMS, names::NVME_CONTROLLERS])
            .ok_or_else(|| OpError::invalid(format!("invalid resource name '{}'", name)))?;
        let parent = names::subsystem(ids[0]);
        let subsystem = match self.ctx.store.get::<api::NvmeSubsystem>(&parent).await? {
            Some(subsystem) => subsystem,
            None => return error::NotFound { name: parent }.fail(),
        };
        Ok(self
            .ctx
            .spdk
            .nvmf_get_subsystem_stats(&subsystem.spec.nqn)
            .await?)
    }
}

/// Write key material to a file only the daemon can read.
pub(crate) fn write_key_file(path: &Path, key: &[u8]) -> Result<(), OpError> {
    use std::{io::Write, os::unix::fs::OpenOptionsExt};
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .context(error::PskFile {
            path: path.to_path_buf(),
        })?;
    file.write_all(key).context(error::PskFile {
        path: path.to_path_buf(),
    })
}

pub(crate) fn remove_path(path: &Path) -> Result<(), OpError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(OpError::Filesystem {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn remove_dir(path: &Path) -> Result<(), OpError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(OpError::Filesystem {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}
