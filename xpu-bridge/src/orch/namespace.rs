//! Coordinator for Nvme namespaces: a backing volume attached to a parent
//! subsystem under a data-plane assigned nsid.

use crate::{
    api::{self, names},
    error::{self, OpError},
    orch::{plan::DeleteReport, resolve_id, CtxRef},
};

#[derive(Clone, Debug)]
pub struct NamespaceCoordinator {
    ctx: CtxRef,
}

impl NamespaceCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
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

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn create(
        &self,
        parent: &str,
        id: Option<String>,
        spec: api::NvmeNamespaceSpec,
    ) -> Result<api::NvmeNamespace, OpError> {
        let parent_ids = names::parse(parent, &[names::NVME_SUBSYSTEMS])
            .ok_or_else(|| OpError::invalid(format!("invalid parent name '{}'", parent)))?;
        let subsystem_id = parent_ids[0].to_string();
        let id = resolve_id(id)?;
        let name = names::namespace(&subsystem_id, &id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        if spec.volume_name_ref.is_empty() {
            return Err(OpError::invalid("volume reference is required"));
        }

        if let Some(existing) = self.ctx.store.get::<api::NvmeNamespace>(&name).await? {
            if existing.spec == spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        let subsystem = self.parent(parent).await?;
        let assigned_nsid = self
            .ctx
            .spdk
            .nvmf_subsystem_add_ns(
                &subsystem.spec.nqn,
                &spec.volume_name_ref,
                spec.uuid.as_deref(),
                spec.nsid,
            )
            .await?;

        let record = api::NvmeNamespace {
            name: name.clone(),
            spec,
            assigned_nsid,
        };
        if let Err(err) = self.ctx.store.set(&name, &record).await {
            if let Err(undo) = self
                .ctx
                .spdk
                .nvmf_subsystem_remove_ns(&subsystem.spec.nqn, assigned_nsid)
                .await
            {
                error!(error = %undo, "compensation 'nvmf_subsystem_remove_ns' failed");
            }
            return Err(err.into());
        }
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let namespace = match self.ctx.store.get::<api::NvmeNamespace>(name).await? {
            Some(namespace) => namespace,
            None if allow_missing => return Ok(()),
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };

        let ids = names::parse(name, &[names::NVME_SUBSYSTEMS, names::NVME_NAMESPACES])
            .ok_or_else(|| OpError::invalid(format!("invalid resource name '{}'", name)))?;
        let parent = names::subsystem(ids[0]);

        let mut report = DeleteReport::new(name);
        match self.ctx.store.get::<api::NvmeSubsystem>(&parent).await? {
            Some(subsystem) => {
                report.record(
                    "nvmf_subsystem_remove_ns",
                    self.ctx
                        .spdk
                        .nvmf_subsystem_remove_ns(&subsystem.spec.nqn, namespace.assigned_nsid)
                        .await
                        .map_err(Into::into),
                );
            }
            None => {
                report.record(
                    "nvmf_subsystem_remove_ns",
                    error::NotFound { name: parent }.fail(),
                );
            }
        }
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    pub async fn get(&self, name: &str) -> Result<api::NvmeNamespace, OpError> {
        match self.ctx.store.get(name).await? {
            Some(namespace) => Ok(namespace),
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
    ) -> Result<(Vec<api::NvmeNamespace>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/{}/", parent, names::NVME_NAMESPACES);
        let mut namespaces: Vec<api::NvmeNamespace> = self
            .ctx
            .store
            .list_matching(&prefix, |key| {
                names::parse(key, &[names::NVME_SUBSYSTEMS, names::NVME_NAMESPACES]).is_some()
            })
            .await?;
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(namespaces, offset, size))
    }

    /// I/O statistics of the namespace's backing volume.
    pub async fn stats(&self, name: &str) -> Result<api::VolumeStats, OpError> {
        let namespace = self.get(name).await?;
        let stat = self
            .ctx
            .spdk
            .bdev_get_iostat(&namespace.spec.volume_name_ref)
            .await?;
        Ok(stat.into())
    }
}
