//! Coordinator for Nvme subsystems. A subsystem is a data-plane nvmf
//! subsystem plus its metadata record; controllers and namespaces nest
//! under it and block its deletion while they exist.

use crate::{
    api::{self, names},
    error::{self, OpError},
    orch::{plan::DeleteReport, resolve_id, CtxRef},
    spdk,
};
use snafu::ensure;

#[derive(Clone, Debug)]
pub struct SubsystemCoordinator {
    ctx: CtxRef,
}

impl SubsystemCoordinator {
    pub fn new(ctx: CtxRef) -> Self {
        Self { ctx }
    }

    /// NQN used when the caller did not pick one.
    fn default_nqn(id: &str) -> String {
        format!("nqn.2022-09.io.spdk:{}", id)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn create(
        &self,
        id: Option<String>,
        mut spec: api::NvmeSubsystemSpec,
    ) -> Result<api::NvmeSubsystem, OpError> {
        let id = resolve_id(id)?;
        let name = names::subsystem(&id);
        let _guard = self.ctx.locks.lock_resource(&name).await;

        if spec.nqn.is_empty() {
            spec.nqn = Self::default_nqn(&id);
        }
        ensure!(
            spec.max_namespaces >= 0 && spec.max_controllers >= 0,
            error::InvalidArgument {
                msg: "max namespaces and max controllers cannot be negative".to_string(),
            }
        );
        let record = api::NvmeSubsystem {
            name: name.clone(),
            spec,
        };

        if let Some(existing) = self.ctx.store.get::<api::NvmeSubsystem>(&name).await? {
            if existing.spec == record.spec {
                return Ok(existing);
            }
            return error::AlreadyExists { name }.fail();
        }

        let args = spdk::CreateSubsystemArgs {
            nqn: record.spec.nqn.clone(),
            serial_number: record.spec.serial_number.clone(),
            model_number: record.spec.model_number.clone(),
            allow_any_host: true,
            max_namespaces: (record.spec.max_namespaces > 0).then(|| record.spec.max_namespaces),
            max_cntlid: (record.spec.max_controllers > 0).then(|| record.spec.max_controllers),
        };
        self.ctx.spdk.nvmf_create_subsystem(&args).await?;

        if let Err(err) = self.ctx.store.set(&name, &record).await {
            if let Err(undo) = self.ctx.spdk.nvmf_delete_subsystem(&record.spec.nqn).await {
                error!(error = %undo, "compensation 'nvmf_delete_subsystem' failed");
            }
            return Err(err.into());
        }
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn delete(&self, name: &str, allow_missing: bool) -> Result<(), OpError> {
        let _guard = self.ctx.locks.lock_resource(name).await;

        let subsystem = match self.ctx.store.get::<api::NvmeSubsystem>(name).await? {
            Some(subsystem) => subsystem,
            None if allow_missing => return Ok(()),
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };

        // controllers and namespaces must be deleted first
        let children = self.ctx.store.count(&format!("{}/", name)).await?;
        ensure!(
            children == 0,
            error::HasChildren {
                name: name.to_string(),
                children,
            }
        );

        let mut report = DeleteReport::new(name);
        report.record(
            "nvmf_delete_subsystem",
            self.ctx
                .spdk
                .nvmf_delete_subsystem(&subsystem.spec.nqn)
                .await
                .map_err(Into::into),
        );
        self.ctx.store.delete(name).await?;
        report.classify()
    }

    /// Fetch the record and cross-check that the data-plane still knows the
    /// subsystem; divergence surfaces as a shape error.
    pub async fn get(&self, name: &str) -> Result<api::NvmeSubsystem, OpError> {
        let subsystem: api::NvmeSubsystem = match self.ctx.store.get(name).await? {
            Some(subsystem) => subsystem,
            None => {
                return error::NotFound {
                    name: name.to_string(),
                }
                .fail()
            }
        };
        let live = self
            .ctx
            .spdk
            .nvmf_get_subsystems(Some(&subsystem.spec.nqn))
            .await?;
        spdk::expect_single(live, "nvmf_get_subsystems")?;
        Ok(subsystem)
    }

    pub async fn list(
        &self,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<api::NvmeSubsystem>, String), OpError> {
        let (size, offset) = self.ctx.pager.extract(page_size, page_token)?;
        let prefix = format!("{}/", names::NVME_SUBSYSTEMS);
        let mut subsystems: Vec<api::NvmeSubsystem> = self
            .ctx
            .store
            .list_matching(&prefix, |key| {
                names::parse(key, &[names::NVME_SUBSYSTEMS]).is_some()
            })
            .await?;
        subsystems.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.ctx.pager.limit(subsystems, offset, size))
    }

    /// Raw data-plane statistics of the subsystem.
    pub async fn stats(&self, name: &str) -> Result<serde_json::Value, OpError> {
        let subsystem = self.get(name).await?;
        Ok(self
            .ctx
            .spdk
            .nvmf_get_subsystem_stats(&subsystem.spec.nqn)
            .await?)
    }
}
