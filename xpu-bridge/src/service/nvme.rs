//! Services for the local Nvme families: subsystems, controllers and
//! namespaces.

use super::{check_id, check_name, SvcResult};
use crate::{
    api::{self, names},
    orch::{
        controller::ControllerCoordinator, namespace::NamespaceCoordinator,
        subsystem::SubsystemCoordinator, CtxRef,
    },
};
use tonic::Status;

#[derive(Clone, Debug)]
pub struct SubsystemService {
    coordinator: SubsystemCoordinator,
}

impl SubsystemService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: SubsystemCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::NvmeSubsystemSpec>,
    ) -> SvcResult<api::NvmeSubsystem> {
        check_id(&request.id)?;
        Ok(self.coordinator.create(request.id, request.spec).await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(&request.name, &[names::NVME_SUBSYSTEMS])?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::NvmeSubsystem> {
        check_name(&request.name, &[names::NVME_SUBSYSTEMS])?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::NvmeSubsystem>> {
        let (items, next_page_token) = self
            .coordinator
            .list(request.page_size, &request.page_token)
            .await?;
        Ok(api::ListResponse {
            items,
            next_page_token,
        })
    }

    pub async fn stats(&self, request: api::StatsRequest) -> SvcResult<serde_json::Value> {
        check_name(&request.name, &[names::NVME_SUBSYSTEMS])?;
        Ok(self.coordinator.stats(&request.name).await?)
    }
}

#[derive(Clone, Debug)]
pub struct ControllerService {
    coordinator: ControllerCoordinator,
}

impl ControllerService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: ControllerCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::NvmeControllerSpec>,
    ) -> SvcResult<api::NvmeController> {
        let parent = request
            .parent
            .ok_or_else(|| Status::invalid_argument("parent is required"))?;
        check_name(&parent, &[names::NVME_SUBSYSTEMS])?;
        check_id(&request.id)?;
        Ok(self
            .coordinator
            .create(&parent, request.id, request.spec)
            .await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(
            &request.name,
            &[names::NVME_SUBSYSTEMS, names::NVME_CONTROLLERS],
        )?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::NvmeController> {
        check_name(
            &request.name,
            &[names::NVME_SUBSYSTEMS, names::NVME_CONTROLLERS],
        )?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::NvmeController>> {
        let parent = request
            .parent
            .ok_or_else(|| Status::invalid_argument("parent is required"))?;
        check_name(&parent, &[names::NVME_SUBSYSTEMS])?;
        let (items, next_page_token) = self
            .coordinator
            .list(&parent, request.page_size, &request.page_token)
            .await?;
        Ok(api::ListResponse {
            items,
            next_page_token,
        })
    }

    pub async fn stats(&self, request: api::StatsRequest) -> SvcResult<serde_json::Value> {
        check_name(
            &request.name,
            &[names::NVME_SUBSYSTEMS, names::NVME_CONTROLLERS],
        )?;
        Ok(self.coordinator.stats(&request.name).await?)
    }
}

#[derive(Clone, Debug)]
pub struct NamespaceService {
    coordinator: NamespaceCoordinator,
}

impl NamespaceService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: NamespaceCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::NvmeNamespaceSpec>,
    ) -> SvcResult<api::NvmeNamespace> {
        let parent = request
            .parent
            .ok_or_else(|| Status::invalid_argument("parent is required"))?;
        check_name(&parent, &[names::NVME_SUBSYSTEMS])?;
        check_id(&request.id)?;
        if request.spec.volume_name_ref.is_empty() {
            return Err(Status::invalid_argument("volume reference is required"));
        }
        Ok(self
            .coordinator
            .create(&parent, request.id, request.spec)
            .await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(
            &request.name,
            &[names::NVME_SUBSYSTEMS, names::NVME_NAMESPACES],
        )?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::NvmeNamespace> {
        check_name(
            &request.name,
            &[names::NVME_SUBSYSTEMS, names::NVME_NAMESPACES],
        )?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::NvmeNamespace>> {
        let parent = request
            .parent
            .ok_or_else(|| Status::invalid_argument("parent is required"))?;
        check_name(&parent, &[names::NVME_SUBSYSTEMS])?;
        let (items, next_page_token) = self
            .coordinator
            .list(&parent, request.page_size, &request.page_token)
            .await?;
        Ok(api::ListResponse {
            items,
            next_page_token,
        })
    }

    pub async fn stats(&self, request: api::StatsRequest) -> SvcResult<api::StatsResponse> {
        check_name(
            &request.name,
            &[names::NVME_SUBSYSTEMS, names::NVME_NAMESPACES],
        )?;
        let stats = self.coordinator.stats(&request.name).await?;
        Ok(api::StatsResponse { stats })
    }
}
