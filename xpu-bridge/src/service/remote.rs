//! Services for remote Nvme-over-Fabrics controllers and their paths.

use super::{check_id, check_name, SvcResult};
use crate::{
    api::{self, names},
    orch::{
        remote::{RemoteControllerCoordinator, RemotePathCoordinator},
        CtxRef,
    },
};
use tonic::Status;

#[derive(Clone, Debug)]
pub struct RemoteControllerService {
    coordinator: RemoteControllerCoordinator,
}

impl RemoteControllerService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: RemoteControllerCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::RemoteControllerSpec>,
    ) -> SvcResult<api::RemoteController> {
        check_id(&request.id)?;
        Ok(self.coordinator.create(request.id, request.spec).await?)
    }

    pub async fn update(
        &self,
        request: api::UpdateRequest<api::RemoteControllerSpec>,
    ) -> SvcResult<api::RemoteController> {
        check_name(&request.name, &[names::NVME_REMOTE_CONTROLLERS])?;
        Ok(self.coordinator.update(&request.name, request.spec).await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(&request.name, &[names::NVME_REMOTE_CONTROLLERS])?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::RemoteController> {
        check_name(&request.name, &[names::NVME_REMOTE_CONTROLLERS])?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::RemoteController>> {
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
        check_name(&request.name, &[names::NVME_REMOTE_CONTROLLERS])?;
        Ok(self.coordinator.stats(&request.name).await?)
    }
}

#[derive(Clone, Debug)]
pub struct RemotePathService {
    coordinator: RemotePathCoordinator,
}

impl RemotePathService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: RemotePathCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::RemotePathSpec>,
    ) -> SvcResult<api::RemotePath> {
        let parent = request
            .parent
            .ok_or_else(|| Status::invalid_argument("parent is required"))?;
        check_name(&parent, &[names::NVME_REMOTE_CONTROLLERS])?;
        check_id(&request.id)?;
        Ok(self
            .coordinator
            .create(&parent, request.id, request.spec)
            .await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(
            &request.name,
            &[names::NVME_REMOTE_CONTROLLERS, names::NVME_PATHS],
        )?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::RemotePath> {
        check_name(
            &request.name,
            &[names::NVME_REMOTE_CONTROLLERS, names::NVME_PATHS],
        )?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::RemotePath>> {
        let parent = request
            .parent
            .ok_or_else(|| Status::invalid_argument("parent is required"))?;
        check_name(&parent, &[names::NVME_REMOTE_CONTROLLERS])?;
        let (items, next_page_token) = self
            .coordinator
            .list(&parent, request.page_size, &request.page_token)
            .await?;
        Ok(api::ListResponse {
            items,
            next_page_token,
        })
    }
}
