//! Services for Virtio-blk devices and Virtio-SCSI controllers.

use super::{check_id, check_name, SvcResult};
use crate::{
    api::{self, names},
    orch::{virtio_blk::VirtioBlkCoordinator, virtio_scsi::VirtioScsiCoordinator, CtxRef},
};
use tonic::Status;

#[derive(Clone, Debug)]
pub struct VirtioBlkService {
    coordinator: VirtioBlkCoordinator,
}

impl VirtioBlkService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: VirtioBlkCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::VirtioBlkSpec>,
    ) -> SvcResult<api::VirtioBlk> {
        check_id(&request.id)?;
        if request.spec.volume_name_ref.is_empty() {
            return Err(Status::invalid_argument("volume reference is required"));
        }
        Ok(self.coordinator.create(request.id, request.spec).await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(&request.name, &[names::VIRTIO_BLKS])?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::VirtioBlk> {
        check_name(&request.name, &[names::VIRTIO_BLKS])?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::VirtioBlk>> {
        let (items, next_page_token) = self
            .coordinator
            .list(request.page_size, &request.page_token)
            .await?;
        Ok(api::ListResponse {
            items,
            next_page_token,
        })
    }

    pub async fn stats(&self, request: api::StatsRequest) -> SvcResult<api::StatsResponse> {
        check_name(&request.name, &[names::VIRTIO_BLKS])?;
        let stats = self.coordinator.stats(&request.name).await?;
        Ok(api::StatsResponse { stats })
    }
}

#[derive(Clone, Debug)]
pub struct VirtioScsiService {
    coordinator: VirtioScsiCoordinator,
}

impl VirtioScsiService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: VirtioScsiCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::VirtioScsiControllerSpec>,
    ) -> SvcResult<api::VirtioScsiController> {
        check_id(&request.id)?;
        Ok(self.coordinator.create(request.id, request.spec).await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(&request.name, &[names::VIRTIO_SCSI_CONTROLLERS])?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::VirtioScsiController> {
        check_name(&request.name, &[names::VIRTIO_SCSI_CONTROLLERS])?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::VirtioScsiController>> {
        let (items, next_page_token) = self
            .coordinator
            .list(request.page_size, &request.page_token)
            .await?;
        Ok(api::ListResponse {
            items,
            next_page_token,
        })
    }
}
