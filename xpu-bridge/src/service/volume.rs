//! Services for the volume families: backing volumes (AIO, Null, Malloc),
//! encrypted volumes and QoS volumes.

use super::{check_id, check_name, SvcResult};
use crate::{
    api::{self, names},
    orch::{
        backing::VolumeCoordinator, crypto::EncryptedVolumeCoordinator,
        qos::QosVolumeCoordinator, CtxRef,
    },
};
use tonic::Status;

#[derive(Clone, Debug)]
pub struct VolumeService {
    coordinator: VolumeCoordinator,
}

impl VolumeService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: VolumeCoordinator::new(ctx),
        }
    }

    pub async fn create_aio(
        &self,
        request: api::CreateRequest<api::AioVolumeSpec>,
    ) -> SvcResult<api::Volume> {
        check_id(&request.id)?;
        if request.spec.filename.is_empty() {
            return Err(Status::invalid_argument("filename is required"));
        }
        Ok(self
            .coordinator
            .create(request.id, api::VolumeSpec::Aio(request.spec))
            .await?)
    }

    pub async fn create_null(
        &self,
        request: api::CreateRequest<api::NullVolumeSpec>,
    ) -> SvcResult<api::Volume> {
        check_id(&request.id)?;
        Ok(self
            .coordinator
            .create(request.id, api::VolumeSpec::Null(request.spec))
            .await?)
    }

    pub async fn create_malloc(
        &self,
        request: api::CreateRequest<api::MallocVolumeSpec>,
    ) -> SvcResult<api::Volume> {
        check_id(&request.id)?;
        Ok(self
            .coordinator
            .create(request.id, api::VolumeSpec::Malloc(request.spec))
            .await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(&request.name, &[names::VOLUMES])?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::Volume> {
        check_name(&request.name, &[names::VOLUMES])?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        kind: Option<&str>,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::Volume>> {
        let (items, next_page_token) = self
            .coordinator
            .list(kind, request.page_size, &request.page_token)
            .await?;
        Ok(api::ListResponse {
            items,
            next_page_token,
        })
    }

    pub async fn stats(&self, request: api::StatsRequest) -> SvcResult<api::StatsResponse> {
        check_name(&request.name, &[names::VOLUMES])?;
        let stats = self.coordinator.stats(&request.name).await?;
        Ok(api::StatsResponse { stats })
    }
}

#[derive(Clone, Debug)]
pub struct EncryptedVolumeService {
    coordinator: EncryptedVolumeCoordinator,
}

impl EncryptedVolumeService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: EncryptedVolumeCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::EncryptedVolumeSpec>,
    ) -> SvcResult<api::Volume> {
        check_id(&request.id)?;
        if request.spec.volume_name_ref.is_empty() {
            return Err(Status::invalid_argument("volume reference is required"));
        }
        if request.spec.key.is_empty() {
            return Err(Status::invalid_argument("key material is required"));
        }
        Ok(self.coordinator.create(request.id, request.spec).await?)
    }

    pub async fn update(
        &self,
        request: api::UpdateRequest<api::EncryptedVolumeSpec>,
    ) -> SvcResult<api::Volume> {
        check_name(&request.name, &[names::VOLUMES])?;
        Ok(self.coordinator.update(&request.name, request.spec).await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(&request.name, &[names::VOLUMES])?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::Volume> {
        check_name(&request.name, &[names::VOLUMES])?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::Volume>> {
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
        check_name(&request.name, &[names::VOLUMES])?;
        let stats = self.coordinator.stats(&request.name).await?;
        Ok(api::StatsResponse { stats })
    }
}

#[derive(Clone, Debug)]
pub struct QosVolumeService {
    coordinator: QosVolumeCoordinator,
}

impl QosVolumeService {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            coordinator: QosVolumeCoordinator::new(ctx),
        }
    }

    pub async fn create(
        &self,
        request: api::CreateRequest<api::QosVolumeSpec>,
    ) -> SvcResult<api::QosVolume> {
        check_id(&request.id)?;
        if request.spec.volume_name_ref.is_empty() {
            return Err(Status::invalid_argument("volume reference is required"));
        }
        Ok(self.coordinator.create(request.id, request.spec).await?)
    }

    pub async fn update(
        &self,
        request: api::UpdateRequest<api::QosVolumeSpec>,
    ) -> SvcResult<api::QosVolume> {
        check_name(&request.name, &[names::QOS_VOLUMES])?;
        Ok(self.coordinator.update(&request.name, request.spec).await?)
    }

    pub async fn delete(&self, request: api::DeleteRequest) -> SvcResult<()> {
        check_name(&request.name, &[names::QOS_VOLUMES])?;
        Ok(self
            .coordinator
            .delete(&request.name, request.allow_missing)
            .await?)
    }

    pub async fn get(&self, request: api::GetRequest) -> SvcResult<api::QosVolume> {
        check_name(&request.name, &[names::QOS_VOLUMES])?;
        Ok(self.coordinator.get(&request.name).await?)
    }

    pub async fn list(
        &self,
        request: api::ListRequest,
    ) -> SvcResult<api::ListResponse<api::QosVolume>> {
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
        check_name(&request.name, &[names::QOS_VOLUMES])?;
        let stats = self.coordinator.stats(&request.name).await?;
        Ok(api::StatsResponse { stats })
    }
}
