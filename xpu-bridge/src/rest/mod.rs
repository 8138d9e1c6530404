//! HTTP/JSON frontend: resource-name routes bound to the service layer.
//! Bodies are the request envelopes of the api module; classified errors
//! arrive here as statuses and leave as json error bodies with the matching
//! http code.

use crate::{
    api::{self, names},
    service::AppServices,
};
use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use tonic::{Code, Status};

/// Error body returned to REST clients.
#[derive(Debug)]
pub struct RestError(Status);

impl From<Status> for RestError {
    fn from(status: Status) -> Self {
        Self(status)
    }
}

impl std::fmt::Display for RestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.0.code(), self.0.message())
    }
}

impl ResponseError for RestError {
    fn status_code(&self) -> StatusCode {
        match self.0.code() {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "code": self.0.code() as i32,
            "message": self.0.message(),
        }))
    }
}

type RestResult = Result<HttpResponse, RestError>;

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    #[serde(default)]
    page_size: i32,
    #[serde(default)]
    page_token: String,
}

impl ListParams {
    fn into_request(self, parent: Option<String>) -> api::ListRequest {
        api::ListRequest {
            parent,
            page_size: self.page_size,
            page_token: self.page_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DeleteParams {
    #[serde(default)]
    allow_missing: bool,
}

fn delete_request(name: String, params: DeleteParams) -> api::DeleteRequest {
    api::DeleteRequest {
        name,
        allow_missing: params.allow_missing,
    }
}

macro_rules! reply {
    ($value:expr) => {
        Ok(HttpResponse::Ok().json($value))
    };
}

// nvme subsystems

async fn create_subsystem(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::NvmeSubsystemSpec>>,
) -> RestResult {
    reply!(services.subsystems.create(body.into_inner()).await?)
}

async fn list_subsystems(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.subsystems.list(request).await?)
}

async fn get_subsystem(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::subsystem(&path.into_inner());
    reply!(services.subsystems.get(api::GetRequest { name }).await?)
}

async fn delete_subsystem(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let name = names::subsystem(&path.into_inner());
    services
        .subsystems
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_subsystem(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::subsystem(&path.into_inner());
    reply!(services.subsystems.stats(api::StatsRequest { name }).await?)
}

// nvme controllers

async fn create_controller(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    body: web::Json<api::CreateRequest<api::NvmeControllerSpec>>,
) -> RestResult {
    let mut request = body.into_inner();
    request.parent = Some(names::subsystem(&path.into_inner()));
    reply!(services.controllers.create(request).await?)
}

async fn list_controllers(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<ListParams>,
) -> RestResult {
    let parent = names::subsystem(&path.into_inner());
    let request = params.into_inner().into_request(Some(parent));
    reply!(services.controllers.list(request).await?)
}

async fn get_controller(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
) -> RestResult {
    let (subsystem, id) = path.into_inner();
    let name = names::controller(&subsystem, &id);
    reply!(services.controllers.get(api::GetRequest { name }).await?)
}

async fn delete_controller(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let (subsystem, id) = path.into_inner();
    let name = names::controller(&subsystem, &id);
    services
        .controllers
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_controller(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
) -> RestResult {
    let (subsystem, id) = path.into_inner();
    let name = names::controller(&subsystem, &id);
    reply!(services.controllers.stats(api::StatsRequest { name }).await?)
}

// nvme namespaces

async fn create_namespace(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    body: web::Json<api::CreateRequest<api::NvmeNamespaceSpec>>,
) -> RestResult {
    let mut request = body.into_inner();
    request.parent = Some(names::subsystem(&path.into_inner()));
    reply!(services.namespaces.create(request).await?)
}

async fn list_namespaces(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<ListParams>,
) -> RestResult {
    let parent = names::subsystem(&path.into_inner());
    let request = params.into_inner().into_request(Some(parent));
    reply!(services.namespaces.list(request).await?)
}

async fn get_namespace(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
) -> RestResult {
    let (subsystem, id) = path.into_inner();
    let name = names::namespace(&subsystem, &id);
    reply!(services.namespaces.get(api::GetRequest { name }).await?)
}

async fn delete_namespace(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let (subsystem, id) = path.into_inner();
    let name = names::namespace(&subsystem, &id);
    services
        .namespaces
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_namespace(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
) -> RestResult {
    let (subsystem, id) = path.into_inner();
    let name = names::namespace(&subsystem, &id);
    reply!(services.namespaces.stats(api::StatsRequest { name }).await?)
}

// remote controllers and paths

async fn create_remote_controller(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::RemoteControllerSpec>>,
) -> RestResult {
    reply!(services.remote_controllers.create(body.into_inner()).await?)
}

async fn list_remote_controllers(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.remote_controllers.list(request).await?)
}

async fn get_remote_controller(
    services: web::Data<AppServices>,
    path: web::Path<String>,
) -> RestResult {
    let name = names::remote_controller(&path.into_inner());
    reply!(services.remote_controllers.get(api::GetRequest { name }).await?)
}

async fn update_remote_controller(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    body: web::Json<api::RemoteControllerSpec>,
) -> RestResult {
    let name = names::remote_controller(&path.into_inner());
    let request = api::UpdateRequest {
        name,
        spec: body.into_inner(),
    };
    reply!(services.remote_controllers.update(request).await?)
}

async fn delete_remote_controller(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let name = names::remote_controller(&path.into_inner());
    services
        .remote_controllers
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_remote_controller(
    services: web::Data<AppServices>,
    path: web::Path<String>,
) -> RestResult {
    let name = names::remote_controller(&path.into_inner());
    reply!(services.remote_controllers.stats(api::StatsRequest { name }).await?)
}

async fn create_remote_path(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    body: web::Json<api::CreateRequest<api::RemotePathSpec>>,
) -> RestResult {
    let mut request = body.into_inner();
    request.parent = Some(names::remote_controller(&path.into_inner()));
    reply!(services.remote_paths.create(request).await?)
}

async fn list_remote_paths(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<ListParams>,
) -> RestResult {
    let parent = names::remote_controller(&path.into_inner());
    let request = params.into_inner().into_request(Some(parent));
    reply!(services.remote_paths.list(request).await?)
}

async fn get_remote_path(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
) -> RestResult {
    let (controller, id) = path.into_inner();
    let name = names::remote_path(&controller, &id);
    reply!(services.remote_paths.get(api::GetRequest { name }).await?)
}

async fn delete_remote_path(
    services: web::Data<AppServices>,
    path: web::Path<(String, String)>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let (controller, id) = path.into_inner();
    let name = names::remote_path(&controller, &id);
    services
        .remote_paths
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

// virtio

async fn create_virtio_blk(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::VirtioBlkSpec>>,
) -> RestResult {
    reply!(services.virtio_blks.create(body.into_inner()).await?)
}

async fn list_virtio_blks(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.virtio_blks.list(request).await?)
}

async fn get_virtio_blk(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::virtio_blk(&path.into_inner());
    reply!(services.virtio_blks.get(api::GetRequest { name }).await?)
}

async fn delete_virtio_blk(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let name = names::virtio_blk(&path.into_inner());
    services
        .virtio_blks
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_virtio_blk(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::virtio_blk(&path.into_inner());
    reply!(services.virtio_blks.stats(api::StatsRequest { name }).await?)
}

async fn create_virtio_scsi(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::VirtioScsiControllerSpec>>,
) -> RestResult {
    reply!(services.virtio_scsi.create(body.into_inner()).await?)
}

async fn list_virtio_scsi(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.virtio_scsi.list(request).await?)
}

async fn get_virtio_scsi(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::virtio_scsi_controller(&path.into_inner());
    reply!(services.virtio_scsi.get(api::GetRequest { name }).await?)
}

async fn delete_virtio_scsi(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let name = names::virtio_scsi_controller(&path.into_inner());
    services
        .virtio_scsi
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

// volumes

async fn create_aio_volume(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::AioVolumeSpec>>,
) -> RestResult {
    reply!(services.volumes.create_aio(body.into_inner()).await?)
}

async fn list_aio_volumes(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.volumes.list(Some("aio"), request).await?)
}

async fn create_null_volume(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::NullVolumeSpec>>,
) -> RestResult {
    reply!(services.volumes.create_null(body.into_inner()).await?)
}

async fn list_null_volumes(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.volumes.list(Some("null"), request).await?)
}

async fn create_malloc_volume(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::MallocVolumeSpec>>,
) -> RestResult {
    reply!(services.volumes.create_malloc(body.into_inner()).await?)
}

async fn list_malloc_volumes(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.volumes.list(Some("malloc"), request).await?)
}

async fn get_volume(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::volume(&path.into_inner());
    reply!(services.volumes.get(api::GetRequest { name }).await?)
}

async fn delete_volume(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let name = names::volume(&path.into_inner());
    services
        .volumes
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_volume(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::volume(&path.into_inner());
    reply!(services.volumes.stats(api::StatsRequest { name }).await?)
}

// encrypted volumes

async fn create_encrypted_volume(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::EncryptedVolumeSpec>>,
) -> RestResult {
    reply!(services.encrypted_volumes.create(body.into_inner()).await?)
}

async fn list_encrypted_volumes(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.encrypted_volumes.list(request).await?)
}

async fn get_encrypted_volume(
    services: web::Data<AppServices>,
    path: web::Path<String>,
) -> RestResult {
    let name = names::volume(&path.into_inner());
    reply!(services.encrypted_volumes.get(api::GetRequest { name }).await?)
}

async fn update_encrypted_volume(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    body: web::Json<api::EncryptedVolumeSpec>,
) -> RestResult {
    let name = names::volume(&path.into_inner());
    let request = api::UpdateRequest {
        name,
        spec: body.into_inner(),
    };
    reply!(services.encrypted_volumes.update(request).await?)
}

async fn delete_encrypted_volume(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let name = names::volume(&path.into_inner());
    services
        .encrypted_volumes
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_encrypted_volume(
    services: web::Data<AppServices>,
    path: web::Path<String>,
) -> RestResult {
    let name = names::volume(&path.into_inner());
    reply!(services.encrypted_volumes.stats(api::StatsRequest { name }).await?)
}

// qos volumes

async fn create_qos_volume(
    services: web::Data<AppServices>,
    body: web::Json<api::CreateRequest<api::QosVolumeSpec>>,
) -> RestResult {
    reply!(services.qos_volumes.create(body.into_inner()).await?)
}

async fn list_qos_volumes(
    services: web::Data<AppServices>,
    params: web::Query<ListParams>,
) -> RestResult {
    let request = params.into_inner().into_request(None);
    reply!(services.qos_volumes.list(request).await?)
}

async fn get_qos_volume(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::qos_volume(&path.into_inner());
    reply!(services.qos_volumes.get(api::GetRequest { name }).await?)
}

async fn update_qos_volume(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    body: web::Json<api::QosVolumeSpec>,
) -> RestResult {
    let name = names::qos_volume(&path.into_inner());
    let request = api::UpdateRequest {
        name,
        spec: body.into_inner(),
    };
    reply!(services.qos_volumes.update(request).await?)
}

async fn delete_qos_volume(
    services: web::Data<AppServices>,
    path: web::Path<String>,
    params: web::Query<DeleteParams>,
) -> RestResult {
    let name = names::qos_volume(&path.into_inner());
    services
        .qos_volumes
        .delete(delete_request(name, params.into_inner()))
        .await?;
    reply!(serde_json::json!({}))
}

async fn stats_qos_volume(services: web::Data<AppServices>, path: web::Path<String>) -> RestResult {
    let name = names::qos_volume(&path.into_inner());
    reply!(services.qos_volumes.stats(api::StatsRequest { name }).await?)
}

/// Register every route under /v1.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            .route("/nvmeSubsystems", web::post().to(create_subsystem))
            .route("/nvmeSubsystems", web::get().to(list_subsystems))
            .route("/nvmeSubsystems/{subsystem}", web::get().to(get_subsystem))
            .route("/nvmeSubsystems/{subsystem}", web::delete().to(delete_subsystem))
            .route("/nvmeSubsystems/{subsystem}/stats", web::get().to(stats_subsystem))
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeControllers",
                web::post().to(create_controller),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeControllers",
                web::get().to(list_controllers),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeControllers/{controller}",
                web::get().to(get_controller),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeControllers/{controller}",
                web::delete().to(delete_controller),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeControllers/{controller}/stats",
                web::get().to(stats_controller),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeNamespaces",
                web::post().to(create_namespace),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeNamespaces",
                web::get().to(list_namespaces),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeNamespaces/{namespace}",
                web::get().to(get_namespace),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeNamespaces/{namespace}",
                web::delete().to(delete_namespace),
            )
            .route(
                "/nvmeSubsystems/{subsystem}/nvmeNamespaces/{namespace}/stats",
                web::get().to(stats_namespace),
            )
            .route("/nvmeRemoteControllers", web::post().to(create_remote_controller))
            .route("/nvmeRemoteControllers", web::get().to(list_remote_controllers))
            .route(
                "/nvmeRemoteControllers/{controller}",
                web::get().to(get_remote_controller),
            )
            .route(
                "/nvmeRemoteControllers/{controller}",
                web::put().to(update_remote_controller),
            )
            .route(
                "/nvmeRemoteControllers/{controller}",
                web::delete().to(delete_remote_controller),
            )
            .route(
                "/nvmeRemoteControllers/{controller}/stats",
                web::get().to(stats_remote_controller),
            )
            .route(
                "/nvmeRemoteControllers/{controller}/nvmePaths",
                web::post().to(create_remote_path),
            )
            .route(
                "/nvmeRemoteControllers/{controller}/nvmePaths",
                web::get().to(list_remote_paths),
            )
            .route(
                "/nvmeRemoteControllers/{controller}/nvmePaths/{path}",
                web::get().to(get_remote_path),
            )
            .route(
                "/nvmeRemoteControllers/{controller}/nvmePaths/{path}",
                web::delete().to(delete_remote_path),
            )
            .route("/virtioBlks", web::post().to(create_virtio_blk))
            .route("/virtioBlks", web::get().to(list_virtio_blks))
            .route("/virtioBlks/{blk}", web::get().to(get_virtio_blk))
            .route("/virtioBlks/{blk}", web::delete().to(delete_virtio_blk))
            .route("/virtioBlks/{blk}/stats", web::get().to(stats_virtio_blk))
            .route("/virtioScsiControllers", web::post().to(create_virtio_scsi))
            .route("/virtioScsiControllers", web::get().to(list_virtio_scsi))
            .route("/virtioScsiControllers/{controller}", web::get().to(get_virtio_scsi))
            .route(
                "/virtioScsiControllers/{controller}",
                web::delete().to(delete_virtio_scsi),
            )
            .route("/aioVolumes", web::post().to(create_aio_volume))
            .route("/aioVolumes", web::get().to(list_aio_volumes))
            .route("/nullVolumes", web::post().to(create_null_volume))
            .route("/nullVolumes", web::get().to(list_null_volumes))
            .route("/mallocVolumes", web::post().to(create_malloc_volume))
            .route("/mallocVolumes", web::get().to(list_malloc_volumes))
            .route("/volumes/{volume}", web::get().to(get_volume))
            .route("/volumes/{volume}", web::delete().to(delete_volume))
            .route("/volumes/{volume}/stats", web::get().to(stats_volume))
            .route("/encryptedVolumes", web::post().to(create_encrypted_volume))
            .route("/encryptedVolumes", web::get().to(list_encrypted_volumes))
            .route("/encryptedVolumes/{volume}", web::get().to(get_encrypted_volume))
            .route("/encryptedVolumes/{volume}", web::put().to(update_encrypted_volume))
            .route(
                "/encryptedVolumes/{volume}",
                web::delete().to(delete_encrypted_volume),
            )
            .route(
                "/encryptedVolumes/{volume}/stats",
                web::get().to(stats_encrypted_volume),
            )
            .route("/qosVolumes", web::post().to(create_qos_volume))
            .route("/qosVolumes", web::get().to(list_qos_volumes))
            .route("/qosVolumes/{volume}", web::get().to(get_qos_volume))
            .route("/qosVolumes/{volume}", web::put().to(update_qos_volume))
            .route("/qosVolumes/{volume}", web::delete().to(delete_qos_volume))
            .route("/qosVolumes/{volume}/stats", web::get().to(stats_qos_volume)),
    );
}
