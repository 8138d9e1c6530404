//! Service dispatch layer: one thin service per resource family that
//! validates the request at the boundary (name grammar, id character set,
//! required fields) and hands pre-validated input to its coordinator,
//! mapping classified errors onto the status-code taxonomy.

use crate::{api::names, orch::CtxRef};
use tonic::Status;

pub mod nvme;
pub mod remote;
pub mod virtio;
pub mod volume;

pub use nvme::{ControllerService, NamespaceService, SubsystemService};
pub use remote::{RemoteControllerService, RemotePathService};
pub use virtio::{VirtioBlkService, VirtioScsiService};
pub use volume::{EncryptedVolumeService, QosVolumeService, VolumeService};

pub type SvcResult<T> = Result<T, Status>;

/// Validate a full resource name against the collection chain it must
/// spell.
pub(crate) fn check_name(name: &str, collections: &[&str]) -> Result<(), Status> {
    if name.is_empty() {
        return Err(Status::invalid_argument("resource name is required"));
    }
    if names::parse(name, collections).is_none() {
        return Err(Status::invalid_argument(format!(
            "invalid resource name '{}'",
            name
        )));
    }
    Ok(())
}

/// Validate the character set of a caller-chosen resource id.
pub(crate) fn check_id(id: &Option<String>) -> Result<(), Status> {
    if let Some(id) = id {
        if !names::valid_id(id) {
            return Err(Status::invalid_argument(format!(
                "invalid resource id '{}'",
                id
            )));
        }
    }
    Ok(())
}

/// All services of the bridge, wired over one shared context.
#[derive(Clone, Debug)]
pub struct AppServices {
    pub subsystems: SubsystemService,
    pub controllers: ControllerService,
    pub namespaces: NamespaceService,
    pub remote_controllers: RemoteControllerService,
    pub remote_paths: RemotePathService,
    pub virtio_blks: VirtioBlkService,
    pub virtio_scsi: VirtioScsiService,
    pub volumes: VolumeService,
    pub encrypted_volumes: EncryptedVolumeService,
    pub qos_volumes: QosVolumeService,
}

impl AppServices {
    pub fn new(ctx: CtxRef) -> Self {
        Self {
            subsystems: SubsystemService::new(ctx.clone()),
            controllers: ControllerService::new(ctx.clone()),
            namespaces: NamespaceService::new(ctx.clone()),
            remote_controllers: RemoteControllerService::new(ctx.clone()),
            remote_paths: RemotePathService::new(ctx.clone()),
            virtio_blks: VirtioBlkService::new(ctx.clone()),
            virtio_scsi: VirtioScsiService::new(ctx.clone()),
            volumes: VolumeService::new(ctx.clone()),
            encrypted_volumes: EncryptedVolumeService::new(ctx.clone()),
            qos_volumes: QosVolumeService::new(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_grammar_is_enforced() {
        assert!(check_name("nvmeSubsystems/sub0", &[names::NVME_SUBSYSTEMS]).is_ok());
        assert!(check_name("", &[names::NVME_SUBSYSTEMS]).is_err());
        assert!(check_name("bogus/sub0", &[names::NVME_SUBSYSTEMS]).is_err());
        assert!(check_name("nvmeSubsystems/bad id", &[names::NVME_SUBSYSTEMS]).is_err());
    }

    #[test]
    fn id_charset_is_enforced() {
        assert!(check_id(&None).is_ok());
        assert!(check_id(&Some("blk-0".to_string())).is_ok());
        let err = check_id(&Some("bad/id".to_string())).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
