//! Hierarchical resource names: `collection/{id}` segments, joined by `/`,
//! alternating collection name and resource id. Names are the canonical keys
//! of the metadata store and the identifiers exchanged with clients.

use uuid::Uuid;

pub const NVME_SUBSYSTEMS: &str = "nvmeSubsystems";
pub const NVME_CONTROLLERS: &str = "nvmeControllers";
pub const NVME_NAMESPACES: &str = "nvmeNamespaces";
pub const NVME_REMOTE_CONTROLLERS: &str = "nvmeRemoteControllers";
pub const NVME_PATHS: &str = "nvmePaths";
pub const VIRTIO_BLKS: &str = "virtioBlks";
pub const VIRTIO_SCSI_CONTROLLERS: &str = "virtioScsiControllers";
pub const VOLUMES: &str = "volumes";
pub const QOS_VOLUMES: &str = "qosVolumes";

/// A resource id: non-empty, at most 63 characters, alphanumeric start,
/// alphanumeric / `-` / `_` / `.` body.
pub fn valid_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 63 {
        return false;
    }
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Allocate a system-generated resource id.
pub fn generated_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn subsystem(id: &str) -> String {
    format!("{}/{}", NVME_SUBSYSTEMS, id)
}

pub fn controller(subsystem_id: &str, id: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        NVME_SUBSYSTEMS, subsystem_id, NVME_CONTROLLERS, id
    )
}

pub fn namespace(subsystem_id: &str, id: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        NVME_SUBSYSTEMS, subsystem_id, NVME_NAMESPACES, id
    )
}

pub fn remote_controller(id: &str) -> String {
    format!("{}/{}", NVME_REMOTE_CONTROLLERS, id)
}

pub fn remote_path(controller_id: &str, id: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        NVME_REMOTE_CONTROLLERS, controller_id, NVME_PATHS, id
    )
}

pub fn virtio_blk(id: &str) -> String {
    format!("{}/{}", VIRTIO_BLKS, id)
}

pub fn virtio_scsi_controller(id: &str) -> String {
    format!("{}/{}", VIRTIO_SCSI_CONTROLLERS, id)
}

pub fn volume(id: &str) -> String {
    format!("{}/{}", VOLUMES, id)
}

pub fn qos_volume(id: &str) -> String {
    format!("{}/{}", QOS_VOLUMES, id)
}

/// Last path segment of a name: the resource's own id.
pub fn last_segment(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Split a name into the ids of a `collection/{id}[/collection/{id}]` chain,
/// verifying that the collection segments match the expected ones in order.
pub fn parse<'a>(name: &'a str, collections: &[&str]) -> Option<Vec<&'a str>> {
    let segments: Vec<&str> = name.split('/').collect();
    if segments.len() != collections.len() * 2 {
        return None;
    }
    let mut ids = Vec::with_capacity(collections.len());
    for (pair, collection) in segments.chunks(2).zip(collections) {
        if pair[0] != *collection || !valid_id(pair[1]) {
            return None;
        }
        ids.push(pair[1]);
    }
    Some(ids)
}
