//! The orchestration layer: one coordinator per resource family, each
//! composing the data-plane client, the hypervisor monitor, the metadata
//! store and the device locator into multi-step procedures with
//! compensations on failure.
//!
//! Every create follows the same outline: resolve the resource name, probe
//! the store for an idempotent replay, run the family-specific plan with a
//! compensation registered per completed step, then commit the record.
//! Deletes never short-circuit: each reverse step is attempted and the
//! combined outcome is classified as ok, partial or fatal.

use crate::{
    api::{self, names},
    error::{self, OpError},
    location::{DeviceLocation, DeviceLocator},
    monitor::Monitor,
    pagination::Pager,
    spdk::SpdkClient,
    store::MetaStore,
};
use std::{path::PathBuf, sync::Arc};

pub mod lock;
pub mod plan;

pub mod backing;
pub mod controller;
pub mod crypto;
pub mod namespace;
pub mod qos;
pub mod remote;
pub mod subsystem;
pub mod virtio_blk;
pub mod virtio_scsi;

/// Shared collaborators of all coordinators.
#[derive(Debug)]
pub struct Context {
    pub spdk: SpdkClient,
    pub store: MetaStore,
    /// Present only when hypervisor coordination is enabled.
    pub monitor: Option<Monitor>,
    pub locator: DeviceLocator,
    /// Directory holding the per-controller vhost / vfio-user sockets.
    pub ctrlr_dir: PathBuf,
    pub locks: lock::ResourceLockManager,
    pub pager: Pager,
}

pub type CtxRef = Arc<Context>;

impl Context {
    pub fn new(
        spdk: SpdkClient,
        store: MetaStore,
        monitor: Option<Monitor>,
        locator: DeviceLocator,
        ctrlr_dir: PathBuf,
    ) -> Result<CtxRef, OpError> {
        if !ctrlr_dir.is_dir() {
            return Err(OpError::invalid(format!(
                "controller directory '{}' does not exist",
                ctrlr_dir.display()
            )));
        }
        Ok(Arc::new(Self {
            spdk,
            store,
            monitor,
            locator,
            ctrlr_dir,
            locks: lock::ResourceLockManager::new(256),
            pager: Pager::new(),
        }))
    }
}

/// A computed (bus, addr) pair may host at most one live device: before a
/// new one is plugged, the resolved locations of every record occupying a
/// slot on the configured buses are scanned for the same pair. Covers both
/// families that hot-plug devices, Virtio-blk and PCIE/VFIOUSER Nvme
/// controllers.
pub(crate) async fn ensure_location_free(
    ctx: &Context,
    location: &DeviceLocation,
) -> Result<(), OpError> {
    if location.bus.is_none() && location.addr.is_none() {
        // hypervisor-assigned placement, slot uniqueness is its problem
        return Ok(());
    }

    let blks: Vec<api::VirtioBlk> = ctx
        .store
        .list(&format!("{}/", names::VIRTIO_BLKS))
        .await?;
    for blk in blks {
        if occupies(ctx, blk.spec.pcie, location) {
            return occupied(location, blk.name);
        }
    }

    let prefix = format!("{}/", names::NVME_SUBSYSTEMS);
    let controllers: Vec<api::NvmeController> = ctx
        .store
        .list_matching(&prefix, |key| {
            names::parse(key, &[names::NVME_SUBSYSTEMS, names::NVME_CONTROLLERS]).is_some()
        })
        .await?;
    for controller in controllers {
        if controller.spec.trtype == api::TrType::Tcp {
            continue;
        }
        if occupies(ctx, controller.spec.pcie, location) {
            return occupied(location, controller.name);
        }
    }
    Ok(())
}

fn occupies(ctx: &Context, pcie: Option<api::PciEndpoint>, location: &DeviceLocation) -> bool {
    match pcie {
        Some(pcie) => ctx
            .locator
            .calculate(pcie.physical_function)
            .map(|existing| existing == *location)
            .unwrap_or(false),
        None => false,
    }
}

fn occupied<T>(location: &DeviceLocation, name: String) -> Result<T, OpError> {
    error::DeviceEndpointInUse {
        bus: location.bus.clone().unwrap_or_default(),
        addr: location.addr.clone().unwrap_or_default(),
        name,
    }
    .fail()
}

/// Resolve the caller-supplied resource id, or allocate a generated one.
pub(crate) fn resolve_id(id: Option<String>) -> Result<String, OpError> {
    match id {
        Some(id) => {
            if !names::valid_id(&id) {
                return Err(OpError::invalid(format!("invalid resource id '{}'", id)));
            }
            Ok(id)
        }
        None => Ok(names::generated_id()),
    }
}
