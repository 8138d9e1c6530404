//! Classified errors of the orchestration layer and their mapping onto the
//! status codes the service boundary speaks.

use crate::{spdk, store::StoreError};
use snafu::Snafu;
use std::path::PathBuf;
use tonic::{Code, Status};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum OpError {
    #[snafu(display("{}", msg))]
    InvalidArgument { msg: String },
    #[snafu(display("unable to find resource '{}'", name))]
    NotFound { name: String },
    #[snafu(display("resource '{}' already exists with a different spec", name))]
    AlreadyExists { name: String },
    #[snafu(display("unknown pagination token '{}'", token))]
    UnknownPageToken { token: String },
    #[snafu(display("resource '{}' still has {} nested resources", name, children))]
    HasChildren { name: String, children: usize },
    #[snafu(display("no PCIe endpoint provided for '{}'", name))]
    NoPcieEndpoint { name: String },
    #[snafu(display(
        "device endpoint {}:{} is already occupied by '{}'",
        bus,
        addr,
        name
    ))]
    DeviceEndpointInUse {
        bus: String,
        addr: String,
        name: String,
    },
    #[snafu(display("could not create directory '{}': {}", path.display(), source))]
    FailedToCreateNvmeDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not write key file '{}': {}", path.display(), source))]
    PskFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("filesystem operation on '{}' failed: {}", path.display(), source))]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("monitor creation: {}", source))]
    MonitorCreation { source: qmp::Error },
    #[snafu(display("could not add chardev '{}': {}", id, source))]
    AddChardevFailed { id: String, source: qmp::Error },
    #[snafu(display("could not add device '{}': {}", id, source))]
    AddDeviceFailed { id: String, source: qmp::Error },
    #[snafu(display("device '{}' did not appear on the PCI bus", id))]
    DeviceNotPresent { id: String },
    #[snafu(display("monitor: {}", source))]
    Monitor { source: qmp::Error },
    #[snafu(display("device for '{}' not deleted: {}", name, detail))]
    DeviceNotDeleted { name: String, detail: String },
    #[snafu(display("device for '{}' partially deleted: {}", name, detail))]
    DevicePartiallyDeleted { name: String, detail: String },
    #[snafu(context(false), display("{}", source))]
    Spdk { source: spdk::Error },
    #[snafu(context(false), display("{}", source))]
    Store { source: StoreError },
}

impl OpError {
    /// Shorthand for ad-hoc invalid argument errors.
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        OpError::InvalidArgument { msg: msg.into() }
    }

    /// Conversion to the status code taxonomy of the service boundary.
    pub fn into_status(self) -> Status {
        match self {
            OpError::InvalidArgument { .. }
            | OpError::NoPcieEndpoint { .. }
            | OpError::DeviceEndpointInUse { .. } => {
                Status::invalid_argument(self.to_string())
            }
            OpError::NotFound { .. } | OpError::UnknownPageToken { .. } => {
                Status::not_found(self.to_string())
            }
            OpError::AlreadyExists { .. } => Status::already_exists(self.to_string()),
            OpError::HasChildren { .. }
            | OpError::FailedToCreateNvmeDir { .. }
            | OpError::PskFile { .. }
            | OpError::AddChardevFailed { .. }
            | OpError::AddDeviceFailed { .. }
            | OpError::DeviceNotPresent { .. }
            | OpError::DeviceNotDeleted { .. } => {
                Status::failed_precondition(self.to_string())
            }
            OpError::MonitorCreation { .. }
            | OpError::Monitor { .. }
            | OpError::Filesystem { .. }
            | OpError::DevicePartiallyDeleted { .. } => Status::internal(self.to_string()),
            OpError::Spdk { source } => source.into_status(),
            OpError::Store { .. } => Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<OpError> for Status {
    fn from(e: OpError) -> Self {
        e.into_status()
    }
}
