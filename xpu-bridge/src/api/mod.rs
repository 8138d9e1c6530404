//! Typed model of the high-level storage API: resource records as they are
//! persisted in the metadata store and returned to callers, plus the request
//! envelopes the service layer accepts.
//!
//! Records round-trip through json; consumers rely on semantic equality of
//! the deserialized values, never on byte equality.

use strum_macros::{Display, EnumString};

pub mod names;

/// Transport of an Nvme controller or fabrics path. The strum rendering is
/// the spelling the data-plane expects in listen addresses and attach
/// arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TrType {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "PCIE")]
    Pcie,
    #[serde(rename = "VFIOUSER")]
    VfioUser,
}

/// Address family of a tcp endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Adrfam {
    #[serde(rename = "IPV4")]
    Ipv4,
    #[serde(rename = "IPV6")]
    Ipv6,
}

/// Multipath personality of a remote controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Multipath {
    #[serde(rename = "DISABLE")]
    Disable,
    #[serde(rename = "FAILOVER")]
    Failover,
    #[serde(rename = "MULTIPATH")]
    Multipath,
}

/// Supported ciphers of an encrypted volume. The cipher determines the key
/// length exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cipher {
    #[serde(rename = "AES_XTS_128")]
    AesXts128,
    #[serde(rename = "AES_XTS_256")]
    AesXts256,
}

impl Cipher {
    /// Required key material size in bits: two half-keys of the cipher
    /// strength each.
    pub fn key_size_bits(&self) -> usize {
        match self {
            Cipher::AesXts128 => 256,
            Cipher::AesXts256 => 512,
        }
    }
}

/// Tcp listen endpoint of a controller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpEndpoint {
    #[serde(default)]
    pub traddr: String,
    #[serde(default)]
    pub trsvcid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adrfam: Option<Adrfam>,
}

/// Logical PCI endpoint: physical function, virtual function and port as the
/// high-level API counts them. Placement on the hypervisor is derived from
/// the physical function by the device locator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PciEndpoint {
    #[serde(default)]
    pub physical_function: i32,
    #[serde(default)]
    pub virtual_function: i32,
    #[serde(default)]
    pub port_id: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NvmeSubsystemSpec {
    #[serde(default)]
    pub nqn: String,
    #[serde(default)]
    pub model_number: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub max_namespaces: i64,
    #[serde(default)]
    pub max_controllers: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NvmeSubsystem {
    pub name: String,
    #[serde(flatten)]
    pub spec: NvmeSubsystemSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NvmeControllerSpec {
    pub trtype: TrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcie: Option<PciEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psk: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_namespaces: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NvmeController {
    pub name: String,
    #[serde(flatten)]
    pub spec: NvmeControllerSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NvmeNamespaceSpec {
    pub volume_name_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsid: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_nsid: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NvmeNamespace {
    pub name: String,
    #[serde(flatten)]
    pub spec: NvmeNamespaceSpec,
    /// Namespace id the data-plane actually assigned.
    #[serde(default)]
    pub assigned_nsid: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteControllerSpec {
    pub trtype: TrType,
    pub multipath: Multipath,
    #[serde(default)]
    pub hdgst: bool,
    #[serde(default)]
    pub ddgst: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psk: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteController {
    pub name: String,
    #[serde(flatten)]
    pub spec: RemoteControllerSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemotePathSpec {
    pub trtype: TrType,
    pub traddr: String,
    #[serde(default)]
    pub trsvcid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adrfam: Option<Adrfam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnqn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostnqn: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemotePath {
    pub name: String,
    #[serde(flatten)]
    pub spec: RemotePathSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtioBlkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcie: Option<PciEndpoint>,
    pub volume_name_ref: String,
    #[serde(default)]
    pub max_io_qps: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtioBlk {
    pub name: String,
    #[serde(flatten)]
    pub spec: VirtioBlkSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtioScsiControllerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcie: Option<PciEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtioScsiController {
    pub name: String,
    #[serde(flatten)]
    pub spec: VirtioScsiControllerSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedVolumeSpec {
    pub volume_name_ref: String,
    pub cipher: Cipher,
    pub key: Vec<u8>,
}

/// Max-rate limits of a QoS volume. Only the rw-iops and the three mbs
/// fields are supported; read/write iops and min limits are rejected by
/// validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosLimit {
    #[serde(default)]
    pub rd_iops_kiops: i64,
    #[serde(default)]
    pub wr_iops_kiops: i64,
    #[serde(default)]
    pub rw_iops_kiops: i64,
    #[serde(default)]
    pub rd_mbs: i64,
    #[serde(default)]
    pub wr_mbs: i64,
    #[serde(default)]
    pub rw_mbs: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QosVolumeSpec {
    pub volume_name_ref: String,
    #[serde(default)]
    pub max_limit: QosLimit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_limit: Option<QosLimit>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QosVolume {
    pub name: String,
    #[serde(flatten)]
    pub spec: QosVolumeSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AioVolumeSpec {
    pub filename: String,
    #[serde(default)]
    pub block_size: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NullVolumeSpec {
    pub block_size: i64,
    pub blocks_count: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MallocVolumeSpec {
    pub block_size: i64,
    pub blocks_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Backing and encrypted volumes share the `volumes/` namespace; the kind
/// tag keeps the records apart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VolumeSpec {
    Aio(AioVolumeSpec),
    Null(NullVolumeSpec),
    Malloc(MallocVolumeSpec),
    Encrypted(EncryptedVolumeSpec),
}

impl VolumeSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            VolumeSpec::Aio(_) => "aio",
            VolumeSpec::Null(_) => "null",
            VolumeSpec::Malloc(_) => "malloc",
            VolumeSpec::Encrypted(_) => "encrypted",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub spec: VolumeSpec,
}

/// I/O statistics of a volume, projected from the data-plane iostat record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub bytes_read: i64,
    pub read_ops_count: i64,
    pub bytes_written: i64,
    pub write_ops_count: i64,
    pub read_latency_ticks: i64,
    pub write_latency_ticks: i64,
}

// request envelopes accepted by the service layer

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateRequest<S> {
    /// Parent resource name for nested collections, empty for top-level
    /// ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Caller-chosen resource id; a system id is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub spec: S,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub name: String,
    /// Deleting an unknown resource is a success when set.
    #[serde(default)]
    pub allow_missing: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetRequest {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateRequest<S> {
    pub name: String,
    pub spec: S,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub page_size: i32,
    #[serde(default)]
    pub page_token: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsRequest {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsResponse {
    pub stats: VolumeStats,
}
