//! Typed wrappers for the data-plane json-rpc methods the bridge emits.
//! Argument and result shapes follow the daemon's wire contract; every
//! method that answers with a bare boolean is checked for `true` so a
//! silently refused call surfaces as an error.

use jsonrpc::RpcClient;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tonic::Status;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("'{}': {}", method, source))]
    Rpc {
        method: String,
        source: jsonrpc::error::Error,
    },
    #[snafu(display("unexpected SPDK call result for method '{}'", method))]
    UnexpectedResult { method: &'static str },
    #[snafu(display("expected exactly one result entry from '{}', got {}", method, count))]
    UnexpectedShape { method: &'static str, count: usize },
}

impl Error {
    pub fn into_status(self) -> Status {
        match self {
            Error::Rpc { source, .. } => source.into_status(),
            _ => Status::internal(self.to_string()),
        }
    }
}

/// Pick the single entry out of a result list that must hold exactly one.
pub fn expect_single<T>(mut items: Vec<T>, method: &'static str) -> Result<T, Error> {
    if items.len() != 1 {
        return UnexpectedShape {
            method,
            count: items.len(),
        }
        .fail();
    }
    Ok(items.remove(0))
}

fn ensure(result: bool, method: &'static str) -> Result<(), Error> {
    if result {
        Ok(())
    } else {
        UnexpectedResult { method }.fail()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ListenAddress {
    pub trtype: String,
    pub traddr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trsvcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adrfam: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AttachControllerArgs {
    pub name: String,
    pub trtype: String,
    pub traddr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adrfam: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trsvcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnqn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostnqn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdgst: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddgst: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psk: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DetachControllerArgs {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traddr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adrfam: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trsvcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnqn: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CreateSubsystemArgs {
    pub nqn: String,
    pub serial_number: String,
    pub model_number: String,
    pub allow_any_host: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_namespaces: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cntlid: Option<i64>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct QosLimitArgs {
    pub name: String,
    pub rw_ios_per_sec: i64,
    pub r_mbytes_per_sec: i64,
    pub w_mbytes_per_sec: i64,
    pub rw_mbytes_per_sec: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BdevInfo {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub block_size: i64,
    #[serde(default)]
    pub num_blocks: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BdevIoStat {
    pub name: String,
    #[serde(default)]
    pub bytes_read: i64,
    #[serde(default)]
    pub num_read_ops: i64,
    #[serde(default)]
    pub bytes_written: i64,
    #[serde(default)]
    pub num_write_ops: i64,
    #[serde(default)]
    pub read_latency_ticks: i64,
    #[serde(default)]
    pub write_latency_ticks: i64,
}

impl From<BdevIoStat> for crate::api::VolumeStats {
    fn from(stat: BdevIoStat) -> Self {
        Self {
            bytes_read: stat.bytes_read,
            read_ops_count: stat.num_read_ops,
            bytes_written: stat.bytes_written,
            write_ops_count: stat.num_write_ops,
            read_latency_ticks: stat.read_latency_ticks,
            write_latency_ticks: stat.write_latency_ticks,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IoStats {
    #[serde(default)]
    pub tick_rate: i64,
    pub bdevs: Vec<BdevIoStat>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NvmeControllerInfo {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VhostControllerInfo {
    pub ctrlr: String,
    #[serde(default)]
    pub socket: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NvmfSubsystemInfo {
    pub nqn: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
}

/// Client for the data-plane daemon. Cheap to clone; all clones share one
/// underlying json-rpc connection.
#[derive(Clone, Debug)]
pub struct SpdkClient {
    rpc: Arc<RpcClient>,
}

impl SpdkClient {
    pub fn new<T: Into<String>>(addr: T) -> Self {
        Self {
            rpc: Arc::new(RpcClient::new(addr.into())),
        }
    }

    async fn call<A, R>(&self, method: &'static str, args: Option<A>) -> Result<R, Error>
    where
        A: serde::ser::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.rpc.call(method, args).await.context(Rpc {
            method: method.to_string(),
        })
    }

    pub async fn bdev_aio_create(
        &self,
        name: &str,
        filename: &str,
        block_size: i64,
    ) -> Result<String, Error> {
        self.call(
            "bdev_aio_create",
            Some(serde_json::json!({
                "name": name,
                "filename": filename,
                "block_size": block_size,
            })),
        )
        .await
    }

    pub async fn bdev_aio_delete(&self, name: &str) -> Result<(), Error> {
        let ok: bool = self
            .call("bdev_aio_delete", Some(serde_json::json!({ "name": name })))
            .await?;
        ensure(ok, "bdev_aio_delete")
    }

    pub async fn bdev_malloc_create(
        &self,
        name: &str,
        num_blocks: i64,
        block_size: i64,
        uuid: Option<&str>,
    ) -> Result<String, Error> {
        let mut args = serde_json::json!({
            "name": name,
            "num_blocks": num_blocks,
            "block_size": block_size,
        });
        if let Some(uuid) = uuid {
            args["uuid"] = Value::from(uuid);
        }
        self.call("bdev_malloc_create", Some(args)).await
    }

    pub async fn bdev_malloc_delete(&self, name: &str) -> Result<(), Error> {
        let ok: bool = self
            .call("bdev_malloc_delete", Some(serde_json::json!({ "name": name })))
            .await?;
        ensure(ok, "bdev_malloc_delete")
    }

    pub async fn bdev_null_create(
        &self,
        name: &str,
        num_blocks: i64,
        block_size: i64,
    ) -> Result<String, Error> {
        self.call(
            "bdev_null_create",
            Some(serde_json::json!({
                "name": name,
                "num_blocks": num_blocks,
                "block_size": block_size,
            })),
        )
        .await
    }

    pub async fn bdev_null_delete(&self, name: &str) -> Result<(), Error> {
        let ok: bool = self
            .call("bdev_null_delete", Some(serde_json::json!({ "name": name })))
            .await?;
        ensure(ok, "bdev_null_delete")
    }

    pub async fn bdev_nvme_attach_controller(
        &self,
        args: &AttachControllerArgs,
    ) -> Result<Vec<String>, Error> {
        self.call("bdev_nvme_attach_controller", Some(args)).await
    }

    pub async fn bdev_nvme_detach_controller(
        &self,
        args: &DetachControllerArgs,
    ) -> Result<(), Error> {
        let ok: bool = self.call("bdev_nvme_detach_controller", Some(args)).await?;
        ensure(ok, "bdev_nvme_detach_controller")
    }

    pub async fn bdev_nvme_get_controllers(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<NvmeControllerInfo>, Error> {
        let args = name.map(|name| serde_json::json!({ "name": name }));
        self.call("bdev_nvme_get_controllers", args).await
    }

    pub async fn bdev_get_bdevs(&self, name: Option<&str>) -> Result<Vec<BdevInfo>, Error> {
        let args = name.map(|name| serde_json::json!({ "name": name }));
        self.call("bdev_get_bdevs", args).await
    }

    /// Fetch iostat of one bdev; the result must contain exactly one entry.
    pub async fn bdev_get_iostat(&self, name: &str) -> Result<BdevIoStat, Error> {
        let stats: IoStats = self
            .call("bdev_get_iostat", Some(serde_json::json!({ "name": name })))
            .await?;
        expect_single(stats.bdevs, "bdev_get_iostat")
    }

    pub async fn bdev_crypto_create(
        &self,
        name: &str,
        base_bdev_name: &str,
        key_name: &str,
    ) -> Result<String, Error> {
        self.call(
            "bdev_crypto_create",
            Some(serde_json::json!({
                "name": name,
                "base_bdev_name": base_bdev_name,
                "key_name": key_name,
            })),
        )
        .await
    }

    pub async fn bdev_crypto_delete(&self, name: &str) -> Result<(), Error> {
        let ok: bool = self
            .call("bdev_crypto_delete", Some(serde_json::json!({ "name": name })))
            .await?;
        ensure(ok, "bdev_crypto_delete")
    }

    pub async fn bdev_set_qos_limit(&self, args: &QosLimitArgs) -> Result<(), Error> {
        let ok: bool = self.call("bdev_set_qos_limit", Some(args)).await?;
        ensure(ok, "bdev_set_qos_limit")
    }

    pub async fn accel_crypto_key_create(
        &self,
        name: &str,
        cipher: &str,
        key: &str,
        key2: &str,
    ) -> Result<(), Error> {
        let ok: bool = self
            .call(
                "accel_crypto_key_create",
                Some(serde_json::json!({
                    "cipher": cipher,
                    "name": name,
                    "key": key,
                    "key2": key2,
                })),
            )
            .await?;
        ensure(ok, "accel_crypto_key_create")
    }

    pub async fn accel_crypto_key_destroy(&self, key_name: &str) -> Result<(), Error> {
        let ok: bool = self
            .call(
                "accel_crypto_key_destroy",
                Some(serde_json::json!({ "key_name": key_name })),
            )
            .await?;
        ensure(ok, "accel_crypto_key_destroy")
    }

    pub async fn nvmf_create_subsystem(&self, args: &CreateSubsystemArgs) -> Result<(), Error> {
        let ok: bool = self.call("nvmf_create_subsystem", Some(args)).await?;
        ensure(ok, "nvmf_create_subsystem")
    }

    pub async fn nvmf_delete_subsystem(&self, nqn: &str) -> Result<(), Error> {
        let ok: bool = self
            .call("nvmf_delete_subsystem", Some(serde_json::json!({ "nqn": nqn })))
            .await?;
        ensure(ok, "nvmf_delete_subsystem")
    }

    pub async fn nvmf_subsystem_add_listener(
        &self,
        nqn: &str,
        listen_address: &ListenAddress,
        psk: Option<&str>,
    ) -> Result<(), Error> {
        let mut args = serde_json::json!({
            "nqn": nqn,
            "listen_address": listen_address,
        });
        if let Some(psk) = psk {
            args["psk"] = Value::from(psk);
            args["secure_channel"] = Value::from(true);
        }
        let ok: bool = self.call("nvmf_subsystem_add_listener", Some(args)).await?;
        ensure(ok, "nvmf_subsystem_add_listener")
    }

    pub async fn nvmf_subsystem_remove_listener(
        &self,
        nqn: &str,
        listen_address: &ListenAddress,
    ) -> Result<(), Error> {
        let ok: bool = self
            .call(
                "nvmf_subsystem_remove_listener",
                Some(serde_json::json!({
                    "nqn": nqn,
                    "listen_address": listen_address,
                })),
            )
            .await?;
        ensure(ok, "nvmf_subsystem_remove_listener")
    }

    /// Attach a namespace; returns the nsid the data-plane assigned.
    pub async fn nvmf_subsystem_add_ns(
        &self,
        nqn: &str,
        bdev_name: &str,
        uuid: Option<&str>,
        nsid: Option<i32>,
    ) -> Result<i32, Error> {
        let mut namespace = serde_json::json!({ "bdev_name": bdev_name });
        if let Some(uuid) = uuid {
            namespace["uuid"] = Value::from(uuid);
        }
        if let Some(nsid) = nsid {
            namespace["nsid"] = Value::from(nsid);
        }
        self.call(
            "nvmf_subsystem_add_ns",
            Some(serde_json::json!({ "nqn": nqn, "namespace": namespace })),
        )
        .await
    }

    pub async fn nvmf_subsystem_remove_ns(&self, nqn: &str, nsid: i32) -> Result<(), Error> {
        let ok: bool = self
            .call(
                "nvmf_subsystem_remove_ns",
                Some(serde_json::json!({ "nqn": nqn, "nsid": nsid })),
            )
            .await?;
        ensure(ok, "nvmf_subsystem_remove_ns")
    }

    pub async fn nvmf_get_subsystems(
        &self,
        nqn: Option<&str>,
    ) -> Result<Vec<NvmfSubsystemInfo>, Error> {
        let args = nqn.map(|nqn| serde_json::json!({ "nqn": nqn }));
        self.call("nvmf_get_subsystems", args).await
    }

    /// Raw per-subsystem statistics; the shape is owned by the data-plane
    /// and passed through verbatim.
    pub async fn nvmf_get_subsystem_stats(&self, nqn: &str) -> Result<Value, Error> {
        self.call(
            "nvmf_get_subsystem_stats",
            Some(serde_json::json!({ "nqn": nqn })),
        )
        .await
    }

    pub async fn vhost_create_blk_controller(
        &self,
        name: &str,
        dev_name: &str,
    ) -> Result<(), Error> {
        let ok: bool = self
            .call(
                "vhost_create_blk_controller",
                Some(serde_json::json!({ "name": name, "dev_name": dev_name })),
            )
            .await?;
        ensure(ok, "vhost_create_blk_controller")
    }

    pub async fn vhost_create_scsi_controller(&self, ctrlr: &str) -> Result<(), Error> {
        let ok: bool = self
            .call(
                "vhost_create_scsi_controller",
                Some(serde_json::json!({ "ctrlr": ctrlr })),
            )
            .await?;
        ensure(ok, "vhost_create_scsi_controller")
    }

    pub async fn vhost_delete_controller(&self, ctrlr: &str) -> Result<(), Error> {
        let ok: bool = self
            .call(
                "vhost_delete_controller",
                Some(serde_json::json!({ "ctrlr": ctrlr })),
            )
            .await?;
        ensure(ok, "vhost_delete_controller")
    }

    pub async fn vhost_get_controllers(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<VhostControllerInfo>, Error> {
        let args = name.map(|name| serde_json::json!({ "name": name }));
        self.call("vhost_get_controllers", args).await
    }
}
