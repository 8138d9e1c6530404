//! Bridge-side coordination with the hypervisor monitor: resource ids are
//! mangled into hypervisor-safe device ids, and every high-level operation
//! opens its own monitor session which is dropped when the operation ends.

use crate::{
    error::{self, OpError},
    location::DeviceLocation,
};
use qmp::{DeviceAddArgs, QmpClient};
use snafu::ResultExt;
use std::time::Duration;

/// Monitor endpoint and the timeouts applied to its operations.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub addr: String,
    /// Per read/write deadline on the monitor socket.
    pub timeout: Duration,
    /// Interval of the `query-pci` poll during device removal.
    pub poll_interval: Duration,
    /// Total deadline for a device to disappear after `device_del`.
    pub remove_deadline: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5555".to_string(),
            timeout: qmp::DEFAULT_TIMEOUT,
            poll_interval: qmp::DEFAULT_POLL_INTERVAL,
            remove_deadline: Duration::from_secs(2),
        }
    }
}

/// Handle used by coordinators to open monitor sessions.
#[derive(Clone, Debug)]
pub struct Monitor {
    cfg: MonitorConfig,
}

impl Monitor {
    pub fn new(cfg: MonitorConfig) -> Self {
        Self { cfg }
    }

    /// Connect and negotiate a fresh session.
    pub async fn session(&self) -> Result<MonitorSession, OpError> {
        let client = QmpClient::connect(&self.cfg.addr, self.cfg.timeout)
            .await
            .context(error::MonitorCreation)?;
        Ok(MonitorSession {
            client,
            cfg: self.cfg.clone(),
        })
    }
}

/// One negotiated monitor connection, alive for the duration of a single
/// high-level operation.
pub struct MonitorSession {
    client: QmpClient,
    cfg: MonitorConfig,
}

impl MonitorSession {
    pub async fn chardev_add(&mut self, id: &str, path: &str) -> Result<(), OpError> {
        self.client
            .chardev_add(id, path)
            .await
            .context(error::AddChardevFailed { id: id.to_string() })
    }

    pub async fn chardev_remove(&mut self, id: &str) -> Result<(), OpError> {
        self.client
            .chardev_remove(id)
            .await
            .context(error::Monitor)
    }

    /// Hot-plug a device and confirm with `query-pci` that it appeared.
    pub async fn device_add(
        &mut self,
        driver: &str,
        id: &str,
        chardev: Option<&str>,
        socket: Option<&str>,
        location: &DeviceLocation,
    ) -> Result<(), OpError> {
        let args = DeviceAddArgs {
            driver,
            id,
            chardev,
            socket,
            bus: location.bus.as_deref(),
            addr: location.addr.as_deref(),
        };
        self.client
            .device_add(&args)
            .await
            .context(error::AddDeviceFailed { id: id.to_string() })?;

        let present = self
            .device_present(id)
            .await
            .context(error::AddDeviceFailed { id: id.to_string() })?;
        if !present {
            return error::DeviceNotPresent {
                id: id.to_string(),
            }
            .fail();
        }
        Ok(())
    }

    /// Hot-unplug a device and wait until it is gone.
    pub async fn device_del(&mut self, id: &str) -> Result<(), OpError> {
        self.client.device_del(id).await.context(error::Monitor)?;
        self.client
            .wait_device_deleted(id, self.cfg.poll_interval, self.cfg.remove_deadline)
            .await
            .context(error::Monitor)
    }

    async fn device_present(&mut self, id: &str) -> Result<bool, qmp::Error> {
        let buses = self.client.query_pci().await?;
        Ok(buses
            .iter()
            .any(|bus| bus.devices.iter().any(|dev| dev.qdev_id == id)))
    }
}

/// Total, injective mangling of a resource id into an id that is valid under
/// the hypervisor's rules: alphanumerics, `-` and `.` pass through, `_`
/// escapes itself and every other character becomes `_` plus the hex of its
/// bytes. The same function is applied on add and delete so the operations
/// stay symmetric.
pub fn to_hypervisor_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            'a' ..= 'z' | 'A' ..= 'Z' | '0' ..= '9' | '-' | '.' => out.push(c),
            '_' => out.push_str("__"),
            other => {
                let mut bytes = [0u8; 4];
                for byte in other.encode_utf8(&mut bytes).as_bytes() {
                    out.push('_');
                    out.push_str(&format!("{:02x}", byte));
                }
            }
        }
    }
    out
}
