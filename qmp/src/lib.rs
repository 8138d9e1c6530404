//! Client for the QMP management protocol spoken by a running hypervisor
//! over its monitor socket.
//!
//! A session starts with the greeting banner and capability negotiation,
//! after which commands of the form `{execute, arguments}` are answered with
//! `{return}` or `{error:{class,desc}}` objects. Asynchronous events may
//! interleave responses at any point; the client buffers them so a later
//! wait can observe events that arrived while a command was in flight.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::{collections::VecDeque, path::Path, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp, unix, TcpStream, UnixStream},
    time::Instant,
};
use tracing::trace;

pub mod error;
#[cfg(test)]
mod test;

pub use error::Error;

/// Default deadline applied to every read and write on the monitor socket.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default interval of the `query-pci` poll while waiting for a device to
/// disappear.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Event emitted by the hypervisor once a deleted device is released.
pub const DEVICE_DELETED_EVENT: &str = "DEVICE_DELETED";

/// Greeting banner sent by the hypervisor on connection.
#[derive(Debug, Deserialize)]
pub struct Greeting {
    #[serde(rename = "QMP")]
    pub qmp: VersionBlock,
}

#[derive(Debug, Deserialize)]
pub struct VersionBlock {
    pub version: Value,
    pub capabilities: Vec<Value>,
}

/// Command sent to the hypervisor.
#[derive(Debug, Serialize)]
struct Command<'a> {
    execute: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Value>,
}

/// Error detail of a failed command.
#[derive(Clone, Debug, Deserialize)]
pub struct ErrorDetail {
    pub class: String,
    pub desc: String,
}

/// Asynchronous event emitted by the hypervisor.
#[derive(Clone, Debug, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: Option<Timestamp>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Timestamp {
    pub seconds: u64,
    pub microseconds: u64,
}

/// One bus entry of a `query-pci` response.
#[derive(Clone, Debug, Deserialize)]
pub struct PciBus {
    pub bus: i64,
    pub devices: Vec<PciDevice>,
}

/// One device entry of a `query-pci` response. Only the qdev id is of
/// interest here; the remaining fields are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct PciDevice {
    #[serde(default)]
    pub qdev_id: String,
}

/// Arguments of the `device_add` command. Which of the optional fields are
/// set depends on the driver: vhost-user devices reference a chardev,
/// vfio-user devices a control socket path.
#[derive(Debug, Default, Serialize)]
pub struct DeviceAddArgs<'a> {
    pub driver: &'a str,
    pub id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chardev: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<&'a str>,
}

enum Reader {
    Unix(BufReader<unix::OwnedReadHalf>),
    Tcp(BufReader<tcp::OwnedReadHalf>),
}

enum Writer {
    Unix(unix::OwnedWriteHalf),
    Tcp(tcp::OwnedWriteHalf),
}

/// A QMP client connected to a single hypervisor instance.
pub struct QmpClient {
    reader: Reader,
    writer: Writer,
    timeout: Duration,
    events: VecDeque<Event>,
}

impl QmpClient {
    /// Connect to the monitor socket, read the greeting and negotiate
    /// capabilities. The address is probed the same way as the data-plane
    /// socket: an existing non-directory path is a unix socket, host:port
    /// is tcp.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, Error> {
        let (reader, writer) = Self::open_transport(addr).await?;
        let mut client = QmpClient {
            reader,
            writer,
            timeout,
            events: VecDeque::new(),
        };

        let banner = client.read_line().await?;
        let _greeting: Greeting =
            serde_json::from_str(&banner).context(error::Greeting)?;

        let negotiated: Value =
            client.execute("qmp_capabilities", None).await?;
        trace!(?negotiated, "QMP capabilities negotiated");

        Ok(client)
    }

    /// Execute a command and deserialize the value of its `return` field.
    /// Events arriving while the response is pending are buffered.
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &mut self,
        cmd: &str,
        arguments: Option<Value>,
    ) -> Result<T, Error> {
        let command = Command {
            execute: cmd,
            arguments,
        };
        self.send(&command).await?;

        loop {
            let line = self.read_line().await?;
            let value: Value =
                serde_json::from_str(&line).context(error::Parse)?;

            if value.get("event").is_some() {
                let event: Event =
                    serde_json::from_value(value).context(error::Parse)?;
                trace!(event = %event.event, "buffering QMP event");
                self.events.push_back(event);
                continue;
            }
            if let Some(result) = value.get("return") {
                return serde_json::from_value(result.clone())
                    .context(error::Parse);
            }
            if let Some(detail) = value.get("error") {
                let detail: ErrorDetail = serde_json::from_value(detail.clone())
                    .context(error::Parse)?;
                return error::Command {
                    cmd: cmd.to_string(),
                    class: detail.class,
                    desc: detail.desc,
                }
                .fail();
            }
            return error::UnexpectedResponse { line }.fail();
        }
    }

    /// Take the first buffered event matching the predicate.
    pub fn take_event<F>(&mut self, pred: F) -> Option<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let pos = self.events.iter().position(pred)?;
        self.events.remove(pos)
    }

    /// Add a socket-backed character device.
    pub async fn chardev_add(&mut self, id: &str, path: &str) -> Result<(), Error> {
        let args = serde_json::json!({
            "id": id,
            "backend": {
                "type": "socket",
                "data": {
                    "addr": { "type": "unix", "data": { "path": path } },
                    "server": false,
                },
            },
        });
        let _: Value = self.execute("chardev-add", Some(args)).await?;
        Ok(())
    }

    /// Remove a character device by id.
    pub async fn chardev_remove(&mut self, id: &str) -> Result<(), Error> {
        let args = serde_json::json!({ "id": id });
        let _: Value = self.execute("chardev-remove", Some(args)).await?;
        Ok(())
    }

    /// Hot-plug a PCI device.
    pub async fn device_add(&mut self, args: &DeviceAddArgs<'_>) -> Result<(), Error> {
        let args = serde_json::to_value(args).context(error::Parse)?;
        let _: Value = self.execute("device_add", Some(args)).await?;
        Ok(())
    }

    /// Start hot-unplug of a PCI device. The removal is asynchronous; use
    /// [`QmpClient::wait_device_deleted`] to await its completion.
    pub async fn device_del(&mut self, id: &str) -> Result<(), Error> {
        let args = serde_json::json!({ "id": id });
        let _: Value = self.execute("device_del", Some(args)).await?;
        Ok(())
    }

    /// Query the PCI state of the guest.
    pub async fn query_pci(&mut self) -> Result<Vec<PciBus>, Error> {
        self.execute("query-pci", None).await
    }

    /// Wait for a device to disappear after `device_del`: poll `query-pci`
    /// at the given interval until the qdev id is gone or the deadline
    /// elapses. A buffered `DEVICE_DELETED` event with a matching device id
    /// satisfies the wait early.
    pub async fn wait_device_deleted(
        &mut self,
        id: &str,
        poll: Duration,
        deadline: Duration,
    ) -> Result<(), Error> {
        let expires = Instant::now() + deadline;
        loop {
            let deleted = self.take_event(|event| {
                event.event == DEVICE_DELETED_EVENT
                    && event.data.get("device").and_then(Value::as_str) == Some(id)
            });
            if deleted.is_some() {
                return Ok(());
            }

            let buses = self.query_pci().await?;
            let present = buses
                .iter()
                .any(|bus| bus.devices.iter().any(|dev| dev.qdev_id == id));
            if !present {
                return Ok(());
            }

            if Instant::now() >= expires {
                return error::RemovalTimedOut {
                    id: id.to_string(),
                }
                .fail();
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn open_transport(addr: &str) -> Result<(Reader, Writer), Error> {
        let path = Path::new(addr);
        if path.exists() && !path.is_dir() {
            let sock = UnixStream::connect(path).await.context(error::Connect {
                addr: addr.to_string(),
            })?;
            let (read, write) = sock.into_split();
            return Ok((Reader::Unix(BufReader::new(read)), Writer::Unix(write)));
        }
        match addr.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => {
                let sock = TcpStream::connect(addr).await.context(error::Connect {
                    addr: addr.to_string(),
                })?;
                let (read, write) = sock.into_split();
                Ok((Reader::Tcp(BufReader::new(read)), Writer::Tcp(write)))
            }
            _ => error::Address {
                addr: addr.to_string(),
            }
            .fail(),
        }
    }

    /// Read a single line within the configured deadline.
    async fn read_line(&mut self) -> Result<String, Error> {
        let deadline = self.timeout;
        let mut line = String::new();
        let read = async {
            match &mut self.reader {
                Reader::Unix(reader) => reader.read_line(&mut line).await,
                Reader::Tcp(reader) => reader.read_line(&mut line).await,
            }
        };
        let n = tokio::time::timeout(deadline, read)
            .await
            .map_err(|_| Error::Timeout {})?
            .context(error::Io)?;
        if n == 0 {
            return error::ConnectionClosed.fail();
        }
        trace!("QMP line: {}", line.trim_end());
        Ok(line)
    }

    /// Serialize and write a json value followed by a newline, within the
    /// configured deadline.
    async fn send<T: Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let deadline = self.timeout;
        let mut buf = serde_json::to_vec(value).context(error::Parse)?;
        buf.push(b'\n');
        let write = async {
            match &mut self.writer {
                Writer::Unix(writer) => writer.write_all(&buf).await,
                Writer::Tcp(writer) => writer.write_all(&buf).await,
            }
        };
        tokio::time::timeout(deadline, write)
            .await
            .map_err(|_| Error::Timeout {})?
            .context(error::Io)?;
        Ok(())
    }
}
