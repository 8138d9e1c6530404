//! json-rpc protocol client as described in the spec at
//! https://www.jsonrpc.org/specification, over a unix domain or tcp socket.
//!
//! The data-plane daemon frames neither requests nor responses: both sides
//! read until a complete json value has been received. The client keeps one
//! connection open, serializes callers on it and correlates every response
//! with the id of the outstanding request.

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UnixStream},
    sync::Mutex,
};
use tracing::trace;

pub mod error;

use error::{Error, RpcCode};
use nix::errno::Errno;

#[derive(Debug, Serialize, Deserialize)]
/// A JSONRPC request object
pub struct Request<'a> {
    /// The name of the RPC call
    pub method: &'a str,
    /// Parameters to the RPC call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Identifier for this Request, which must appear in the response
    pub id: u64,
    /// jsonrpc field, MUST be "2.0"
    pub jsonrpc: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
/// A JSONRPC response object
pub struct Response {
    /// A result if there is one, or null
    pub result: Option<serde_json::Value>,
    /// An error if there is one, or null
    pub error: Option<RpcError>,
    /// Identifier for this Request, which should match that of the request
    pub id: serde_json::Value,
    /// jsonrpc field, MUST be "2.0"
    pub jsonrpc: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
/// A JSONRPC error object
pub struct RpcError {
    /// The integer identifier of the error
    pub code: i32,
    /// A string describing the error
    pub message: String,
    /// Additional data specific to the error
    pub data: Option<serde_json::Value>,
}

/// Connection to the json-rpc server, either over a unix domain socket or
/// over tcp.
enum Conn {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Conn {
    /// Probe the address: an existing non-directory path is a unix socket,
    /// a host:port pair is tcp.
    async fn connect(addr: &str) -> Result<Self, Error> {
        let path = Path::new(addr);
        if path.exists() && !path.is_dir() {
            let sock = UnixStream::connect(path).await.context(error::Connect {
                sock: addr.to_string(),
            })?;
            return Ok(Conn::Unix(sock));
        }
        match addr.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => {
                let sock = TcpStream::connect(addr).await.context(error::Connect {
                    sock: addr.to_string(),
                })?;
                Ok(Conn::Tcp(sock))
            }
            _ => error::Address {
                addr: addr.to_string(),
            }
            .fail(),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Conn::Unix(sock) => sock.write_all(buf).await,
            Conn::Tcp(sock) => sock.write_all(buf).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Conn::Unix(sock) => sock.read(buf).await,
            Conn::Tcp(sock) => sock.read(buf).await,
        }
    }
}

/// json-rpc client holding one lazily established connection. Concurrent
/// callers are serialized by the connection lock so that every call reads
/// the response to its own request.
pub struct RpcClient {
    addr: String,
    id: AtomicU64,
    conn: Mutex<Option<Conn>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").field("addr", &self.addr).finish()
    }
}

impl RpcClient {
    /// New client for the given socket address. No I/O happens until the
    /// first call.
    pub fn new<T: Into<String>>(addr: T) -> Self {
        Self {
            addr: addr.into(),
            id: AtomicU64::new(1),
            conn: Mutex::new(None),
        }
    }

    /// Address the client connects to.
    pub fn address(&self) -> &str {
        &self.addr
    }

    /// Make a json-rpc request, await the matching reply and return the
    /// user data embedded in it.
    pub async fn call<A, R>(&self, method: &str, args: Option<A>) -> Result<R, Error>
    where
        A: serde::ser::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let params = match args {
            Some(val) => Some(serde_json::to_value(val).context(error::Parse)?),
            None => None,
        };

        let id = self.id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            method,
            params,
            id,
            jsonrpc: Some("2.0"),
        };
        let buf = serde_json::to_vec(&request).context(error::Parse)?;

        let mut guard = self.conn.lock().await;
        let conn = match guard.take() {
            Some(conn) => guard.insert(conn),
            None => guard.insert(Conn::connect(&self.addr).await?),
        };

        trace!("JSON request: {}", String::from_utf8_lossy(&buf));

        let reply = match Self::roundtrip(conn, &buf).await {
            Ok(reply) => reply,
            Err(err) => {
                // the connection state is unknown, reconnect on the next call
                *guard = None;
                return Err(err);
            }
        };
        drop(guard);

        parse_reply::<R>(reply, id)
    }

    async fn roundtrip(conn: &mut Conn, buf: &[u8]) -> Result<Response, Error> {
        conn.write_all(buf).await.context(error::Io)?;

        let mut reply = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            let n = conn.read(&mut chunk).await.context(error::Io)?;
            if n == 0 {
                if reply.is_empty() {
                    return error::Eof.fail();
                }
                // a complete value would have parsed below already
                return serde_json::from_slice::<Response>(&reply).context(error::Parse);
            }
            reply.extend_from_slice(&chunk[.. n]);
            match serde_json::from_slice::<Response>(&reply) {
                Ok(response) => {
                    trace!("JSON response: {}", String::from_utf8_lossy(&reply));
                    return Ok(response);
                }
                Err(err) if err.is_eof() => continue,
                Err(err) => return Err(Error::Parse { source: err }),
            }
        }
    }
}

/// Validate a json-rpc reply against the request id and return the user data
/// embedded in it.
fn parse_reply<T>(reply: Response, id: u64) -> Result<T, Error>
where
    T: serde::de::DeserializeOwned,
{
    if let Some(vers) = &reply.jsonrpc {
        if vers != "2.0" {
            return Err(Error::InvalidVersion);
        }
    }
    if reply.id.as_u64() != Some(id) {
        return Err(Error::IdMismatch {
            expected: id,
            actual: reply.id,
        });
    }

    if let Some(err) = reply.error {
        return Err(Error::Rpc {
            code: rpc_code(err.code),
            msg: err.message,
        });
    }

    match reply.result {
        Some(result) => serde_json::from_value::<T>(result).context(error::Parse),
        // if there is no result fabricate null value == ()
        None => serde_json::from_value::<T>(serde_json::Value::Null).context(error::Parse),
    }
}

/// Classify the remote error code: the well-known json-rpc codes first, then
/// negated errnos the data-plane replies with.
fn rpc_code(code: i32) -> RpcCode {
    match code {
        -32700 => RpcCode::ParseError,
        -32600 => RpcCode::InvalidRequest,
        -32601 => RpcCode::MethodNotFound,
        -32602 => RpcCode::InvalidParams,
        -32603 => RpcCode::InternalError,
        val => {
            if val == -(Errno::ENOENT as i32) {
                RpcCode::NotFound
            } else if val == -(Errno::EEXIST as i32) {
                RpcCode::AlreadyExists
            } else {
                RpcCode::InternalError
            }
        }
    }
}
