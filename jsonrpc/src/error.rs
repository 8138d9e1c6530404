//! json-rpc error enum which contains all different errors which can happen
//! when sending a request and processing the reply from the json-rpc server.

use snafu::Snafu;
use tonic::{Code, Status};

/// Classified remote error codes, mapped from the code field of the json-rpc
/// error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    NotFound,
    AlreadyExists,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("invalid json-rpc version"))]
    InvalidVersion,
    #[snafu(display("json response ID mismatch"))]
    IdMismatch {
        expected: u64,
        actual: serde_json::Value,
    },
    #[snafu(display("EOF"))]
    Eof,
    #[snafu(display("IO error: {}", source))]
    Io { source: std::io::Error },
    #[snafu(display("invalid json reply: {}", source))]
    Parse { source: serde_json::Error },
    #[snafu(display("error connecting to {}: {}", sock, source))]
    Connect {
        sock: String,
        source: std::io::Error,
    },
    #[snafu(display("address '{}' is neither a socket path nor host:port", addr))]
    Address { addr: String },
    #[snafu(display("json response error: {}", msg))]
    Rpc { code: RpcCode, msg: String },
}

impl Error {
    /// Conversion from a json-rpc error to a grpc status.
    ///
    /// NOTE: normally we would have a From<Error> trait for the Status type,
    /// but we can't since both the Status type and the From trait are
    /// external.
    pub fn into_status(self) -> Status {
        match self {
            Error::Rpc { code, msg } => {
                let code = match code {
                    RpcCode::InvalidParams => Code::InvalidArgument,
                    RpcCode::NotFound => Code::NotFound,
                    RpcCode::AlreadyExists => Code::AlreadyExists,
                    _ => Code::Internal,
                };
                Status::new(code, msg)
            }
            _ => Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        e.into_status()
    }
}
