//! Errors produced while talking to the hypervisor monitor.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("error connecting to monitor at {}: {}", addr, source))]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[snafu(display("address '{}' is neither a socket path nor host:port", addr))]
    Address { addr: String },
    #[snafu(display("malformed monitor greeting: {}", source))]
    Greeting { source: serde_json::Error },
    #[snafu(display("monitor IO error: {}", source))]
    Io { source: std::io::Error },
    #[snafu(display("invalid monitor message: {}", source))]
    Parse { source: serde_json::Error },
    #[snafu(display("monitor read/write timed out"))]
    Timeout {},
    #[snafu(display("monitor closed the connection"))]
    ConnectionClosed,
    #[snafu(display("command '{}' failed: {}: {}", cmd, class, desc))]
    Command {
        cmd: String,
        class: String,
        desc: String,
    },
    #[snafu(display("device '{}' removal timed out", id))]
    RemovalTimedOut { id: String },
    #[snafu(display("unexpected monitor response: {}", line))]
    UnexpectedResponse { line: String },
}
