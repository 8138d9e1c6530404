//! Graceful start/stop of the process: serve loops run concurrently, and on
//! the first serve failure or a termination signal every registered
//! shutdown runs sequentially in reverse registration order, each bounded
//! by the configured deadline.

use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use snafu::Snafu;
use std::{future::Future, time::Duration};
use tokio::signal::unix::{signal, SignalKind};

#[derive(Debug, Snafu)]
pub enum LifecycleError {
    #[snafu(display("{}", msgs.join("; ")))]
    Failed { msgs: Vec<String> },
}

type ServeFuture = BoxFuture<'static, Result<(), String>>;
type ShutdownFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

pub struct Lifecycle {
    serves: Vec<(String, ServeFuture)>,
    shutdowns: Vec<(String, ShutdownFn)>,
    shutdown_timeout: Duration,
}

impl Lifecycle {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            serves: Vec::new(),
            shutdowns: Vec::new(),
            shutdown_timeout,
        }
    }

    /// Register a serve loop together with the shutdown that stops it.
    pub fn add_serve<S, D, F>(&mut self, name: &str, serve: S, shutdown: D)
    where
        S: Future<Output = Result<(), String>> + Send + 'static,
        D: FnOnce() -> F + Send + 'static,
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.serves.push((name.to_string(), serve.boxed()));
        self.add_shutdown(name, shutdown);
    }

    /// Register a bare shutdown step.
    pub fn add_shutdown<D, F>(&mut self, name: &str, shutdown: D)
    where
        D: FnOnce() -> F + Send + 'static,
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.shutdowns
            .push((name.to_string(), Box::new(move || shutdown().boxed())));
    }

    /// Run until a serve loop fails or SIGINT/SIGTERM arrives, then shut
    /// everything down. The error joins every failure seen on the way out.
    pub async fn run_and_wait(mut self) -> Result<(), LifecycleError> {
        let mut msgs = Vec::new();

        let mut serves = FuturesUnordered::new();
        for (name, serve) in self.serves.drain(..) {
            serves.push(async move { (name, serve.await) });
        }

        match self.wait_for_exit(&mut serves).await {
            Ok(reason) => info!(reason, "shutting down"),
            Err(msg) => msgs.push(msg),
        }

        // reverse registration order, each step bounded
        while let Some((name, shutdown)) = self.shutdowns.pop() {
            match tokio::time::timeout(self.shutdown_timeout, shutdown()).await {
                Ok(Ok(())) => debug!(step = %name, "shutdown complete"),
                Ok(Err(msg)) => msgs.push(format!("{}: {}", name, msg)),
                Err(_) => msgs.push(format!("{}: shutdown timed out", name)),
            }
        }

        if msgs.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::Failed { msgs })
        }
    }

    async fn wait_for_exit(
        &mut self,
        serves: &mut FuturesUnordered<impl Future<Output = (String, Result<(), String>)>>,
    ) -> Result<&'static str, String> {
        let mut sigint =
            signal(SignalKind::interrupt()).map_err(|err| format!("signal handler: {}", err))?;
        let mut sigterm =
            signal(SignalKind::terminate()).map_err(|err| format!("signal handler: {}", err))?;

        tokio::select! {
            Some((name, result)) = serves.next() => match result {
                Ok(()) => Ok("serve loop finished"),
                Err(msg) => Err(format!("{}: {}", name, msg)),
            },
            _ = sigint.recv() => Ok("SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
}
