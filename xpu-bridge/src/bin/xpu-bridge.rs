#[macro_use]
extern crate tracing;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use xpu_bridge::{
    lifecycle::Lifecycle,
    location::DeviceLocator,
    logger,
    monitor::{Monitor, MonitorConfig},
    orch::Context,
    rest,
    service::AppServices,
    spdk::SpdkClient,
    store::{Etcd, MemStore, MetaStore, Store},
};

#[derive(Debug, Parser)]
#[clap(name = "xpu-bridge", version)]
struct CliArgs {
    /// Port of the http/json frontend.
    #[clap(long = "http-port", default_value = "8082")]
    http_port: u16,
    /// Address of the data-plane json-rpc server (socket path or
    /// host:port).
    #[clap(long = "spdk-addr", default_value = "/var/tmp/spdk.sock")]
    spdk_addr: String,
    /// Enable hypervisor coordination.
    #[clap(long)]
    kvm: bool,
    /// Address of the hypervisor monitor (socket path or host:port).
    #[clap(long = "qmp-addr", default_value = "127.0.0.1:5555")]
    qmp_addr: String,
    /// Directory where the per-controller sockets live.
    #[clap(long = "ctrlr-dir", default_value = "/var/tmp")]
    ctrlr_dir: PathBuf,
    /// Colon-separated list of hypervisor PCI bus names; empty lets the
    /// hypervisor assign device slots.
    #[clap(long, default_value = "")]
    buses: String,
    /// Endpoint of the persistent key-value store. Metadata stays in an
    /// in-process store when not given.
    #[clap(long = "kv-endpoint")]
    kv_endpoint: Option<String>,
    /// Log format.
    #[clap(long = "log-format", default_value = "full")]
    log_format: logger::LogFormat,
    /// Deadline applied to each shutdown step on exit.
    #[clap(long = "shutdown-timeout", default_value = "5s")]
    shutdown_timeout: humantime::Duration,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    logger::init("info", args.log_format);
    info!(
        spdk_addr = %args.spdk_addr,
        kvm = args.kvm,
        http_port = args.http_port,
        "starting xpu-bridge"
    );

    let buses: Vec<String> = args
        .buses
        .split(':')
        .filter(|bus| !bus.is_empty())
        .map(String::from)
        .collect();
    let locator = DeviceLocator::new(buses)?;

    let store: Arc<dyn Store> = match &args.kv_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "connecting to the key-value store");
            Arc::new(Etcd::new(endpoint).await?)
        }
        None => {
            warn!("no key-value endpoint configured, metadata will not survive a restart");
            Arc::new(MemStore::new())
        }
    };

    let monitor = if args.kvm {
        Some(Monitor::new(MonitorConfig {
            addr: args.qmp_addr.clone(),
            ..Default::default()
        }))
    } else {
        None
    };

    let ctx = Context::new(
        SpdkClient::new(args.spdk_addr.clone()),
        MetaStore::new(store),
        monitor,
        locator,
        args.ctrlr_dir.clone(),
    )?;
    let services = AppServices::new(ctx);

    let server = {
        let services = services.clone();
        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(services.clone()))
                .configure(rest::configure)
        })
        .bind(("0.0.0.0", args.http_port))?
        .run()
    };
    let handle = server.handle();
    info!(port = args.http_port, "serving the storage API");

    let mut lifecycle = Lifecycle::new(args.shutdown_timeout.into());
    lifecycle.add_serve(
        "http frontend",
        async move { server.await.map_err(|err| err.to_string()) },
        move || async move {
            handle.stop(true).await;
            Ok(())
        },
    );
    lifecycle.run_and_wait().await?;

    info!("bridge stopped");
    Ok(())
}
