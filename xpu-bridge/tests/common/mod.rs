//! Shared fixtures of the integration tests: a scriptable mock data-plane
//! daemon, a mock hypervisor monitor and a fully wired bridge context on
//! top of the in-process store. Nothing here touches a real SPDK, QEMU or
//! etcd instance.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    task::JoinHandle,
};
use xpu_bridge::{
    location::DeviceLocator,
    monitor::{Monitor, MonitorConfig},
    orch::{Context, CtxRef},
    spdk::SpdkClient,
    store::{MemStore, MetaStore},
};

static SEQ: AtomicU32 = AtomicU32::new(0);

fn unique_path(kind: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "xpu-bridge-{}-{}-{}",
        kind,
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

#[derive(Clone, Debug)]
enum Reply {
    Result(Value),
    Error(i32, String),
}

/// Mock data-plane daemon: answers every known method with a plausible
/// default, records each call in order, and lets a test script one-shot
/// failures or result overrides per method.
pub struct MockSpdk {
    pub path: PathBuf,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    scripts: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    handle: JoinHandle<()>,
}

impl MockSpdk {
    pub fn start() -> Self {
        let path = unique_path("spdk").with_extension("sock");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let calls: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let scripts: Arc<Mutex<HashMap<String, VecDeque<Reply>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let recorded = calls.clone();
        let scripted = scripts.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (sock, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let recorded = recorded.clone();
                let scripted = scripted.clone();
                tokio::spawn(async move {
                    serve_connection(sock, recorded, scripted).await;
                });
            }
        });
        Self {
            path,
            calls,
            scripts,
            handle,
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// The params of every call of one method.
    pub fn method_calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// The next call of the method fails with a json-rpc error.
    pub fn fail_next(&self, method: &str, code: i32, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Reply::Error(code, message.to_string()));
    }

    /// The next call of the method returns the given result.
    pub fn reply_next(&self, method: &str, result: Value) {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Reply::Result(result));
    }
}

impl Drop for MockSpdk {
    fn drop(&mut self) {
        self.handle.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve_connection(
    mut sock: UnixStream,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    scripts: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let request = loop {
            match serde_json::from_slice::<Value>(&buf) {
                Ok(request) => {
                    buf.clear();
                    break Some(request);
                }
                Err(err) if err.is_eof() => {
                    let n = match sock.read(&mut chunk).await {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[.. n]);
                }
                Err(_) => return,
            }
        };
        let request = match request {
            Some(request) => request,
            None => return,
        };

        let method = request["method"].as_str().unwrap_or_default().to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let id = request["id"].clone();
        calls.lock().unwrap().push((method.clone(), params.clone()));

        let scripted = scripts.lock().unwrap().get_mut(&method).and_then(VecDeque::pop_front);
        let reply = match scripted {
            Some(Reply::Result(result)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": result,
            }),
            Some(Reply::Error(code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
            None => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": default_result(&method, &params),
            }),
        };
        if sock
            .write_all(&serde_json::to_vec(&reply).unwrap())
            .await
            .is_err()
        {
            return;
        }
    }
}

fn default_result(method: &str, params: &Value) -> Value {
    match method {
        "bdev_aio_create" | "bdev_malloc_create" | "bdev_null_create" | "bdev_crypto_create" => {
            params["name"].clone()
        }
        "bdev_nvme_attach_controller" => {
            json!([format!("{}n1", params["name"].as_str().unwrap_or("nvme"))])
        }
        "bdev_nvme_get_controllers" => json!([{ "name": params["name"] }]),
        "bdev_get_bdevs" => json!([{
            "name": params["name"],
            "block_size": 512,
            "num_blocks": 2048,
        }]),
        "bdev_get_iostat" => json!({
            "tick_rate": 1000000,
            "bdevs": [{
                "name": params["name"],
                "bytes_read": 8192,
                "num_read_ops": 2,
                "bytes_written": 4096,
                "num_write_ops": 1,
                "read_latency_ticks": 10,
                "write_latency_ticks": 20,
            }],
        }),
        "nvmf_subsystem_add_ns" => json!(1),
        "nvmf_get_subsystems" => json!([{ "nqn": params["nqn"] }]),
        "nvmf_get_subsystem_stats" => json!({ "poll_groups": [] }),
        "vhost_get_controllers" => json!([{ "ctrlr": params["name"] }]),
        _ => json!(true),
    }
}

/// Mock hypervisor monitor: greeting, capability negotiation, chardev and
/// device bookkeeping with a `query-pci` view of the plugged devices.
pub struct MockMonitor {
    pub path: PathBuf,
    commands: Arc<Mutex<Vec<(String, Value)>>>,
    fail: Arc<Mutex<HashMap<String, (String, String)>>>,
    devices: Arc<Mutex<HashSet<String>>>,
    sticky_devices: Arc<Mutex<bool>>,
    handle: JoinHandle<()>,
}

impl MockMonitor {
    pub fn start() -> Self {
        let path = unique_path("qmp").with_extension("sock");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let commands: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let fail: Arc<Mutex<HashMap<String, (String, String)>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let devices: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let sticky_devices = Arc::new(Mutex::new(false));

        let state = (
            commands.clone(),
            fail.clone(),
            devices.clone(),
            sticky_devices.clone(),
        );
        let handle = tokio::spawn(async move {
            loop {
                let (sock, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let state = state.clone();
                tokio::spawn(async move {
                    monitor_connection(sock, state).await;
                });
            }
        });
        Self {
            path,
            commands,
            fail,
            devices,
            sticky_devices,
            handle,
        }
    }

    /// Every executed command (after the capability negotiation), in order.
    pub fn commands(&self) -> Vec<(String, Value)> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(cmd, _)| cmd != "qmp_capabilities")
            .cloned()
            .collect()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands().into_iter().map(|(cmd, _)| cmd).collect()
    }

    /// Fail every invocation of the command with a GenericError.
    pub fn fail(&self, command: &str, desc: &str) {
        self.fail.lock().unwrap().insert(
            command.to_string(),
            ("GenericError".to_string(), desc.to_string()),
        );
    }

    /// `device_del` answers ok but the device never leaves `query-pci`,
    /// which forces the removal wait into its deadline.
    pub fn keep_devices_on_delete(&self) {
        *self.sticky_devices.lock().unwrap() = true;
    }

    pub fn plugged_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.devices.lock().unwrap().iter().cloned().collect();
        devices.sort();
        devices
    }
}

impl Drop for MockMonitor {
    fn drop(&mut self) {
        self.handle.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

type MonitorState = (
    Arc<Mutex<Vec<(String, Value)>>>,
    Arc<Mutex<HashMap<String, (String, String)>>>,
    Arc<Mutex<HashSet<String>>>,
    Arc<Mutex<bool>>,
);

async fn monitor_connection(sock: UnixStream, state: MonitorState) {
    let (commands, fail, devices, sticky) = state;
    let (read, mut write) = sock.into_split();
    let mut reader = BufReader::new(read);

    let greeting = json!({
        "QMP": {
            "version": { "qemu": { "major": 7, "minor": 2, "micro": 0 }, "package": "" },
            "capabilities": [],
        }
    });
    if write
        .write_all(format!("{}\n", greeting).as_bytes())
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => (),
        }
        let command: Value = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(_) => return,
        };
        let execute = command["execute"].as_str().unwrap_or_default().to_string();
        let arguments = command.get("arguments").cloned().unwrap_or(Value::Null);
        commands.lock().unwrap().push((execute.clone(), arguments.clone()));

        let scripted_failure = fail.lock().unwrap().get(&execute).cloned();
        let reply = if let Some((class, desc)) = scripted_failure {
            json!({ "error": { "class": class, "desc": desc } })
        } else {
            match execute.as_str() {
                "device_add" => {
                    if let Some(id) = arguments["id"].as_str() {
                        devices.lock().unwrap().insert(id.to_string());
                    }
                    json!({ "return": {} })
                }
                "device_del" => {
                    if !*sticky.lock().unwrap() {
                        if let Some(id) = arguments["id"].as_str() {
                            devices.lock().unwrap().remove(id);
                        }
                    }
                    json!({ "return": {} })
                }
                "query-pci" => {
                    let devices: Vec<Value> = devices
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|id| json!({ "qdev_id": id }))
                        .collect();
                    json!({ "return": [{ "bus": 0, "devices": devices }] })
                }
                _ => json!({ "return": {} }),
            }
        };
        if write
            .write_all(format!("{}\n", reply).as_bytes())
            .await
            .is_err()
        {
            return;
        }
    }
}

/// A bridge wired against the mocks and the in-process store.
pub struct TestBridge {
    pub spdk: MockSpdk,
    pub monitor: Option<MockMonitor>,
    pub ctrlr_dir: PathBuf,
    pub ctx: CtxRef,
}

impl TestBridge {
    pub fn monitor(&self) -> &MockMonitor {
        self.monitor.as_ref().expect("monitor not enabled")
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.ctrlr_dir);
    }
}

/// Wire up a bridge context. `buses` configures the device locator,
/// `with_monitor` enables hypervisor coordination.
pub fn bridge(buses: Vec<String>, with_monitor: bool) -> TestBridge {
    let spdk = MockSpdk::start();
    let monitor = if with_monitor {
        Some(MockMonitor::start())
    } else {
        None
    };
    let ctrlr_dir = unique_path("ctrlrs");
    std::fs::create_dir_all(&ctrlr_dir).unwrap();

    let monitor_handle = monitor.as_ref().map(|mock| {
        Monitor::new(MonitorConfig {
            addr: mock.path.display().to_string(),
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
            remove_deadline: Duration::from_millis(50),
        })
    });

    let ctx = Context::new(
        SpdkClient::new(spdk.path.display().to_string()),
        MetaStore::new(Arc::new(MemStore::new())),
        monitor_handle,
        DeviceLocator::new(buses).unwrap(),
        ctrlr_dir.clone(),
    )
    .unwrap();

    TestBridge {
        spdk,
        monitor,
        ctrlr_dir,
        ctx,
    }
}
