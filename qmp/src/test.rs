//! Unit tests for the QMP client, driven against a mock monitor bound to a
//! unix socket.

use super::*;
use serde_json::{json, Value};
use std::{
    time::Duration,
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixListener,
    task::JoinHandle,
};

static SOCK_SEQ: AtomicU32 = AtomicU32::new(0);

fn sock_path() -> PathBuf {
    std::env::temp_dir().join(format!(
        "qmp-ut-{}-{}.sock",
        std::process::id(),
        SOCK_SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

fn greeting() -> String {
    json!({
        "QMP": {
            "version": { "qemu": { "major": 7, "minor": 2, "micro": 0 }, "package": "" },
            "capabilities": [],
        }
    })
    .to_string()
}

fn ret(value: Value) -> String {
    json!({ "return": value }).to_string()
}

fn event(name: &str, data: Value) -> String {
    json!({
        "event": name,
        "data": data,
        "timestamp": { "seconds": 1, "microseconds": 0 },
    })
    .to_string()
}

struct MockMonitor {
    path: PathBuf,
    commands: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockMonitor {
    /// Serve a single connection: send the greeting, answer
    /// `qmp_capabilities`, then hand every further command to the handler
    /// which returns the lines to write back (events and/or a response).
    fn start<H>(mut handler: H) -> Self
    where
        H: FnMut(&str, Option<&Value>) -> Vec<String> + Send + 'static,
    {
        let path = sock_path();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = commands.clone();
        let handle = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (read, mut write) = sock.into_split();
            let mut reader = BufReader::new(read);

            write.write_all(format!("{}\n", greeting()).as_bytes()).await.unwrap();

            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    return;
                }
                let cmd: Value = serde_json::from_str(&line).unwrap();
                let execute = cmd["execute"].as_str().unwrap().to_string();
                recorded.lock().unwrap().push(execute.clone());

                let replies = if execute == "qmp_capabilities" {
                    vec![ret(json!({}))]
                } else {
                    handler(&execute, cmd.get("arguments"))
                };
                for reply in replies {
                    write.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
                }
            }
        });
        Self {
            path,
            commands,
            handle,
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for MockMonitor {
    fn drop(&mut self) {
        self.handle.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn connect(monitor: &MockMonitor) -> QmpClient {
    QmpClient::connect(monitor.path.to_str().unwrap(), DEFAULT_TIMEOUT)
        .await
        .unwrap()
}

#[tokio::test]
async fn handshake_and_execute() {
    let monitor = MockMonitor::start(|cmd, _args| {
        assert_eq!(cmd, "query-status");
        vec![ret(json!({ "running": true, "status": "running" }))]
    });

    let mut client = connect(&monitor).await;
    let status: Value = client.execute("query-status", None).await.unwrap();
    assert_eq!(status["status"], "running");
    assert_eq!(monitor.commands(), vec!["qmp_capabilities", "query-status"]);
}

#[tokio::test]
async fn command_error() {
    let monitor = MockMonitor::start(|_cmd, _args| {
        vec![json!({
            "error": { "class": "GenericError", "desc": "Duplicate ID" }
        })
        .to_string()]
    });

    let mut client = connect(&monitor).await;
    let res = client.chardev_add("blk0", "/tmp/blk0").await;
    match res {
        Err(Error::Command { class, desc, .. }) => {
            assert_eq!(class, "GenericError");
            assert_eq!(desc, "Duplicate ID");
        }
        other => panic!("expected command error, got {:?}", other),
    }
}

#[tokio::test]
async fn events_are_buffered_during_execute() {
    let monitor = MockMonitor::start(|cmd, _args| {
        assert_eq!(cmd, "device_del");
        vec![
            event("DEVICE_DELETED", json!({ "device": "blk0" })),
            ret(json!({})),
        ]
    });

    let mut client = connect(&monitor).await;
    client.device_del("blk0").await.unwrap();

    let deleted = client.take_event(|e| e.event == DEVICE_DELETED_EVENT);
    let deleted = deleted.expect("event should have been buffered");
    assert_eq!(deleted.data["device"], "blk0");
}

#[tokio::test]
async fn device_deleted_event_satisfies_removal_wait() {
    let monitor = MockMonitor::start(|cmd, _args| {
        assert_eq!(cmd, "device_del");
        vec![
            event("DEVICE_DELETED", json!({ "device": "blk0" })),
            ret(json!({})),
        ]
    });

    let mut client = connect(&monitor).await;
    client.device_del("blk0").await.unwrap();
    client
        .wait_device_deleted("blk0", DEFAULT_POLL_INTERVAL, Duration::from_millis(100))
        .await
        .unwrap();

    // the buffered event satisfied the wait, no polling happened
    assert!(!monitor.commands().iter().any(|c| c == "query-pci"));
}

#[tokio::test]
async fn removal_wait_polls_until_device_is_gone() {
    let mut polls = 0;
    let monitor = MockMonitor::start(move |cmd, _args| match cmd {
        "device_del" => vec![ret(json!({}))],
        "query-pci" => {
            polls += 1;
            let devices = if polls < 3 {
                json!([{ "qdev_id": "blk0" }])
            } else {
                json!([])
            };
            vec![ret(json!([{ "bus": 0, "devices": devices }]))]
        }
        other => panic!("unexpected command {}", other),
    });

    let mut client = connect(&monitor).await;
    client.device_del("blk0").await.unwrap();
    client
        .wait_device_deleted("blk0", Duration::from_millis(1), Duration::from_secs(1))
        .await
        .unwrap();

    let polls = monitor.commands().iter().filter(|c| *c == "query-pci").count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn removal_wait_times_out() {
    let monitor = MockMonitor::start(|cmd, _args| match cmd {
        "device_del" => vec![ret(json!({}))],
        "query-pci" => vec![ret(json!([{
            "bus": 0,
            "devices": [{ "qdev_id": "blk0" }],
        }]))],
        other => panic!("unexpected command {}", other),
    });

    let mut client = connect(&monitor).await;
    client.device_del("blk0").await.unwrap();
    let res = client
        .wait_device_deleted("blk0", Duration::from_millis(1), Duration::from_millis(20))
        .await;
    match res {
        Err(Error::RemovalTimedOut { id }) => assert_eq!(id, "blk0"),
        other => panic!("expected removal timeout, got {:?}", other),
    }
}
