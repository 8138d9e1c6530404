//! End-to-end coverage of the Nvme families: subsystem lifecycle and
//! referential integrity, controller plans for both transports, namespace
//! attach/detach.

mod common;

use assert_matches::assert_matches;
use serde_json::json;
use xpu_bridge::{
    api,
    error::OpError,
    orch::{
        controller::ControllerCoordinator, namespace::NamespaceCoordinator,
        subsystem::SubsystemCoordinator, virtio_blk::VirtioBlkCoordinator,
    },
};

fn subsystem_spec(nqn: &str) -> api::NvmeSubsystemSpec {
    api::NvmeSubsystemSpec {
        nqn: nqn.to_string(),
        model_number: "OPI Model".to_string(),
        serial_number: "OPI-1".to_string(),
        max_namespaces: 32,
        max_controllers: 4,
    }
}

#[tokio::test]
async fn subsystem_lifecycle_round_trip() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = SubsystemCoordinator::new(bridge.ctx.clone());

    let subsystem = coordinator
        .create(Some("sub0".to_string()), subsystem_spec("nqn.2019-06.io.spdk:sub0"))
        .await
        .unwrap();
    assert_eq!(subsystem.name, "nvmeSubsystems/sub0");

    let created = &bridge.spdk.method_calls("nvmf_create_subsystem")[0];
    assert_eq!(created["nqn"], "nqn.2019-06.io.spdk:sub0");
    assert_eq!(created["serial_number"], "OPI-1");
    assert_eq!(created["allow_any_host"], true);
    assert_eq!(created["max_namespaces"], 32);

    // property 1: get sees it, delete removes it, get fails afterwards
    let got = coordinator.get("nvmeSubsystems/sub0").await.unwrap();
    assert_eq!(got, subsystem);
    coordinator.delete("nvmeSubsystems/sub0", false).await.unwrap();
    let deleted = &bridge.spdk.method_calls("nvmf_delete_subsystem")[0];
    assert_eq!(deleted["nqn"], "nqn.2019-06.io.spdk:sub0");
    let err = coordinator.get("nvmeSubsystems/sub0").await.unwrap_err();
    assert_matches!(err, OpError::NotFound { .. });
}

#[tokio::test]
async fn subsystem_nqn_is_defaulted_and_replays_idempotently() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = SubsystemCoordinator::new(bridge.ctx.clone());

    let first = coordinator
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    assert_eq!(first.spec.nqn, "nqn.2022-09.io.spdk:sub0");

    let calls = bridge.spdk.call_count();
    let second = coordinator
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(bridge.spdk.call_count(), calls);

    let mut different = subsystem_spec("");
    different.serial_number = "OPI-2".to_string();
    let err = coordinator
        .create(Some("sub0".to_string()), different)
        .await
        .unwrap_err();
    assert_matches!(err, OpError::AlreadyExists { .. });
    assert_eq!(
        tonic::Status::from(err).code(),
        tonic::Code::AlreadyExists
    );
}

#[tokio::test]
async fn subsystem_with_children_refuses_deletion() {
    let bridge = common::bridge(Vec::new(), false);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let namespaces = NamespaceCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    namespaces
        .create(
            "nvmeSubsystems/sub0",
            Some("ns0".to_string()),
            api::NvmeNamespaceSpec {
                volume_name_ref: "Malloc1".to_string(),
                uuid: None,
                nsid: None,
                host_nsid: None,
            },
        )
        .await
        .unwrap();

    let err = subsystems.delete("nvmeSubsystems/sub0", false).await.unwrap_err();
    assert_matches!(err, OpError::HasChildren { .. });
    assert_eq!(
        tonic::Status::from(err).code(),
        tonic::Code::FailedPrecondition
    );
    // the subsystem is still there
    subsystems.get("nvmeSubsystems/sub0").await.unwrap();

    // removing the namespace unblocks the subsystem
    namespaces
        .delete("nvmeSubsystems/sub0/nvmeNamespaces/ns0", false)
        .await
        .unwrap();
    subsystems.delete("nvmeSubsystems/sub0", false).await.unwrap();
}

#[tokio::test]
async fn namespace_attach_uses_the_parent_nqn() {
    let bridge = common::bridge(Vec::new(), false);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let namespaces = NamespaceCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    bridge.spdk.reply_next("nvmf_subsystem_add_ns", json!(7));

    let namespace = namespaces
        .create(
            "nvmeSubsystems/sub0",
            Some("ns0".to_string()),
            api::NvmeNamespaceSpec {
                volume_name_ref: "Malloc1".to_string(),
                uuid: Some("c952b5b4-3d1a-4d1e-9d0c-6063a0b0f001".to_string()),
                nsid: None,
                host_nsid: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(namespace.assigned_nsid, 7);

    let added = &bridge.spdk.method_calls("nvmf_subsystem_add_ns")[0];
    assert_eq!(added["nqn"], "nqn.2022-09.io.spdk:sub0");
    assert_eq!(added["namespace"]["bdev_name"], "Malloc1");
    assert_eq!(
        added["namespace"]["uuid"],
        "c952b5b4-3d1a-4d1e-9d0c-6063a0b0f001"
    );

    namespaces
        .delete("nvmeSubsystems/sub0/nvmeNamespaces/ns0", false)
        .await
        .unwrap();
    let removed = &bridge.spdk.method_calls("nvmf_subsystem_remove_ns")[0];
    assert_eq!(removed["nsid"], 7);
}

#[tokio::test]
async fn namespace_create_requires_the_parent() {
    let bridge = common::bridge(Vec::new(), false);
    let namespaces = NamespaceCoordinator::new(bridge.ctx.clone());

    let err = namespaces
        .create(
            "nvmeSubsystems/ghost",
            Some("ns0".to_string()),
            api::NvmeNamespaceSpec {
                volume_name_ref: "Malloc1".to_string(),
                uuid: None,
                nsid: None,
                host_nsid: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, OpError::NotFound { .. });
    assert_eq!(bridge.spdk.method_calls("nvmf_subsystem_add_ns").len(), 0);
}

fn vfio_controller_spec(pf: i32) -> api::NvmeControllerSpec {
    api::NvmeControllerSpec {
        trtype: api::TrType::VfioUser,
        tcp: None,
        pcie: Some(api::PciEndpoint {
            physical_function: pf,
            virtual_function: 0,
            port_id: 0,
        }),
        psk: None,
        max_namespaces: None,
    }
}

#[tokio::test]
async fn vfio_user_controller_create_builds_dir_listener_and_device() {
    let bridge = common::bridge(vec!["pci.opi.0".to_string()], true);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let controllers = ControllerCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();

    let controller = controllers
        .create("nvmeSubsystems/sub0", Some("ctl3".to_string()), vfio_controller_spec(3))
        .await
        .unwrap();
    assert_eq!(controller.name, "nvmeSubsystems/sub0/nvmeControllers/ctl3");

    // the per-controller directory exists and backs the listener
    let dir = bridge.ctrlr_dir.join("sub0");
    assert!(dir.is_dir());
    let listener = &bridge.spdk.method_calls("nvmf_subsystem_add_listener")[0];
    assert_eq!(listener["nqn"], "nqn.2022-09.io.spdk:sub0");
    assert_eq!(listener["listen_address"]["trtype"], "vfiouser");
    assert_eq!(
        listener["listen_address"]["traddr"],
        dir.display().to_string()
    );

    // the hypervisor consumes the cntrl socket inside the directory
    let commands = bridge.monitor().commands();
    assert_eq!(commands[0].0, "chardev-add");
    assert_eq!(
        commands[0].1["backend"]["data"]["addr"]["data"]["path"],
        dir.join("cntrl").display().to_string()
    );
    assert_eq!(commands[1].0, "device_add");
    assert_eq!(commands[1].1["driver"], "vfio-user-pci");
    assert_eq!(commands[1].1["socket"], dir.join("cntrl").display().to_string());
    assert_eq!(commands[1].1["bus"], "pci.opi.0");
    assert_eq!(commands[1].1["addr"], "0x3");

    // delete tears everything down again
    controllers
        .delete("nvmeSubsystems/sub0/nvmeControllers/ctl3", false)
        .await
        .unwrap();
    assert!(!dir.exists());
    assert_eq!(bridge.spdk.method_calls("nvmf_subsystem_remove_listener").len(), 1);
    let names = bridge.monitor().command_names();
    assert!(names.contains(&"device_del".to_string()));
    assert!(names.contains(&"chardev-remove".to_string()));
}

#[tokio::test]
async fn vfio_user_transport_pins_port_and_virtual_function() {
    let bridge = common::bridge(Vec::new(), false);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let controllers = ControllerCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    bridge.spdk.clear_calls();

    let mut spec = vfio_controller_spec(0);
    spec.pcie = Some(api::PciEndpoint {
        physical_function: 0,
        virtual_function: 1,
        port_id: 0,
    });
    let err = controllers
        .create("nvmeSubsystems/sub0", Some("ctl0".to_string()), spec)
        .await
        .unwrap_err();
    assert_matches!(err, OpError::InvalidArgument { .. });
    assert_eq!(bridge.spdk.call_count(), 0);
}

#[tokio::test]
async fn controller_cannot_claim_an_occupied_slot() {
    let bridge = common::bridge(vec!["pci.opi.0".to_string()], true);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let controllers = ControllerCoordinator::new(bridge.ctx.clone());
    let blks = VirtioBlkCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    blks.create(
        Some("blk0".to_string()),
        api::VirtioBlkSpec {
            pcie: Some(api::PciEndpoint {
                physical_function: 3,
                virtual_function: 0,
                port_id: 0,
            }),
            volume_name_ref: "Malloc42".to_string(),
            max_io_qps: 1,
        },
    )
    .await
    .unwrap();
    bridge.spdk.clear_calls();

    // the virtio-blk device already owns (pci.opi.0, 0x3)
    let err = controllers
        .create("nvmeSubsystems/sub0", Some("ctl3".to_string()), vfio_controller_spec(3))
        .await
        .unwrap_err();
    assert_matches!(err, OpError::DeviceEndpointInUse { .. });
    assert_eq!(
        bridge.spdk.method_calls("nvmf_subsystem_add_listener").len(),
        0
    );
    assert!(!bridge.ctrlr_dir.join("sub0").exists());

    // the next slot over is fine
    controllers
        .create("nvmeSubsystems/sub0", Some("ctl4".to_string()), vfio_controller_spec(4))
        .await
        .unwrap();
}

#[tokio::test]
async fn tcp_controller_create_validates_and_adds_a_listener() {
    let bridge = common::bridge(Vec::new(), false);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let controllers = ControllerCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();

    // missing trsvcid is rejected before any data-plane work
    bridge.spdk.clear_calls();
    let incomplete = api::NvmeControllerSpec {
        trtype: api::TrType::Tcp,
        tcp: Some(api::TcpEndpoint {
            traddr: "10.0.0.2".to_string(),
            trsvcid: String::new(),
            adrfam: None,
        }),
        pcie: None,
        psk: None,
        max_namespaces: None,
    };
    let err = controllers
        .create("nvmeSubsystems/sub0", Some("ctl0".to_string()), incomplete)
        .await
        .unwrap_err();
    assert_matches!(err, OpError::InvalidArgument { .. });
    assert_eq!(bridge.spdk.call_count(), 0);

    let spec = api::NvmeControllerSpec {
        trtype: api::TrType::Tcp,
        tcp: Some(api::TcpEndpoint {
            traddr: "10.0.0.2".to_string(),
            trsvcid: "4420".to_string(),
            adrfam: Some(api::Adrfam::Ipv4),
        }),
        pcie: None,
        psk: Some(b"NVMeTLSkey-1:01:demo-key".to_vec()),
        max_namespaces: None,
    };
    controllers
        .create("nvmeSubsystems/sub0", Some("ctl0".to_string()), spec)
        .await
        .unwrap();

    let listener = &bridge.spdk.method_calls("nvmf_subsystem_add_listener")[0];
    assert_eq!(listener["listen_address"]["trtype"], "tcp");
    assert_eq!(listener["listen_address"]["traddr"], "10.0.0.2");
    assert_eq!(listener["listen_address"]["trsvcid"], "4420");
    assert_eq!(listener["listen_address"]["adrfam"], "ipv4");
    assert_eq!(listener["secure_channel"], true);

    // the PSK is materialized beside the controller sockets with owner-only
    // access for the lifetime of the listener
    let psk_path = bridge.ctrlr_dir.join("ctl0.psk");
    assert_eq!(listener["psk"], psk_path.display().to_string());
    assert!(psk_path.is_file());
    assert_eq!(
        std::fs::read(&psk_path).unwrap(),
        b"NVMeTLSkey-1:01:demo-key".to_vec()
    );
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&psk_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    controllers
        .delete("nvmeSubsystems/sub0/nvmeControllers/ctl0", false)
        .await
        .unwrap();
    assert!(!psk_path.exists());
}

#[tokio::test]
async fn listener_failure_rolls_the_tcp_plan_back() {
    let bridge = common::bridge(Vec::new(), false);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let controllers = ControllerCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    bridge
        .spdk
        .fail_next("nvmf_subsystem_add_listener", -32602, "address in use");

    let spec = api::NvmeControllerSpec {
        trtype: api::TrType::Tcp,
        tcp: Some(api::TcpEndpoint {
            traddr: "10.0.0.2".to_string(),
            trsvcid: "4420".to_string(),
            adrfam: None,
        }),
        pcie: None,
        psk: Some(b"NVMeTLSkey-1:01:demo-key".to_vec()),
        max_namespaces: None,
    };
    let err = controllers
        .create("nvmeSubsystems/sub0", Some("ctl0".to_string()), spec)
        .await
        .unwrap_err();
    assert_eq!(
        tonic::Status::from(err).code(),
        tonic::Code::InvalidArgument
    );

    // the transient key file was compensated away
    assert!(!bridge.ctrlr_dir.join("ctl0.psk").exists());
    let err = controllers
        .get("nvmeSubsystems/sub0/nvmeControllers/ctl0")
        .await
        .unwrap_err();
    assert_matches!(err, OpError::NotFound { .. });
}

#[tokio::test]
async fn controller_delete_classifies_the_full_failure_set() {
    let bridge = common::bridge(Vec::new(), true);
    let subsystems = SubsystemCoordinator::new(bridge.ctx.clone());
    let controllers = ControllerCoordinator::new(bridge.ctx.clone());

    subsystems
        .create(Some("sub0".to_string()), subsystem_spec(""))
        .await
        .unwrap();
    controllers
        .create("nvmeSubsystems/sub0", Some("ctl0".to_string()), vfio_controller_spec(0))
        .await
        .unwrap();

    // hypervisor and data-plane both refuse; the directory removal is the
    // only step that can still succeed
    bridge.monitor().fail("device_del", "not hot-pluggable");
    bridge.monitor().fail("chardev-remove", "chardev busy");
    bridge
        .spdk
        .fail_next("nvmf_subsystem_remove_listener", -32602, "no listener");

    let err = controllers
        .delete("nvmeSubsystems/sub0/nvmeControllers/ctl0", false)
        .await
        .unwrap_err();
    assert_matches!(err, OpError::DevicePartiallyDeleted { .. });
}
