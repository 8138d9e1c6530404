//! End-to-end coverage of the volume families: encrypted volumes (key
//! handling and re-key), QoS volumes (limit validation, forbidden
//! underlying change, pagination) and the AIO/Null/Malloc backing volumes.

mod common;

use assert_matches::assert_matches;
use serde_json::json;
use xpu_bridge::{
    api,
    error::OpError,
    orch::{backing::VolumeCoordinator, crypto::EncryptedVolumeCoordinator, qos::QosVolumeCoordinator},
};

fn encrypted_spec(key: Vec<u8>) -> api::EncryptedVolumeSpec {
    api::EncryptedVolumeSpec {
        volume_name_ref: "Malloc1".to_string(),
        cipher: api::Cipher::AesXts128,
        key,
    }
}

#[tokio::test]
async fn encrypted_volume_create_splits_the_key() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = EncryptedVolumeCoordinator::new(bridge.ctx.clone());

    let key: Vec<u8> = (0u8 .. 32).collect();
    let volume = coordinator
        .create(Some("crypt0".to_string()), encrypted_spec(key))
        .await
        .unwrap();
    assert_eq!(volume.name, "volumes/crypt0");

    let calls: Vec<String> = bridge.spdk.calls().into_iter().map(|(m, _)| m).collect();
    assert_eq!(calls, vec!["accel_crypto_key_create", "bdev_crypto_create"]);

    let key_create = &bridge.spdk.method_calls("accel_crypto_key_create")[0];
    assert_eq!(key_create["cipher"], "AES_XTS");
    assert_eq!(key_create["name"], "crypt0");
    assert_eq!(key_create["key"], "000102030405060708090a0b0c0d0e0f");
    assert_eq!(key_create["key2"], "101112131415161718191a1b1c1d1e1f");

    let bdev_create = &bridge.spdk.method_calls("bdev_crypto_create")[0];
    assert_eq!(bdev_create["name"], "crypt0");
    assert_eq!(bdev_create["base_bdev_name"], "Malloc1");
    assert_eq!(bdev_create["key_name"], "crypt0");
}

#[tokio::test]
async fn wrong_key_size_is_rejected_without_data_plane_work() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = EncryptedVolumeCoordinator::new(bridge.ctx.clone());

    let err = coordinator
        .create(Some("crypt0".to_string()), encrypted_spec(vec![0u8; 4]))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "expected key size 256b, provided size 32b"
    );
    assert_eq!(
        tonic::Status::from(err).code(),
        tonic::Code::InvalidArgument
    );
    assert_eq!(bridge.spdk.call_count(), 0);

    // the 256 cipher needs 64 bytes of material
    let mut spec = encrypted_spec(vec![0u8; 32]);
    spec.cipher = api::Cipher::AesXts256;
    let err = coordinator
        .create(Some("crypt0".to_string()), spec)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "expected key size 512b, provided size 256b"
    );
    assert_eq!(bridge.spdk.call_count(), 0);
}

#[tokio::test]
async fn crypto_bdev_failure_destroys_the_key_again() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = EncryptedVolumeCoordinator::new(bridge.ctx.clone());

    bridge
        .spdk
        .fail_next("bdev_crypto_create", -32602, "base bdev not found");
    let err = coordinator
        .create(Some("crypt0".to_string()), encrypted_spec((0u8 .. 32).collect()))
        .await
        .unwrap_err();
    assert_matches!(err, OpError::Spdk { .. });

    let calls: Vec<String> = bridge.spdk.calls().into_iter().map(|(m, _)| m).collect();
    assert_eq!(
        calls,
        vec![
            "accel_crypto_key_create",
            "bdev_crypto_create",
            "accel_crypto_key_destroy",
        ]
    );
    let err = coordinator.get("volumes/crypt0").await.unwrap_err();
    assert_matches!(err, OpError::NotFound { .. });
}

#[tokio::test]
async fn encrypted_volume_update_rekeys_in_strict_order() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = EncryptedVolumeCoordinator::new(bridge.ctx.clone());

    coordinator
        .create(Some("crypt0".to_string()), encrypted_spec((0u8 .. 32).collect()))
        .await
        .unwrap();
    bridge.spdk.clear_calls();

    coordinator
        .update("volumes/crypt0", encrypted_spec((100u8 .. 132).collect()))
        .await
        .unwrap();
    let calls: Vec<String> = bridge.spdk.calls().into_iter().map(|(m, _)| m).collect();
    assert_eq!(
        calls,
        vec![
            "bdev_crypto_delete",
            "accel_crypto_key_destroy",
            "accel_crypto_key_create",
            "bdev_crypto_create",
        ]
    );
}

#[tokio::test]
async fn encrypted_volume_delete_is_classified() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = EncryptedVolumeCoordinator::new(bridge.ctx.clone());

    coordinator
        .create(Some("crypt0".to_string()), encrypted_spec((0u8 .. 32).collect()))
        .await
        .unwrap();

    // both teardown steps fail: the device was not deleted at all
    bridge.spdk.fail_next("bdev_crypto_delete", -32602, "busy");
    bridge
        .spdk
        .fail_next("accel_crypto_key_destroy", -32602, "busy");
    let err = coordinator.delete("volumes/crypt0", false).await.unwrap_err();
    assert_matches!(err, OpError::DeviceNotDeleted { .. });

    // recreate, then a single failing step is only partial
    coordinator
        .create(Some("crypt0".to_string()), encrypted_spec((0u8 .. 32).collect()))
        .await
        .unwrap();
    bridge.spdk.fail_next("bdev_crypto_delete", -32602, "busy");
    let err = coordinator.delete("volumes/crypt0", false).await.unwrap_err();
    assert_matches!(err, OpError::DevicePartiallyDeleted { .. });
}

fn qos_spec(volume: &str, rw_kiops: i64) -> api::QosVolumeSpec {
    api::QosVolumeSpec {
        volume_name_ref: volume.to_string(),
        max_limit: api::QosLimit {
            rw_iops_kiops: rw_kiops,
            ..Default::default()
        },
        min_limit: None,
    }
}

#[tokio::test]
async fn qos_create_converts_kiops_and_commits() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = QosVolumeCoordinator::new(bridge.ctx.clone());

    let volume = coordinator
        .create(Some("qos0".to_string()), qos_spec("vol-A", 5))
        .await
        .unwrap();
    assert_eq!(volume.name, "qosVolumes/qos0");

    let limit = &bridge.spdk.method_calls("bdev_set_qos_limit")[0];
    assert_eq!(
        *limit,
        json!({
            "name": "vol-A",
            "rw_ios_per_sec": 5000,
            "r_mbytes_per_sec": 0,
            "w_mbytes_per_sec": 0,
            "rw_mbytes_per_sec": 0,
        })
    );
}

#[tokio::test]
async fn qos_limits_are_validated() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = QosVolumeCoordinator::new(bridge.ctx.clone());

    // all-zero limits
    let err = coordinator
        .create(Some("qos0".to_string()), qos_spec("vol-A", 0))
        .await
        .unwrap_err();
    assert_matches!(err, OpError::InvalidArgument { .. });

    // negative values
    let err = coordinator
        .create(Some("qos0".to_string()), qos_spec("vol-A", -1))
        .await
        .unwrap_err();
    assert_matches!(err, OpError::InvalidArgument { .. });

    // unsupported read iops field
    let mut unsupported = qos_spec("vol-A", 0);
    unsupported.max_limit.rd_iops_kiops = 1;
    let err = coordinator
        .create(Some("qos0".to_string()), unsupported)
        .await
        .unwrap_err();
    assert_matches!(err, OpError::InvalidArgument { .. });

    // min limits are not supported at all
    let mut with_min = qos_spec("vol-A", 1);
    with_min.min_limit = Some(api::QosLimit::default());
    let err = coordinator
        .create(Some("qos0".to_string()), with_min)
        .await
        .unwrap_err();
    assert_matches!(err, OpError::InvalidArgument { .. });

    assert_eq!(bridge.spdk.call_count(), 0);

    // one strictly positive allowed field with non-negative others passes
    let mut valid = qos_spec("vol-A", 0);
    valid.max_limit.rd_mbs = 100;
    coordinator.create(Some("qos0".to_string()), valid).await.unwrap();
}

#[tokio::test]
async fn qos_update_cannot_change_the_underlying_volume() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = QosVolumeCoordinator::new(bridge.ctx.clone());

    let created = coordinator
        .create(Some("qv1".to_string()), qos_spec("vol-A", 5))
        .await
        .unwrap();
    bridge.spdk.clear_calls();

    let err = coordinator
        .update("qosVolumes/qv1", qos_spec("vol-B", 5))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Change of underlying volume vol-A to a new one vol-B is forbidden"
    );
    assert_eq!(
        tonic::Status::from(err).code(),
        tonic::Code::InvalidArgument
    );
    assert_eq!(bridge.spdk.call_count(), 0);
    // the stored record is unchanged
    assert_eq!(coordinator.get("qosVolumes/qv1").await.unwrap(), created);

    // a legal update adjusts the limits in place
    coordinator
        .update("qosVolumes/qv1", qos_spec("vol-A", 9))
        .await
        .unwrap();
    let limit = &bridge.spdk.method_calls("bdev_set_qos_limit")[0];
    assert_eq!(limit["rw_ios_per_sec"], 9000);
}

#[tokio::test]
async fn qos_delete_resets_the_limits() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = QosVolumeCoordinator::new(bridge.ctx.clone());

    coordinator
        .create(Some("qos0".to_string()), qos_spec("vol-A", 5))
        .await
        .unwrap();
    bridge.spdk.clear_calls();

    coordinator.delete("qosVolumes/qos0", false).await.unwrap();
    let limit = &bridge.spdk.method_calls("bdev_set_qos_limit")[0];
    assert_eq!(limit["name"], "vol-A");
    assert_eq!(limit["rw_ios_per_sec"], 0);
    assert_eq!(limit["rw_mbytes_per_sec"], 0);

    let err = coordinator.get("qosVolumes/qos0").await.unwrap_err();
    assert_matches!(err, OpError::NotFound { .. });
}

#[tokio::test]
async fn qos_list_pages_with_a_cursor() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = QosVolumeCoordinator::new(bridge.ctx.clone());

    for id in ["qos-volume-45", "qos-volume-41"] {
        coordinator
            .create(Some(id.to_string()), qos_spec("vol-A", 5))
            .await
            .unwrap();
    }

    let (page, token) = coordinator.list(1, "").await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "qosVolumes/qos-volume-41");
    assert!(!token.is_empty());

    let (page, token) = coordinator.list(1, &token).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "qosVolumes/qos-volume-45");
    assert!(token.is_empty());

    // an unknown cursor is NotFound
    let err = coordinator.list(1, "bogus-token").await.unwrap_err();
    assert_matches!(err, OpError::UnknownPageToken { .. });
    assert_eq!(
        tonic::Status::from(err).code(),
        tonic::Code::NotFound
    );
}

#[tokio::test]
async fn backing_volumes_create_their_bdevs() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = VolumeCoordinator::new(bridge.ctx.clone());

    coordinator
        .create(
            Some("aio0".to_string()),
            api::VolumeSpec::Aio(api::AioVolumeSpec {
                filename: "/dev/fake".to_string(),
                block_size: 512,
            }),
        )
        .await
        .unwrap();
    let aio = &bridge.spdk.method_calls("bdev_aio_create")[0];
    assert_eq!(
        *aio,
        json!({ "name": "aio0", "filename": "/dev/fake", "block_size": 512 })
    );

    coordinator
        .create(
            Some("null0".to_string()),
            api::VolumeSpec::Null(api::NullVolumeSpec {
                block_size: 512,
                blocks_count: 64,
            }),
        )
        .await
        .unwrap();
    let null = &bridge.spdk.method_calls("bdev_null_create")[0];
    assert_eq!(null["num_blocks"], 64);

    coordinator
        .create(
            Some("mel0".to_string()),
            api::VolumeSpec::Malloc(api::MallocVolumeSpec {
                block_size: 512,
                blocks_count: 128,
                uuid: None,
            }),
        )
        .await
        .unwrap();
    let malloc = &bridge.spdk.method_calls("bdev_malloc_create")[0];
    assert_eq!(malloc["num_blocks"], 128);
    assert!(malloc.get("uuid").is_none());

    // per-kind listing only sees its own kind
    let (aios, _) = coordinator.list(Some("aio"), 0, "").await.unwrap();
    assert_eq!(aios.len(), 1);
    assert_eq!(aios[0].name, "volumes/aio0");
    let (all, _) = coordinator.list(None, 0, "").await.unwrap();
    assert_eq!(all.len(), 3);

    coordinator.delete("volumes/mel0", false).await.unwrap();
    assert_eq!(bridge.spdk.method_calls("bdev_malloc_delete").len(), 1);
}

#[tokio::test]
async fn volume_names_are_unique_across_kinds() {
    let bridge = common::bridge(Vec::new(), false);
    let volumes = VolumeCoordinator::new(bridge.ctx.clone());
    let encrypted = EncryptedVolumeCoordinator::new(bridge.ctx.clone());

    volumes
        .create(
            Some("vol0".to_string()),
            api::VolumeSpec::Null(api::NullVolumeSpec {
                block_size: 512,
                blocks_count: 64,
            }),
        )
        .await
        .unwrap();

    // an encrypted volume cannot claim the same name with different content
    let err = encrypted
        .create(Some("vol0".to_string()), encrypted_spec((0u8 .. 32).collect()))
        .await
        .unwrap_err();
    assert_matches!(err, OpError::AlreadyExists { .. });
}

#[tokio::test]
async fn qos_result_false_is_an_unexpected_call_result() {
    let bridge = common::bridge(Vec::new(), false);
    let coordinator = QosVolumeCoordinator::new(bridge.ctx.clone());

    bridge.spdk.reply_next("bdev_set_qos_limit", json!(false));
    let err = coordinator
        .create(Some("qos0".to_string()), qos_spec("vol-A", 5))
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("unexpected SPDK call result for method 'bdev_set_qos_limit'"));
    let err = coordinator.get("qosVolumes/qos0").await.unwrap_err();
    assert_matches!(err, OpError::NotFound { .. });
}
