//! Smoke coverage of the http frontend: routing, body shapes and the
//! status-code mapping of classified errors.

mod common;

use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};
use xpu_bridge::{rest, service::AppServices};

macro_rules! app {
    ($bridge:expr) => {{
        let services = AppServices::new($bridge.ctx.clone());
        test::init_service(
            App::new()
                .app_data(web::Data::new(services))
                .configure(rest::configure),
        )
        .await
    }};
}

#[actix_web::test]
async fn malloc_volume_round_trip() {
    let bridge = common::bridge(Vec::new(), false);
    let app = app!(&bridge);

    let request = test::TestRequest::post()
        .uri("/v1/mallocVolumes")
        .set_json(json!({
            "id": "mel0",
            "spec": { "block_size": 512, "blocks_count": 128 },
        }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["name"], "volumes/mel0");
    assert_eq!(body["kind"], "malloc");

    let request = test::TestRequest::get().uri("/v1/volumes/mel0").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let request = test::TestRequest::get()
        .uri("/v1/mallocVolumes?page_size=10")
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, request).await).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["next_page_token"], "");

    let request = test::TestRequest::delete()
        .uri("/v1/volumes/mel0")
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[actix_web::test]
async fn classified_errors_map_onto_http_codes() {
    let bridge = common::bridge(Vec::new(), false);
    let app = app!(&bridge);

    // unknown resource
    let request = test::TestRequest::get().uri("/v1/volumes/ghost").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // invalid qos limits
    let request = test::TestRequest::post()
        .uri("/v1/qosVolumes")
        .set_json(json!({
            "id": "qos0",
            "spec": { "volume_name_ref": "vol-A", "max_limit": {} },
        }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["code"], tonic::Code::InvalidArgument as i32);

    // conflicting create
    let create = test::TestRequest::post()
        .uri("/v1/nvmeRemoteControllers")
        .set_json(json!({
            "id": "remote0",
            "spec": { "trtype": "TCP", "multipath": "FAILOVER" },
        }))
        .to_request();
    assert_eq!(
        test::call_service(&app, create).await.status(),
        StatusCode::OK
    );
    let conflicting = test::TestRequest::post()
        .uri("/v1/nvmeRemoteControllers")
        .set_json(json!({
            "id": "remote0",
            "spec": { "trtype": "TCP", "multipath": "DISABLE" },
        }))
        .to_request();
    assert_eq!(
        test::call_service(&app, conflicting).await.status(),
        StatusCode::CONFLICT
    );
}

#[actix_web::test]
async fn nested_routes_address_children_by_resource_name() {
    let bridge = common::bridge(Vec::new(), false);
    let app = app!(&bridge);

    let request = test::TestRequest::post()
        .uri("/v1/nvmeSubsystems")
        .set_json(json!({ "id": "sub0", "spec": { "serial_number": "OPI-1" } }))
        .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::OK
    );

    let request = test::TestRequest::post()
        .uri("/v1/nvmeSubsystems/sub0/nvmeNamespaces")
        .set_json(json!({ "id": "ns0", "spec": { "volume_name_ref": "Malloc1" } }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["name"], "nvmeSubsystems/sub0/nvmeNamespaces/ns0");

    let request = test::TestRequest::get()
        .uri("/v1/nvmeSubsystems/sub0/nvmeNamespaces/ns0")
        .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::OK
    );
}
