// Integration coverage for the Local Ingress HTTP surface (§4.G/§6),
// driven through the real axum router rather than calling handlers
// directly.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use hearth_bridge_daemon::api::{self, IngressState};
use hearth_bridge_daemon::config::DaemonConfig;
use hearth_bridge_daemon::registry::{PrinterDescriptor, PrinterRegistry, PrinterStatus, Role, RoleAssignment};
use hearth_bridge_daemon::transport::TransportKind;
use tower::ServiceExt;

fn test_state(restaurant_id: &str) -> IngressState {
    IngressState {
        registry: Arc::new(PrinterRegistry::new()),
        config: Arc::new(DaemonConfig { restaurant_id: restaurant_id.to_string(), ..Default::default() }),
        start_time: std::time::Instant::now(),
    }
}

#[tokio::test]
async fn health_endpoint_reports_ok_without_any_printers_configured() {
    let app = api::router(test_state("rest_1"));

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn discovery_reports_legacy_mode_for_a_single_printer() {
    let state = test_state("rest_1");
    state.registry.register(PrinterDescriptor {
        id: "p1".to_string(),
        name: "Kitchen".to_string(),
        transport: TransportKind::NetworkSocket { host: "127.0.0.1".to_string(), port: 1 },
        status: PrinterStatus::Disconnected,
    })
    .await;
    let app = api::router(state);

    let response = app
        .oneshot(Request::builder().uri("/api/discovery").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["mode"], "legacy");
    assert_eq!(json["printer_count"], 1);
}

#[tokio::test]
async fn print_request_with_mismatched_tenant_is_rejected() {
    let app = api::router(test_state("rest_1"));

    let payload = common::create_test_print_job("order_1", "grill");
    let body = serde_json::json!({
        "escpos_base64": base64::engine::general_purpose::STANDARD.encode(b"\x1b@hello"),
        "job_type": "kitchen_order",
        "metadata": {
            "order_id": payload["order_id"],
            "restaurant_id": "rest_WRONG",
            "device_id": "device_1"
        }
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/print")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn print_request_against_unreachable_printer_reports_retryable_failure() {
    let state = test_state("rest_1");
    state.registry.register(PrinterDescriptor {
        id: "p1".to_string(),
        name: "Kitchen".to_string(),
        transport: TransportKind::NetworkSocket { host: "127.0.0.1".to_string(), port: 1 },
        status: PrinterStatus::Disconnected,
    })
    .await;
    state
        .registry
        .set_assignments(vec![RoleAssignment {
            role: Role::KitchenDefault,
            printer_id: "p1".to_string(),
            station_id: None,
            station_name: None,
            copies: 1,
            cash_drawer_enabled: false,
        }])
        .await;
    let app = api::router(state);

    let body = serde_json::json!({
        "escpos_base64": base64::engine::general_purpose::STANDARD.encode(b"\x1b@hello"),
        "job_type": "kitchen_order",
        "metadata": {
            "restaurant_id": "rest_1",
            "device_id": "device_1"
        }
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/print")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["retryable"], true);
}
