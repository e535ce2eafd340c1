mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::Fixture;
use serde_json::{json, Value};
use tower::ServiceExt;

use ticket_engine::cache::AvailabilityCache;
use ticket_engine::services::RetryPolicy;
use ticket_engine::{router, AppState};

fn app(fx: &Fixture) -> Router {
    router(AppState::new(fx.engine.clone(), AvailabilityCache::disabled(), RetryPolicy::default()))
}

async fn call(app: &Router, method: &str, uri: &str, tenant: Option<String>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        request = request.header("X-Tenant-Id", tenant);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

#[tokio::test]
async fn health_is_open() {
    let fx = Fixture::new();
    let (status, body) = call(&app(&fx), "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test]
async fn tenant_header_is_required() {
    let fx = Fixture::new();
    let zone = fx.general_zone(5, 10).await;
    let uri = format!("/api/zones/{}/availability", zone.id);

    let (status, body) = call(&app(&fx), "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn checkout_flow_over_http() {
    let fx = Fixture::new();
    let zone = fx.general_zone(5, 40).await;
    let app = app(&fx);
    let tenant = Some(fx.tenant.to_string());

    let (status, body) = call(
        &app,
        "POST",
        "/api/holds/lock",
        tenant.clone(),
        Some(json!({
            "session_id": "web-1",
            "items": [{ "zone_id": zone.id, "type": "quantity", "quantity": 2 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["holds"].as_array().unwrap().len(), 1);

    let (status, body) = call(&app, "GET", &format!("/api/zones/{}/availability", zone.id), tenant.clone(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], 3);

    let (status, tx) = call(
        &app,
        "POST",
        "/api/transactions",
        tenant.clone(),
        Some(json!({ "session_id": "web-1", "customer_id": uuid::Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (status, view) = call(&app, "POST", &format!("/api/transactions/{tx_id}/reserve"), tenant.clone(), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["transaction"]["status"], "reserved");

    let (status, plan) = call(
        &app,
        "POST",
        &format!("/api/transactions/{tx_id}/plan"),
        tenant.clone(),
        Some(json!({ "plan_type": "installment", "installment_count": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{plan}");
    let plan_id = plan["id"].as_str().unwrap().to_string();

    let (status, err) = call(
        &app,
        "POST",
        &format!("/api/plans/{plan_id}/payments"),
        tenant.clone(),
        Some(json!({ "amount": "39.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "INVALID_PAYMENT_AMOUNT");
    let expected: rust_decimal::Decimal = err["details"]["expected"].as_str().unwrap().parse().unwrap();
    assert_eq!(expected, rust_decimal::Decimal::from(40));

    for _ in 0..2 {
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/plans/{plan_id}/payments"),
            tenant.clone(),
            Some(json!({ "amount": "40.00" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, view) = call(&app, "GET", &format!("/api/transactions/{tx_id}"), tenant.clone(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["transaction"]["status"], "completed");
    assert_eq!(view["plan"]["status"], "completed");
}

#[tokio::test]
async fn conflicting_lock_maps_to_409() {
    let fx = Fixture::new();
    let zone = fx.general_zone(1, 10).await;
    let app = app(&fx);
    let tenant = Some(fx.tenant.to_string());
    let lock = |session: &str| {
        json!({
            "session_id": session,
            "items": [{ "zone_id": zone.id, "type": "quantity", "quantity": 1 }]
        })
    };

    let (status, _) = call(&app, "POST", "/api/holds/lock", tenant.clone(), Some(lock("a"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = call(&app, "POST", "/api/holds/lock", tenant.clone(), Some(lock("b"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SEAT_UNAVAILABLE");
    assert_eq!(body["details"]["available"], 0);
}

#[tokio::test]
async fn validation_errors_are_bad_requests() {
    let fx = Fixture::new();
    let (status, body) = call(
        &app(&fx),
        "POST",
        "/api/holds/lock",
        Some(fx.tenant.to_string()),
        Some(json!({ "session_id": "", "items": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}
