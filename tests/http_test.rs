mod helpers;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use casino_settlement::http::router;
use helpers::*;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

fn money(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

async fn call(h: &TestHarness, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router(h.app_state()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let h = TestHarness::new();
    let (status, body) = call(&h, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["store"], "memory");
}

#[tokio::test]
async fn test_game_callback_envelopes() {
    let h = TestHarness::new();
    h.seed_account("rahim", dec(300)).await;

    let payload = game_callback("rahim", "BET", 100, "H-1", "slot-7");
    let (status, body) = call(&h, "POST", "/callbacks/game", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["transaction_id"], "H-1");
    assert_eq!(money(&body["data"]["balance"]), dec(200));

    let (status, body) = call(&h, "POST", "/callbacks/game", Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["duplicate"], true);
    assert_eq!(money(&body["data"]["balance"]), dec(200));

    let overdraw = game_callback("rahim", "BET", 500, "H-2", "slot-7");
    let (status, body) = call(&h, "POST", "/callbacks/game", Some(overdraw)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "insufficient_funds");
    assert_eq!(money(&body["deficit"]), dec(300));
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let h = TestHarness::new();
    let (status, body) = call(
        &h,
        "POST",
        "/callbacks/game",
        Some(game_callback("ghost", "BET", 10, "H-3", "slot-7")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_deposit_then_wagering_status() {
    let h = TestHarness::new();
    let account = h.seed_account("jamal", dec(0)).await;

    let (status, body) = call(
        &h,
        "POST",
        "/callbacks/deposit",
        Some(json!({
            "success": true,
            "userIdentifyAddress": format!("dep_{}", account.id),
            "amount": 1000,
            "trxid": "BK-H1",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body["data"]["balance"]), dec(1000));

    let uri = format!("/accounts/{}/wagering", account.id);
    let (status, body) = call(&h, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body["data"]["required"]), dec(1100));
    assert_eq!(body["data"]["withdrawable"], false);

    let (status, body) = call(
        &h,
        "POST",
        "/withdrawals",
        Some(json!({
            "account_id": account.id,
            "amount": 100,
            "request_id": "WD-H1",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "wagering_incomplete");
}

#[tokio::test]
async fn test_admin_bonus_grant_and_cancel() {
    let h = TestHarness::new();
    let account = h.seed_account("shila", dec(100)).await;

    let (status, body) = call(
        &h,
        "POST",
        "/admin/bonuses",
        Some(json!({
            "account_id": account.id,
            "bonus_type": "manual",
            "amount": 50,
            "wagering_multiplier": 5,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let grant_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &h,
        "POST",
        "/admin/bonuses",
        Some(json!({
            "account_id": account.id,
            "bonus_type": "jackpot",
            "amount": 50,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let uri = format!("/admin/bonuses/{}/cancel", grant_id);
    let (status, body) = call(&h, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(h.account(&account).await.bonus_balance, dec(0));
}

#[tokio::test]
async fn test_malformed_bodies_get_the_failure_envelope() {
    let h = TestHarness::new();

    for (uri, content_type, body) in [
        ("/callbacks/game", "application/json", "{not json"),
        ("/callbacks/deposit", "text/plain", "trxid=BK-1"),
        ("/withdrawals", "application/json", ""),
        ("/admin/bonuses", "application/x-www-form-urlencoded", "amount=5"),
    ] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap();
        let response = router(h.app_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false, "{}", uri);
        assert_eq!(json["error"], "validation_error", "{}", uri);
        assert!(json["message"].is_string(), "{}", uri);
    }
}
