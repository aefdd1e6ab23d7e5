//! Thin axum transport over the settlement orchestrator.
//!
//! Every response uses the same envelope: `{success: true, data}` on success,
//! `{success: false, message, error, ...details}` on failure. Duplicates are
//! acknowledged with 200 since providers retry until they see success.

use crate::config::PenaltyRule;
use crate::error::SettlementError;
use crate::models::{BonusType, DepositCallback, WithdrawalRequest};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/callbacks/deposit", post(deposit_callback))
        .route("/callbacks/game", post(game_callback))
        .route("/withdrawals", post(withdraw))
        .route("/accounts/:id/wagering", get(wagering_status))
        .route("/accounts/:id/ledger/replay", get(ledger_replay))
        .route("/admin/bonuses", post(grant_bonus))
        .route("/admin/bonuses/:id/cancel", post(cancel_bonus))
        .with_state(state)
}

fn success<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": data })),
    )
        .into_response()
}

fn failure(err: SettlementError) -> Response {
    if let SettlementError::DuplicateTransaction { key, balance_after } = &err {
        return (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "duplicate": true,
                "message": "already recorded",
                "data": { "transaction_id": key, "balance": balance_after },
            })),
        )
            .into_response();
    }

    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "success": false,
        "message": err.to_string(),
        "error": err.kind(),
    });
    if let (Some(map), Value::Object(details)) = (body.as_object_mut(), err.details()) {
        map.extend(details);
    }
    (status, Json(body)).into_response()
}

fn respond<T: Serialize>(result: Result<T, SettlementError>) -> Response {
    match result {
        Ok(data) => success(data),
        Err(err) => failure(err),
    }
}

/// Bodies are parsed here rather than by the `Json` extractor so malformed
/// or mislabelled input still gets the failure envelope
fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, SettlementError> {
    serde_json::from_slice(body).map_err(|e| SettlementError::Validation(e.to_string()))
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    success(json!({
        "status": "ok",
        "environment": state.config.environment,
        "store": state.store_label(),
    }))
}

async fn deposit_callback(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let callback: DepositCallback = match parse(&body) {
        Ok(cb) => cb,
        Err(e) => return failure(e),
    };
    respond(state.orchestrator.handle_deposit_callback(callback).await)
}

async fn game_callback(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload: Value = match parse(&body) {
        Ok(v) => v,
        Err(e) => return failure(e),
    };
    respond(state.orchestrator.handle_game_callback(payload).await)
}

async fn withdraw(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: WithdrawalRequest = match parse(&body) {
        Ok(r) => r,
        Err(e) => return failure(e),
    };
    respond(state.orchestrator.request_withdrawal(request).await)
}

async fn wagering_status(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    respond(state.orchestrator.wagering_status(id).await)
}

async fn ledger_replay(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    respond(state.orchestrator.ledger_replay(id).await)
}

#[derive(Debug, Deserialize)]
struct GrantBonusBody {
    account_id: Uuid,
    bonus_type: String,
    amount: Decimal,
    wagering_multiplier: Option<Decimal>,
    code: Option<String>,
}

async fn grant_bonus(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let result = async {
        let body: GrantBonusBody = parse(&body)?;
        let bonus_type =
            BonusType::from_str(&body.bonus_type).map_err(SettlementError::Validation)?;
        state
            .orchestrator
            .grant_bonus(
                body.account_id,
                bonus_type,
                body.amount,
                body.wagering_multiplier,
                body.code,
            )
            .await
    }
    .await;
    respond(result)
}

#[derive(Debug, Default, Deserialize)]
struct CancelBonusBody {
    rule: Option<String>,
}

async fn cancel_bonus(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let result = async {
        let body: CancelBonusBody = if body.is_empty() {
            CancelBonusBody::default()
        } else {
            parse(&body)?
        };
        let rule = body
            .rule
            .as_deref()
            .map(PenaltyRule::from_str)
            .transpose()
            .map_err(SettlementError::Validation)?;
        state.orchestrator.cancel_bonus(id, rule).await
    }
    .await;
    respond(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_is_success_shaped() {
        let response = failure(SettlementError::DuplicateTransaction {
            key: "TXN1".into(),
            balance_after: Decimal::new(700, 0),
        });
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_failure_status_follows_error() {
        let response = failure(SettlementError::InsufficientFunds {
            balance: Decimal::new(300, 0),
            required: Decimal::new(500, 0),
            deficit: Decimal::new(200, 0),
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = failure(SettlementError::AccountNotFound("ghost".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = failure(SettlementError::ConcurrentModification { attempts: 5 });
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
