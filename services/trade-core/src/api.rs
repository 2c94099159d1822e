//! HTTP entry for order placement. Thin by design: decode the JWT, fill
//! in the ids and the charge, forward to the trade gRPC service.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use platform_common::snowflake::Generator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tonic::transport::Channel;

use crate::contracts::commerce::v1 as proto;
use crate::contracts::commerce::v1::trade_service_client::TradeServiceClient;

#[derive(Clone)]
pub struct ApiState {
    pub trade: TradeServiceClient<Channel>,
    pub ids: Arc<Generator>,
    pub jwt_secret: Arc<String>,
    pub course_price_cents: i32,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/trade/order/place", post(place_order))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderReq {
    course_ids: Vec<i64>,
    #[serde(default)]
    coupon_ids: Vec<i64>,
    #[serde(default)]
    order_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderResp {
    order_id: i64,
    pay_amount: i32,
    status: i32,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: i64,
    #[allow(dead_code)]
    exp: usize,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

async fn place_order(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderReq>,
) -> Result<Json<PlaceOrderResp>, ApiError> {
    let user_id = authenticate(&headers, &state.jwt_secret)?;

    let order_id = if req.order_id > 0 {
        req.order_id
    } else {
        state.ids.next().map_err(|err| {
            tracing::error!(error = %err, "failed to mint order id");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to mint order id")
        })?
    };

    let course_count = i32::try_from(req.course_ids.len())
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "too many course ids"))?;
    let real_amount = state
        .course_price_cents
        .checked_mul(course_count)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "amount overflow"))?;

    let mut trade = state.trade.clone();
    let response = trade
        .place_order(proto::PlaceOrderRequest {
            user_id,
            order_id,
            course_ids: req.course_ids,
            coupon_ids: req.coupon_ids,
            real_amount,
        })
        .await
        .map_err(status_to_http)?
        .into_inner();

    Ok(Json(PlaceOrderResp {
        order_id: response.order_id,
        pay_amount: response.pay_amount,
        status: response.status,
    }))
}

fn authenticate(headers: &HeaderMap, secret: &str) -> Result<i64, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing authorization header"))?;
    let token = header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "expected bearer token"))?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|err| api_error(StatusCode::UNAUTHORIZED, err.to_string()))?;

    if data.claims.user_id <= 0 {
        return Err(api_error(StatusCode::UNAUTHORIZED, "invalid userId claim"));
    }
    Ok(data.claims.user_id)
}

fn status_to_http(status: tonic::Status) -> ApiError {
    let code = match status.code() {
        tonic::Code::InvalidArgument => StatusCode::BAD_REQUEST,
        tonic::Code::NotFound => StatusCode::NOT_FOUND,
        tonic::Code::PermissionDenied => StatusCode::FORBIDDEN,
        tonic::Code::FailedPrecondition | tonic::Code::Aborted => StatusCode::CONFLICT,
        tonic::Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(code, status.message().to_string())
}
