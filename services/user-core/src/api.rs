use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tonic::transport::Channel;

use crate::contracts::commerce::v1 as proto;
use crate::contracts::commerce::v1::user_service_client::UserServiceClient;

#[derive(Clone)]
pub struct ApiState {
    pub users: UserServiceClient<Channel>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/users/:userId", get(get_user))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResp {
    user_id: i64,
    username: String,
    mobile: String,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

async fn get_user(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResp>, ApiError> {
    let user_id: i64 = user_id
        .parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid user id"))?;
    if user_id <= 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "invalid user id"));
    }

    let mut users = state.users.clone();
    let response = users
        .get_user(proto::GetUserRequest { user_id })
        .await
        .map_err(|status| match status.code() {
            tonic::Code::NotFound => api_error(StatusCode::NOT_FOUND, "user not found"),
            tonic::Code::InvalidArgument => {
                api_error(StatusCode::BAD_REQUEST, status.message().to_string())
            }
            _ => api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                status.message().to_string(),
            ),
        })?
        .into_inner();

    Ok(Json(UserResp {
        user_id: response.user_id,
        username: response.username,
        mobile: response.mobile,
    }))
}
