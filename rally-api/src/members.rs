use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rally_core::member::MemberError;
use rally_engine::RegistryError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/validate-member", post(validate_member))
        .route("/update-member-card", post(update_member_card))
        .route("/create-member", post(create_member))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateMemberRequest {
    member_code: String,
}

/// Validation has its own response contract: membership problems come
/// back as `{valid: false, error}` with a meaningful status, not as the
/// generic error envelope.
async fn validate_member(
    State(state): State<AppState>,
    Json(req): Json<ValidateMemberRequest>,
) -> Response {
    match state.registry.validate(&req.member_code).await {
        Ok(member) => Json(json!({
            "valid": true,
            "member": {
                "id": member.id,
                "memberCode": member.member_code,
                "name": member.name,
                "email": member.email,
            },
        }))
        .into_response(),
        Err(RegistryError::Member(MemberError::NotFound(_))) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "valid": false, "error": "Member not found" })),
        )
            .into_response(),
        Err(RegistryError::Member(MemberError::Inactive(_))) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "valid": false, "error": "This membership is no longer active" })),
        )
            .into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCardRequest {
    member_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutResponse {
    session_id: String,
    checkout_url: String,
}

async fn update_member_card(
    State(state): State<AppState>,
    Json(req): Json<UpdateCardRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let session = state.registry.bind_payment_method(&req.member_code).await?;
    Ok(Json(CheckoutResponse {
        session_id: session.id,
        checkout_url: session.url,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMemberRequest {
    name: String,
    email: String,
    phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMemberResponse {
    member_id: Uuid,
    member_code: String,
    checkout_url: String,
}

async fn create_member(
    State(state): State<AppState>,
    Json(req): Json<CreateMemberRequest>,
) -> Result<Json<CreateMemberResponse>, AppError> {
    let (member, session) = state
        .registry
        .create(&req.name, &req.email, req.phone.as_deref())
        .await?;
    Ok(Json(CreateMemberResponse {
        member_id: member.id,
        member_code: member.member_code,
        checkout_url: session.url,
    }))
}
