use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiResult,
    middleware::AuthUser,
    models::{SupportTicket, TicketPriority},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/support/tickets", post(create_ticket))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTicketRequest {
    #[validate(length(min = 3, max = 200, message = "subject must be 3 to 200 characters"))]
    pub subject: String,
    #[validate(length(min = 10, max = 5000, message = "describe the problem in at least 10 characters"))]
    pub description: String,
    pub priority: Option<TicketPriority>,
}

/// POST /api/support/tickets
async fn create_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let ticket = SupportTicket::create(
        &state.db.pool,
        user.user_id,
        req.subject.trim(),
        req.description.trim(),
        req.priority.unwrap_or(TicketPriority::Medium),
    )
    .await?;

    tracing::info!("Support ticket {} opened by user {}", ticket.id, user.user_id);
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "ticket": ticket }))))
}
