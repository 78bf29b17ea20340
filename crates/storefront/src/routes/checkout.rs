//! Checkout route handler.
//!
//! Runs one checkout attempt end to end. The orchestrator lives for the
//! request; double-submit protection comes from the per-owner cart lock
//! held across the attempt.

use axum::{Json, extract::State};
use serde::Serialize;
use tower_sessions::Session;
use tracing::instrument;

use vitrina_core::format_amount;

use crate::checkout::{CancelToken, CheckoutInput, CheckoutOrchestrator};
use crate::error::{AppError, Result};
use crate::state::AppState;

use super::{cart_owner, current_user, lock_cart, open_cart};

/// Created payment session, for the hosted widget.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub amount: String,
    pub currency: String,
}

/// Validate the attempt and create a gateway session.
#[instrument(skip(state, session, input))]
pub async fn create_session(
    State(state): State<AppState>,
    session: Session,
    Json(mut input): Json<CheckoutInput>,
) -> Result<Json<CheckoutResponse>> {
    let owner = cart_owner(&session).await;
    let _guard = lock_cart(&state, &session, owner).await?;
    let cart = open_cart(&state, &session, owner).await?;

    if cart.items().await.is_empty() {
        return Err(AppError::BadRequest("cart is empty".to_string()));
    }

    // The session identity wins over whatever the body claims.
    if let Some(user) = current_user(&session).await {
        input.customer.user_id = Some(user.id);
        input.customer.email = user.email;
    } else {
        input.customer.user_id = None;
    }

    let orchestrator = CheckoutOrchestrator::new(
        std::sync::Arc::clone(state.backend()) as _,
        state.config().rules,
    );
    let created = orchestrator
        .create_session(&cart, &input, CancelToken::never())
        .await?;

    Ok(Json(CheckoutResponse {
        session_id: created.id.to_string(),
        amount: format_amount(created.amount),
        currency: created.currency,
    }))
}
