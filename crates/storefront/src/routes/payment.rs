//! Payment-return route handler.
//!
//! The hosted widget redirects the shopper here after payment. The
//! handler settles the session through the reconciliation service, which
//! absorbs duplicate redirects, and immediately forwards the shopper to
//! the outcome page.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use vitrina_core::CheckoutSessionId;

use crate::error::{AppError, Result};
use crate::payment::Shopper;
use crate::state::AppState;

use super::{cart_owner, current_user, lock_cart, open_cart};

/// Query parameters of the gateway redirect.
#[derive(Debug, Deserialize)]
pub struct ReturnParams {
    /// Checkout session id, as placed in the redirect by the gateway.
    pub id: String,
}

/// Settle the session and forward to the outcome page.
#[instrument(skip(state, session, params), fields(session_id = %params.id))]
pub async fn gateway_return(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<ReturnParams>,
) -> Result<Redirect> {
    if params.id.is_empty() {
        return Err(AppError::BadRequest("missing session id".to_string()));
    }
    let session_id = CheckoutSessionId::new(params.id);

    let owner = cart_owner(&session).await;
    let _guard = lock_cart(&state, &session, owner).await?;
    let cart = open_cart(&state, &session, owner).await?;

    let shopper = current_user(&session).await.map_or_else(
        || Shopper {
            user_id: None,
            email: String::new(),
        },
        |user| Shopper {
            user_id: Some(user.id),
            email: user.email,
        },
    );

    let outcome = state
        .reconciliation()
        .reconcile(&session_id, &shopper, &cart)
        .await?;

    let target = if outcome.succeeded {
        format!("/checkout/success?code={}", outcome.result_code)
    } else {
        format!("/checkout/failure?code={}", outcome.result_code)
    };
    Ok(Redirect::to(&target))
}
