//! Auth route handlers.
//!
//! Authentication itself happens upstream; these handlers receive the
//! verified identity, bind it to the session, and run the cart merge. The
//! merge is the load-bearing part of login: the anonymous cart moves into
//! the user's server-side cart before the session switches owner.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{info, instrument};

use vitrina_core::UserId;

use crate::cart::CartStore;
use crate::cart::storage::SessionCartStorage;
use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::models::{CurrentUser, session_keys};
use crate::state::AppState;

use super::{current_user, lock_cart};

/// Login request carrying the upstream-verified identity.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: i32,
    pub email: String,
}

/// Login response with the cart-merge outcome.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i32,
    /// Anonymous items moved into the server-side cart.
    pub migrated: usize,
    /// Items that failed to move; they stay in the session cart and are
    /// re-merged on the next login.
    pub failed: usize,
    pub item_count: u32,
}

/// Bind the identity to the session and merge the anonymous cart.
#[instrument(skip(state, session, body), fields(user = body.user_id))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    if body.email.trim().is_empty() {
        return Err(AppError::BadRequest("email must not be empty".to_string()));
    }
    let user = UserId::new(body.user_id);

    // Hold both cart locks for the whole merge: the anonymous cart is
    // being consumed and the user cart rewritten.
    let anon_guard = lock_cart(&state, &session, crate::cart::CartOwner::Anonymous).await?;
    let user_guard = lock_cart(&state, &session, crate::cart::CartOwner::User(user)).await?;

    let (store, report) = CartStore::merge_on_login(
        Arc::clone(state.backend()) as _,
        Arc::new(SessionCartStorage::new(session.clone())),
        state.config().rules,
        user,
    )
    .await?;
    let store = Arc::new(store);
    state.carts().install_user_cart(user, Arc::clone(&store)).await;

    drop(user_guard);
    drop(anon_guard);

    // Session fixation protection, then bind the identity.
    session
        .cycle_id()
        .await
        .map_err(|e| AppError::Internal(format!("session cycle failed: {e}")))?;
    session
        .insert(
            session_keys::CURRENT_USER,
            &CurrentUser {
                id: user,
                email: body.email.clone(),
            },
        )
        .await
        .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;

    set_sentry_user(&user, Some(&body.email));
    info!(
        migrated = report.migrated,
        failed = report.failed,
        cleaned = report.cleaned,
        "Login merge finished"
    );

    Ok(Json(LoginResponse {
        user_id: body.user_id,
        migrated: report.migrated,
        failed: report.failed,
        item_count: store.item_count().await,
    }))
}

/// Drop the session and the cached cart.
#[instrument(skip(state, session))]
pub async fn logout(State(state): State<AppState>, session: Session) -> Result<()> {
    if let Some(user) = current_user(&session).await {
        state.carts().evict_user_cart(user.id).await;
    }
    session
        .flush()
        .await
        .map_err(|e| AppError::Internal(format!("session flush failed: {e}")))?;
    clear_sentry_user();
    Ok(())
}
