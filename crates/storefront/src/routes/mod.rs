//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                  - Health check
//!
//! # Cart (JSON)
//! GET    /cart                  - Current cart with totals
//! GET    /cart/count            - Item count badge
//! POST   /cart/add              - Add an item (accumulates quantity)
//! PUT    /cart/update/{id}      - Set a line's quantity (0 removes)
//! DELETE /cart/remove/{id}      - Remove a line
//! POST   /cart/sync             - Retry deferred remote writes
//!
//! # Auth
//! POST /auth/login              - Store the authenticated identity, merge carts
//! POST /auth/logout             - Drop the session
//!
//! # Checkout / payment
//! POST /checkout                - Validate and create a payment session
//! GET  /payment/return          - Gateway redirect target; settles the session
//! ```

pub mod auth;
pub mod cart;
pub mod checkout;
pub mod payment;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tokio::sync::OwnedMutexGuard;
use tower_sessions::Session;

use crate::cart::storage::SessionCartStorage;
use crate::cart::{CartOwner, CartStore};
use crate::error::{AppError, Result};
use crate::models::{CurrentUser, session_keys};
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/count", get(cart::count))
        .route("/add", post(cart::add))
        .route("/update/{id}", put(cart::update))
        .route("/remove/{id}", delete(cart::remove))
        .route("/sync", post(cart::sync))
}

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart_routes())
        .nest("/auth", auth_routes())
        .route("/checkout", post(checkout::create_session))
        .route("/payment/return", get(payment::gateway_return))
}

/// The logged-in identity, if any.
pub(crate) async fn current_user(session: &Session) -> Option<CurrentUser> {
    session
        .get::<CurrentUser>(session_keys::CURRENT_USER)
        .await
        .ok()
        .flatten()
}

/// The cart owner for this request.
pub(crate) async fn cart_owner(session: &Session) -> CartOwner {
    current_user(session)
        .await
        .map_or(CartOwner::Anonymous, |user| CartOwner::User(user.id))
}

/// Take the per-owner serialization lock, so concurrent requests for the
/// same cart apply their writes in order.
pub(crate) async fn lock_cart(
    state: &AppState,
    session: &Session,
    owner: CartOwner,
) -> Result<OwnedMutexGuard<()>> {
    let key = cart_lock_key(session, owner).await?;
    Ok(state.carts().lock_for(&key).await.lock_owned().await)
}

/// Stable lock key for the request's cart owner.
///
/// A fresh session has no id until it is first persisted, so anonymous
/// owners force a save before the key is derived; otherwise every new
/// visitor would contend on one shared lock.
pub(crate) async fn cart_lock_key(session: &Session, owner: CartOwner) -> Result<String> {
    let session_id = match owner {
        CartOwner::User(_) => String::new(),
        CartOwner::Anonymous => {
            if session.id().is_none() {
                session
                    .save()
                    .await
                    .map_err(|e| AppError::Internal(format!("Failed to persist session: {e}")))?;
            }
            session
                .id()
                .map(|id| id.to_string())
                .ok_or_else(|| AppError::Internal("Session id unavailable".to_string()))?
        }
    };
    Ok(owner.lock_key(&session_id))
}

/// The request's cart store: the session-backed anonymous cart, or the
/// cached server-backed cart of the logged-in user.
pub(crate) async fn open_cart(
    state: &AppState,
    session: &Session,
    owner: CartOwner,
) -> Result<Arc<CartStore>> {
    let store = match owner {
        CartOwner::Anonymous => Arc::new(
            CartStore::open(
                owner,
                Arc::clone(state.backend()) as _,
                Arc::new(SessionCartStorage::new(session.clone())),
                state.config().rules,
            )
            .await?,
        ),
        CartOwner::User(user) => state.carts().user_cart(user).await?,
    };
    Ok(store)
}
