//! Cart route handlers.
//!
//! All cart endpoints are JSON. Mutations are optimistic: the response
//! reflects the committed local state, and `sync` reports `deferred` when
//! a remote write is queued for retry.

use axum::{
    Json,
    extract::{Path, State},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use vitrina_core::{CartItem, CartTotals, ProductId, format_amount};

use crate::cart::{CartStore, SyncStatus};
use crate::error::{AppError, Result};
use crate::state::AppState;

use super::{cart_owner, lock_cart, open_cart};

/// One cart line in responses.
#[derive(Debug, Serialize)]
pub struct CartLineView {
    pub product_id: i32,
    pub name: String,
    pub unit_price: String,
    pub quantity: u32,
    pub line_total: String,
    pub image: String,
}

impl From<&CartItem> for CartLineView {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.as_i32(),
            name: item.display_name.clone(),
            unit_price: format_amount(item.unit_price),
            quantity: item.quantity,
            line_total: format_amount(item.line_total()),
            image: item.image_ref.clone(),
        }
    }
}

/// Cart snapshot with totals.
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<CartLineView>,
    pub item_count: u32,
    pub subtotal: String,
    pub tax: String,
    pub total: String,
    /// `synced` or `deferred`; `deferred` means a remote write is queued
    /// and the local state is ahead of the server.
    pub sync: &'static str,
}

impl CartResponse {
    async fn from_store(store: &CartStore, status: SyncStatus) -> Self {
        let items = store.items().await;
        let totals: CartTotals = store.totals().await;
        Self {
            items: items.iter().map(CartLineView::from).collect(),
            item_count: items.iter().map(|item| item.quantity).sum(),
            subtotal: format_amount(totals.subtotal),
            tax: format_amount(totals.tax),
            total: format_amount(totals.total),
            sync: match status {
                SyncStatus::Synced => "synced",
                SyncStatus::Deferred => "deferred",
            },
        }
    }
}

/// Add-to-cart request body.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: i32,
    pub name: String,
    pub price: Decimal,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub image: String,
}

const fn default_quantity() -> u32 {
    1
}

/// Quantity-update request body.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

/// Item-count badge response.
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u32,
}

/// Deferred-write retry response.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub pending: usize,
}

/// Current cart with totals.
#[instrument(skip(state, session))]
pub async fn show(State(state): State<AppState>, session: Session) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await;
    let store = open_cart(&state, &session, owner).await?;
    Ok(Json(CartResponse::from_store(&store, SyncStatus::Synced).await))
}

/// Item count for the cart badge.
#[instrument(skip(state, session))]
pub async fn count(State(state): State<AppState>, session: Session) -> Result<Json<CountResponse>> {
    let owner = cart_owner(&session).await;
    let store = open_cart(&state, &session, owner).await?;
    Ok(Json(CountResponse {
        count: store.item_count().await,
    }))
}

/// Add an item. Quantities accumulate when the product is already in the
/// cart.
#[instrument(skip(state, session, body), fields(product = body.product_id))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<AddItemRequest>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await;
    let _guard = lock_cart(&state, &session, owner).await?;
    let store = open_cart(&state, &session, owner).await?;

    let status = store
        .add_item(CartItem {
            product_id: ProductId::new(body.product_id),
            display_name: body.name,
            unit_price: body.price,
            quantity: body.quantity,
            image_ref: body.image,
        })
        .await;

    Ok(Json(CartResponse::from_store(&store, status).await))
}

/// Set a line's quantity; zero removes the line.
#[instrument(skip(state, session, body), fields(product = id))]
pub async fn update(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i32>,
    Json(body): Json<UpdateQuantityRequest>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await;
    let _guard = lock_cart(&state, &session, owner).await?;
    let store = open_cart(&state, &session, owner).await?;
    let product = require_in_cart(&store, id).await?;

    let status = store.update_quantity(product, body.quantity).await;
    Ok(Json(CartResponse::from_store(&store, status).await))
}

/// Remove a line.
#[instrument(skip(state, session), fields(product = id))]
pub async fn remove(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i32>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await;
    let _guard = lock_cart(&state, &session, owner).await?;
    let store = open_cart(&state, &session, owner).await?;
    let product = require_in_cart(&store, id).await?;

    let status = store.remove_item(product).await;
    Ok(Json(CartResponse::from_store(&store, status).await))
}

/// Resolve a path id against the cart's current lines.
async fn require_in_cart(store: &CartStore, id: i32) -> Result<ProductId> {
    let product = ProductId::new(id);
    if store
        .items()
        .await
        .iter()
        .any(|line| line.product_id == product)
    {
        Ok(product)
    } else {
        Err(AppError::NotFound(format!("product {id} is not in the cart")))
    }
}

/// Retry deferred remote writes; returns how many are still queued.
#[instrument(skip(state, session))]
pub async fn sync(State(state): State<AppState>, session: Session) -> Result<Json<SyncResponse>> {
    let owner = cart_owner(&session).await;
    let _guard = lock_cart(&state, &session, owner).await?;
    let store = open_cart(&state, &session, owner).await?;

    let pending = store.retry_pending().await;
    Ok(Json(SyncResponse { pending }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use tower_sessions::MemoryStore;

    use crate::config::{BackendConfig, StoreRules, StorefrontConfig};

    fn test_state() -> AppState {
        AppState::new(StorefrontConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            base_url: "http://localhost:3000".to_string(),
            backend: BackendConfig {
                base_url: "http://localhost:4000".to_string(),
                api_key: None,
            },
            rules: StoreRules {
                tax_rate: dec!(0.15),
                shipping_cost: dec!(0.00),
            },
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        })
        .unwrap()
    }

    fn test_session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[tokio::test]
    async fn test_update_unknown_product_is_not_found() {
        let err = update(
            State(test_state()),
            test_session(),
            Path(9),
            Json(UpdateQuantityRequest { quantity: 2 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_unknown_product_is_not_found() {
        let err = remove(State(test_state()), test_session(), Path(9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_then_update_anonymous_cart() {
        let state = test_state();
        let session = test_session();

        add(
            State(state.clone()),
            session.clone(),
            Json(AddItemRequest {
                product_id: 1,
                name: "Camiseta".to_string(),
                price: dec!(10.00),
                quantity: 2,
                image: String::new(),
            }),
        )
        .await
        .unwrap();

        let response = update(
            State(state),
            session,
            Path(1),
            Json(UpdateQuantityRequest { quantity: 3 }),
        )
        .await
        .unwrap();
        assert_eq!(response.0.items.len(), 1);
        assert_eq!(response.0.items[0].quantity, 3);
    }
}
