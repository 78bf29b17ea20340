//! Cart store and the anonymous-to-authenticated merge protocol.
//!
//! The store keeps the authoritative line items in memory behind one async
//! mutex per cart owner; the lock is held across both the local mutation
//! and the remote write, so two rapid mutations of the same cart cannot
//! race their upserts. Updates are optimistic: the in-memory state commits
//! first, and a failed remote write is queued as a [`PendingSync`] instead
//! of rolling back.

pub mod storage;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{instrument, warn};

use vitrina_core::{CartItem, CartTotals, ProductId, UserId};

use crate::backend::{BackendError, CartBackend};
use crate::config::StoreRules;
use storage::AnonymousCartStorage;

/// Who owns the cart. Ownership transitions exactly once, anonymous to
/// authenticated, through [`CartStore::merge_on_login`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOwner {
    /// Cart persisted client-side only (session storage).
    Anonymous,
    /// Cart persisted server-side, keyed by user id.
    User(UserId),
}

impl CartOwner {
    /// Stable key for per-owner serialization locks.
    #[must_use]
    pub fn lock_key(&self, session_id: &str) -> String {
        match self {
            Self::Anonymous => format!("anon:{session_id}"),
            Self::User(id) => format!("user:{id}"),
        }
    }
}

/// A remote write that failed and is waiting for a retry.
#[derive(Debug, Clone)]
pub enum PendingSync {
    Upsert(CartItem),
    SetQuantity(ProductId, u32),
    Remove(ProductId),
    Clear,
}

/// Whether a mutation's persistence completed or was deferred for retry.
///
/// The in-memory state is committed either way; `Deferred` is the
/// recoverable-error signal the caller can surface to the shopper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    Deferred,
}

/// Result of one anonymous-to-authenticated merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Anonymous items successfully upserted into the server cart.
    pub migrated: usize,
    /// Anonymous items whose upsert failed (they stay in the anonymous
    /// store for the next attempt).
    pub failed: usize,
    /// Whether the anonymous store was deleted. Only true when every
    /// upsert succeeded.
    pub cleaned: bool,
}

struct CartState {
    items: Vec<CartItem>,
    pending: Vec<PendingSync>,
}

/// The authoritative line-item list for the current shopper.
pub struct CartStore {
    owner: CartOwner,
    backend: Arc<dyn CartBackend>,
    storage: Arc<dyn AnonymousCartStorage>,
    rules: StoreRules,
    state: Mutex<CartState>,
}

impl CartStore {
    /// Open the cart for an owner, loading current items from the owner's
    /// persistence (session storage or the server-side cart).
    ///
    /// # Errors
    ///
    /// Returns an error if the server-side cart of an authenticated owner
    /// cannot be fetched. A failed anonymous load starts from an empty
    /// cart instead, since the session entry may simply not exist yet.
    pub async fn open(
        owner: CartOwner,
        backend: Arc<dyn CartBackend>,
        storage: Arc<dyn AnonymousCartStorage>,
        rules: StoreRules,
    ) -> Result<Self, BackendError> {
        let items = match owner {
            CartOwner::Anonymous => storage.load().await.unwrap_or_else(|e| {
                warn!("Failed to load anonymous cart: {e}");
                Vec::new()
            }),
            CartOwner::User(user) => backend.fetch_cart(user).await?,
        };

        Ok(Self {
            owner,
            backend,
            storage,
            rules,
            state: Mutex::new(CartState {
                items,
                pending: Vec::new(),
            }),
        })
    }

    /// The cart's current owner.
    #[must_use]
    pub const fn owner(&self) -> CartOwner {
        self.owner
    }

    /// Snapshot of the current items.
    pub async fn items(&self) -> Vec<CartItem> {
        self.state.lock().await.items.clone()
    }

    /// Sum of quantities across all lines.
    pub async fn item_count(&self) -> u32 {
        self.state
            .lock()
            .await
            .items
            .iter()
            .map(|item| item.quantity)
            .sum()
    }

    /// Subtotal, tax, and total for the current items.
    pub async fn totals(&self) -> CartTotals {
        CartTotals::compute(&self.state.lock().await.items, self.rules.tax_rate)
    }

    /// Remote writes that failed and await [`retry_pending`](Self::retry_pending).
    pub async fn pending_ops(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Add `item.quantity` units of the product to the cart. If the
    /// product is already present its quantity accumulates; carts never
    /// hold two lines for the same product.
    #[instrument(skip(self, item), fields(product = %item.product_id))]
    pub async fn add_item(&self, item: CartItem) -> SyncStatus {
        let mut state = self.state.lock().await;

        match state
            .items
            .iter_mut()
            .find(|line| line.product_id == item.product_id)
        {
            Some(line) => line.quantity = line.quantity.saturating_add(item.quantity),
            None => state.items.push(item.clone()),
        }

        match self.owner {
            CartOwner::Anonymous => self.persist_anonymous(&mut state).await,
            CartOwner::User(user) => {
                // Additive upsert of the delta only; the server accumulates.
                if let Err(e) = self.backend.upsert_item(user, &item).await {
                    warn!("Cart upsert failed, deferring: {e}");
                    state.pending.push(PendingSync::Upsert(item));
                    return SyncStatus::Deferred;
                }
                SyncStatus::Synced
            }
        }
    }

    /// Set a line's quantity; a quantity of zero or less removes the line.
    #[instrument(skip(self), fields(product = %product))]
    pub async fn update_quantity(&self, product: ProductId, new_qty: i64) -> SyncStatus {
        if new_qty <= 0 {
            return self.remove_item(product).await;
        }
        let new_qty = u32::try_from(new_qty).unwrap_or(u32::MAX);

        let mut state = self.state.lock().await;
        if let Some(line) = state
            .items
            .iter_mut()
            .find(|line| line.product_id == product)
        {
            line.quantity = new_qty;
        }

        match self.owner {
            CartOwner::Anonymous => self.persist_anonymous(&mut state).await,
            CartOwner::User(user) => {
                if let Err(e) = self.backend.set_quantity(user, product, new_qty).await {
                    warn!("Cart quantity update failed, deferring: {e}");
                    state.pending.push(PendingSync::SetQuantity(product, new_qty));
                    return SyncStatus::Deferred;
                }
                SyncStatus::Synced
            }
        }
    }

    /// Remove a line unconditionally from memory; remote deletion is
    /// best-effort.
    #[instrument(skip(self), fields(product = %product))]
    pub async fn remove_item(&self, product: ProductId) -> SyncStatus {
        let mut state = self.state.lock().await;
        state.items.retain(|line| line.product_id != product);

        match self.owner {
            CartOwner::Anonymous => self.persist_anonymous(&mut state).await,
            CartOwner::User(user) => {
                if let Err(e) = self.backend.remove_item(user, product).await {
                    warn!("Cart removal failed, deferring: {e}");
                    state.pending.push(PendingSync::Remove(product));
                    return SyncStatus::Deferred;
                }
                SyncStatus::Synced
            }
        }
    }

    /// Empty the cart. For authenticated shoppers this is a single atomic
    /// remote clear, not N individual deletes. Used only after a confirmed
    /// successful payment.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> SyncStatus {
        let mut state = self.state.lock().await;
        state.items.clear();

        match self.owner {
            CartOwner::Anonymous => {
                if let Err(e) = self.storage.clear().await {
                    warn!("Failed to clear anonymous cart storage: {e}");
                    return SyncStatus::Deferred;
                }
                SyncStatus::Synced
            }
            CartOwner::User(user) => {
                if let Err(e) = self.backend.clear_cart(user).await {
                    warn!("Atomic cart clear failed, deferring: {e}");
                    state.pending.push(PendingSync::Clear);
                    return SyncStatus::Deferred;
                }
                SyncStatus::Synced
            }
        }
    }

    /// Re-attempt every deferred remote write. Writes that fail again stay
    /// queued. Returns the number still pending.
    #[instrument(skip(self))]
    pub async fn retry_pending(&self) -> usize {
        let mut state = self.state.lock().await;
        let CartOwner::User(user) = self.owner else {
            // Anonymous persistence has no per-op queue; re-save the
            // current snapshot instead.
            let _ = self.persist_anonymous(&mut state).await;
            return state.pending.len();
        };

        let queued = std::mem::take(&mut state.pending);
        for op in queued {
            let result = match &op {
                PendingSync::Upsert(item) => self.backend.upsert_item(user, item).await,
                PendingSync::SetQuantity(product, qty) => {
                    self.backend.set_quantity(user, *product, *qty).await
                }
                PendingSync::Remove(product) => self.backend.remove_item(user, *product).await,
                PendingSync::Clear => self.backend.clear_cart(user).await,
            };
            if let Err(e) = result {
                warn!("Deferred cart write failed again: {e}");
                state.pending.push(op);
            }
        }
        state.pending.len()
    }

    /// Persist the anonymous snapshot to session storage.
    async fn persist_anonymous(&self, state: &mut CartState) -> SyncStatus {
        if let Err(e) = self.storage.save(&state.items).await {
            warn!("Failed to persist anonymous cart: {e}");
            return SyncStatus::Deferred;
        }
        SyncStatus::Synced
    }

    /// Migrate an anonymous cart into a user's server-side cart at login.
    ///
    /// The protocol, in order:
    /// 1. Read the anonymous cart (may be empty).
    /// 2. Additively upsert every anonymous item into the server cart.
    ///    Failures are logged per item and do not abort the remaining
    ///    upserts.
    /// 3. Delete the anonymous store only if every upsert succeeded, so a
    ///    later login can retry the migration.
    /// 4. Fetch the server cart and make it the in-memory truth.
    ///
    /// # Errors
    ///
    /// Returns an error only when the final server-cart fetch fails; the
    /// merge itself degrades per item.
    #[instrument(skip(backend, storage, rules), fields(user = %user))]
    pub async fn merge_on_login(
        backend: Arc<dyn CartBackend>,
        storage: Arc<dyn AnonymousCartStorage>,
        rules: StoreRules,
        user: UserId,
    ) -> Result<(Self, MergeReport), BackendError> {
        let anonymous_items = storage.load().await.unwrap_or_else(|e| {
            warn!("Failed to read anonymous cart before merge: {e}");
            Vec::new()
        });

        let mut migrated = 0usize;
        let mut failed = 0usize;
        for item in &anonymous_items {
            match backend.upsert_item(user, item).await {
                Ok(()) => migrated += 1,
                Err(e) => {
                    warn!(product = %item.product_id, "Merge upsert failed: {e}");
                    failed += 1;
                }
            }
        }

        let mut cleaned = false;
        if failed == 0 && !anonymous_items.is_empty() {
            match storage.clear().await {
                Ok(()) => cleaned = true,
                Err(e) => warn!("Failed to delete anonymous cart after merge: {e}"),
            }
        }

        // The server cart is the source of truth from here on, whether or
        // not every item migrated.
        let items = backend.fetch_cart(user).await?;

        let store = Self {
            owner: CartOwner::User(user),
            backend,
            storage,
            rules,
            state: Mutex::new(CartState {
                items,
                pending: Vec::new(),
            }),
        };
        Ok((store, MergeReport {
            migrated,
            failed,
            cleaned,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::testing::FakeBackend;
    use storage::MemoryCartStorage;

    fn rules() -> StoreRules {
        StoreRules {
            tax_rate: dec!(0.15),
            shipping_cost: dec!(0.00),
        }
    }

    fn item(id: i32, price: rust_decimal::Decimal, qty: u32) -> CartItem {
        CartItem {
            product_id: ProductId::new(id),
            display_name: format!("Product {id}"),
            unit_price: price,
            quantity: qty,
            image_ref: format!("/img/{id}.png"),
        }
    }

    async fn anonymous_store(storage: Arc<MemoryCartStorage>) -> CartStore {
        CartStore::open(
            CartOwner::Anonymous,
            Arc::new(FakeBackend::new()),
            storage,
            rules(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_item_accumulates_by_product_id() {
        let store = anonymous_store(Arc::new(MemoryCartStorage::new())).await;

        store.add_item(item(1, dec!(10.00), 2)).await;
        store.add_item(item(2, dec!(5.50), 1)).await;
        store.add_item(item(1, dec!(10.00), 3)).await;

        let items = store.items().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].quantity, 5);
        assert_eq!(store.item_count().await, 6);
    }

    #[tokio::test]
    async fn test_no_duplicate_product_ids_across_mutations() {
        let store = anonymous_store(Arc::new(MemoryCartStorage::new())).await;

        for _ in 0..4 {
            store.add_item(item(7, dec!(2.00), 1)).await;
        }
        store.update_quantity(ProductId::new(7), 2).await;
        store.add_item(item(7, dec!(2.00), 1)).await;

        let items = store.items().await;
        let ids: Vec<_> = items.iter().map(|line| line.product_id).collect();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids, deduped);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_add_item_saturates_quantity_at_max() {
        let store = anonymous_store(Arc::new(MemoryCartStorage::new())).await;

        store.add_item(item(1, dec!(1.00), u32::MAX - 1)).await;
        store.add_item(item(1, dec!(1.00), 5)).await;

        let items = store.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, u32::MAX);
    }

    #[tokio::test]
    async fn test_update_quantity_zero_removes() {
        let store = anonymous_store(Arc::new(MemoryCartStorage::new())).await;
        store.add_item(item(1, dec!(10.00), 2)).await;
        store.add_item(item(2, dec!(5.50), 1)).await;

        store.update_quantity(ProductId::new(1), 0).await;
        let items = store.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, ProductId::new(2));

        // Negative quantities behave the same way
        store.update_quantity(ProductId::new(2), -3).await;
        assert!(store.items().await.is_empty());
    }

    #[tokio::test]
    async fn test_totals_match_scenario() {
        let store = anonymous_store(Arc::new(MemoryCartStorage::new())).await;
        store.add_item(item(1, dec!(10.00), 2)).await;
        store.add_item(item(2, dec!(5.50), 1)).await;

        let totals = store.totals().await;
        assert_eq!(totals.subtotal, dec!(25.50));
        assert_eq!(totals.tax, dec!(3.83));
        assert_eq!(totals.total, dec!(29.33));
    }

    #[tokio::test]
    async fn test_anonymous_mutations_persist_to_storage() {
        let storage = Arc::new(MemoryCartStorage::new());
        let store = anonymous_store(Arc::clone(&storage)).await;

        store.add_item(item(1, dec!(4.00), 1)).await;
        assert_eq!(storage.load().await.unwrap().len(), 1);

        store.remove_item(ProductId::new(1)).await;
        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_optimistic_update_survives_backend_failure() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_cart_writes(true);
        let store = CartStore::open(
            CartOwner::User(UserId::new(1)),
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::new(MemoryCartStorage::new()),
            rules(),
        )
        .await
        .unwrap();

        let status = store.add_item(item(1, dec!(10.00), 1)).await;
        assert_eq!(status, SyncStatus::Deferred);
        // Local state committed despite the failed remote write
        assert_eq!(store.item_count().await, 1);
        assert_eq!(store.pending_ops().await, 1);
    }

    #[tokio::test]
    async fn test_retry_pending_drains_on_recovered_backend() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_cart_writes(true);
        let store = CartStore::open(
            CartOwner::User(UserId::new(1)),
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::new(MemoryCartStorage::new()),
            rules(),
        )
        .await
        .unwrap();

        store.add_item(item(1, dec!(10.00), 1)).await;
        store.add_item(item(2, dec!(3.00), 2)).await;
        assert_eq!(store.pending_ops().await, 2);

        // Still failing: everything stays queued
        assert_eq!(store.retry_pending().await, 2);

        backend.fail_cart_writes(false);
        assert_eq!(store.retry_pending().await, 0);
        assert_eq!(backend.server_cart(UserId::new(1)).len(), 2);
    }

    #[tokio::test]
    async fn test_clear_uses_single_atomic_call() {
        let backend = Arc::new(FakeBackend::new());
        let store = CartStore::open(
            CartOwner::User(UserId::new(1)),
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::new(MemoryCartStorage::new()),
            rules(),
        )
        .await
        .unwrap();

        store.add_item(item(1, dec!(10.00), 2)).await;
        store.add_item(item(2, dec!(5.50), 1)).await;
        store.clear().await;

        assert!(store.items().await.is_empty());
        assert_eq!(backend.clear_calls(), 1);
        assert!(backend.server_cart(UserId::new(1)).is_empty());
    }

    #[tokio::test]
    async fn test_merge_adds_quantities() {
        let backend = Arc::new(FakeBackend::new());
        let storage = Arc::new(MemoryCartStorage::new());
        let user = UserId::new(5);

        // Authenticated cart already holds 3 of p1
        backend.seed_server_cart(user, vec![item(1, dec!(10.00), 3)]);
        // Anonymous cart holds 1 of p1 and 2 of p2
        storage
            .save(&[item(1, dec!(10.00), 1), item(2, dec!(5.50), 2)])
            .await
            .unwrap();

        let (store, report) = CartStore::merge_on_login(
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::clone(&storage) as Arc<dyn AnonymousCartStorage>,
            rules(),
            user,
        )
        .await
        .unwrap();

        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed, 0);
        assert!(report.cleaned);
        assert!(!storage.has_entry());

        let items = store.items().await;
        let p1 = items
            .iter()
            .find(|line| line.product_id == ProductId::new(1))
            .unwrap();
        assert_eq!(p1.quantity, 4);
        assert_eq!(store.owner(), CartOwner::User(user));
    }

    #[tokio::test]
    async fn test_merge_partial_failure_keeps_anonymous_store() {
        let backend = Arc::new(FakeBackend::new());
        let storage = Arc::new(MemoryCartStorage::new());
        let user = UserId::new(5);

        storage
            .save(&[item(1, dec!(10.00), 1), item(2, dec!(5.50), 2)])
            .await
            .unwrap();
        backend.fail_upserts_for_product(ProductId::new(2));

        let (_store, report) = CartStore::merge_on_login(
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::clone(&storage) as Arc<dyn AnonymousCartStorage>,
            rules(),
            user,
        )
        .await
        .unwrap();

        // One item migrated, one failed, cleanup blocked
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.cleaned);
        assert_eq!(storage.load().await.unwrap().len(), 2);

        // The server cart is still the in-memory truth
        assert_eq!(backend.server_cart(user).len(), 1);
    }

    #[tokio::test]
    async fn test_merge_retry_after_partial_failure_completes() {
        let backend = Arc::new(FakeBackend::new());
        let storage = Arc::new(MemoryCartStorage::new());
        let user = UserId::new(5);

        storage
            .save(&[item(1, dec!(10.00), 1), item(2, dec!(5.50), 2)])
            .await
            .unwrap();
        backend.fail_upserts_for_product(ProductId::new(2));

        let (_store, report) = CartStore::merge_on_login(
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::clone(&storage) as Arc<dyn AnonymousCartStorage>,
            rules(),
            user,
        )
        .await
        .unwrap();
        assert_eq!(report.failed, 1);
        assert!(!report.cleaned);

        // Next login retries the whole anonymous cart
        backend.clear_upsert_failures();
        let (store, report) = CartStore::merge_on_login(
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::clone(&storage) as Arc<dyn AnonymousCartStorage>,
            rules(),
            user,
        )
        .await
        .unwrap();

        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed, 0);
        assert!(report.cleaned);
        assert!(!storage.has_entry());

        // The item that migrated on the first pass was upserted again, so
        // its server quantity covers both passes
        let items = store.items().await;
        let p1 = items
            .iter()
            .find(|line| line.product_id == ProductId::new(1))
            .unwrap();
        assert_eq!(p1.quantity, 2);
        let p2 = items
            .iter()
            .find(|line| line.product_id == ProductId::new(2))
            .unwrap();
        assert_eq!(p2.quantity, 2);
    }

    #[tokio::test]
    async fn test_merge_empty_anonymous_cart() {
        let backend = Arc::new(FakeBackend::new());
        let storage = Arc::new(MemoryCartStorage::new());
        let user = UserId::new(5);
        backend.seed_server_cart(user, vec![item(9, dec!(1.00), 1)]);

        let (store, report) = CartStore::merge_on_login(
            Arc::clone(&backend) as Arc<dyn CartBackend>,
            Arc::clone(&storage) as Arc<dyn AnonymousCartStorage>,
            rules(),
            user,
        )
        .await
        .unwrap();

        assert_eq!(report.migrated, 0);
        assert_eq!(report.failed, 0);
        assert!(!report.cleaned);
        assert_eq!(store.item_count().await, 1);
    }
}
