//! Application state shared across handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use vitrina_core::UserId;

use crate::backend::{BackendClient, BackendError};
use crate::cart::storage::MemoryCartStorage;
use crate::cart::{CartOwner, CartStore};
use crate::config::{StoreRules, StorefrontConfig};
use crate::payment::ReconciliationService;

/// Owns the long-lived cart state the HTTP layer needs across requests.
///
/// Authenticated carts are cached per user so optimistic state and the
/// deferred-write queue survive between requests; anonymous carts are
/// rebuilt per request from the session. The lock registry orders
/// concurrent mutations of the same cart, since an anonymous store's
/// internal mutex only lives for one request.
pub struct CartService {
    backend: Arc<BackendClient>,
    rules: StoreRules,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    user_carts: Mutex<HashMap<i32, Arc<CartStore>>>,
}

impl CartService {
    fn new(backend: Arc<BackendClient>, rules: StoreRules) -> Self {
        Self {
            backend,
            rules,
            locks: Mutex::new(HashMap::new()),
            user_carts: Mutex::new(HashMap::new()),
        }
    }

    /// The serialization lock for one cart owner, created on first use.
    ///
    /// Keys come from [`CartOwner::lock_key`]. Entries are never evicted;
    /// the key space is bounded by active sessions and users.
    pub async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// The cached cart store for an authenticated user, opened from the
    /// server-side cart on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the server-side cart cannot be fetched.
    pub async fn user_cart(&self, user: UserId) -> Result<Arc<CartStore>, BackendError> {
        let mut carts = self.user_carts.lock().await;
        if let Some(store) = carts.get(&user.as_i32()) {
            return Ok(Arc::clone(store));
        }

        // A user-owned store never touches the anonymous storage, so an
        // inert in-memory one satisfies the constructor.
        let store = Arc::new(
            CartStore::open(
                CartOwner::User(user),
                Arc::clone(&self.backend) as _,
                Arc::new(MemoryCartStorage::new()),
                self.rules,
            )
            .await?,
        );
        carts.insert(user.as_i32(), Arc::clone(&store));
        Ok(store)
    }

    /// Replace the cached store for a user, after a login merge produced a
    /// fresh one.
    pub async fn install_user_cart(&self, user: UserId, store: Arc<CartStore>) {
        self.user_carts.lock().await.insert(user.as_i32(), store);
    }

    /// Drop the cached store on logout.
    pub async fn evict_user_cart(&self, user: UserId) {
        self.user_carts.lock().await.remove(&user.as_i32());
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like the backend client and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    backend: Arc<BackendClient>,
    carts: CartService,
    reconciliation: ReconciliationService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend HTTP client cannot be built.
    pub fn new(config: StorefrontConfig) -> Result<Self, BackendError> {
        let backend = Arc::new(BackendClient::new(&config.backend)?);
        let carts = CartService::new(Arc::clone(&backend), config.rules);
        let reconciliation = ReconciliationService::new(Arc::clone(&backend) as _);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                backend,
                carts,
                reconciliation,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the backend API client.
    #[must_use]
    pub fn backend(&self) -> &Arc<BackendClient> {
        &self.inner.backend
    }

    /// Get a reference to the cart service.
    #[must_use]
    pub fn carts(&self) -> &CartService {
        &self.inner.carts
    }

    /// Get a reference to the payment reconciliation service.
    #[must_use]
    pub fn reconciliation(&self) -> &ReconciliationService {
        &self.inner.reconciliation
    }
}
