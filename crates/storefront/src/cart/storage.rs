//! Anonymous cart persistence.
//!
//! An anonymous shopper's cart lives client-side only, serialized as a JSON
//! array under a fixed key. In the HTTP layer that client-side state is the
//! session ([`SessionCartStorage`]); tests use [`MemoryCartStorage`]. The
//! key and the array shape are part of the contract: the merge protocol
//! reads and deletes exactly this entry.

use async_trait::async_trait;
use thiserror::Error;
use tower_sessions::Session;

use vitrina_core::CartItem;

/// Fixed storage key for the anonymous cart.
pub const ANON_CART_KEY: &str = "carrito";

/// Errors from the anonymous cart store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying session store failed.
    #[error("session storage error: {0}")]
    Session(String),
}

/// Client-local persistence for the anonymous cart.
#[async_trait]
pub trait AnonymousCartStorage: Send + Sync {
    /// Load the stored items; an absent entry is an empty cart.
    async fn load(&self) -> Result<Vec<CartItem>, StorageError>;

    /// Replace the stored items.
    async fn save(&self, items: &[CartItem]) -> Result<(), StorageError>;

    /// Delete the stored entry entirely.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Session-backed anonymous cart storage.
#[derive(Clone)]
pub struct SessionCartStorage {
    session: Session,
}

impl SessionCartStorage {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl AnonymousCartStorage for SessionCartStorage {
    async fn load(&self) -> Result<Vec<CartItem>, StorageError> {
        let items = self
            .session
            .get::<Vec<CartItem>>(ANON_CART_KEY)
            .await
            .map_err(|e| StorageError::Session(e.to_string()))?;
        Ok(items.unwrap_or_default())
    }

    async fn save(&self, items: &[CartItem]) -> Result<(), StorageError> {
        self.session
            .insert(ANON_CART_KEY, items)
            .await
            .map_err(|e| StorageError::Session(e.to_string()))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.session
            .remove::<Vec<CartItem>>(ANON_CART_KEY)
            .await
            .map_err(|e| StorageError::Session(e.to_string()))?;
        Ok(())
    }
}

/// In-memory anonymous cart storage for tests and tooling.
#[derive(Default)]
pub struct MemoryCartStorage {
    items: std::sync::Mutex<Option<Vec<CartItem>>>,
}

impl MemoryCartStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entry exists at all (an empty saved cart still counts).
    pub fn has_entry(&self) -> bool {
        self.items
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl AnonymousCartStorage for MemoryCartStorage {
    async fn load(&self) -> Result<Vec<CartItem>, StorageError> {
        let guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Session(e.to_string()))?;
        Ok(guard.clone().unwrap_or_default())
    }

    async fn save(&self, items: &[CartItem]) -> Result<(), StorageError> {
        let mut guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Session(e.to_string()))?;
        *guard = Some(items.to_vec());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Session(e.to_string()))?;
        *guard = None;
        Ok(())
    }
}
