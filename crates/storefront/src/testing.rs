//! In-memory fake collaborators for unit tests.
//!
//! `FakeBackend` stands in for the backend API proxy behind the
//! [`CartBackend`](crate::backend::CartBackend) and
//! [`PaymentGateway`](crate::backend::PaymentGateway) seams, with switches
//! to inject the failure modes the services must tolerate.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use vitrina_core::{CartItem, CheckoutSessionId, ProductId, ShippingAddress, UserId};

use crate::backend::types::{GatewayResult, PaymentRecord};
use crate::backend::{BackendError, CartBackend, PaymentGateway, SessionRequest};

fn unavailable() -> BackendError {
    BackendError::Api {
        status: 503,
        message: "backend unavailable".to_string(),
    }
}

#[derive(Default)]
pub struct FakeBackend {
    carts: Mutex<HashMap<i32, Vec<CartItem>>>,
    fail_cart_writes: AtomicBool,
    fail_products: Mutex<Vec<ProductId>>,
    clear_calls: AtomicUsize,

    next_session_id: Mutex<Option<String>>,
    create_session_calls: AtomicUsize,
    session_payloads: Mutex<Vec<SessionRequest>>,
    result: Mutex<Option<GatewayResult>>,
    consult_calls: AtomicUsize,
    consult_gate: Mutex<Option<(CheckoutSessionId, std::sync::Arc<Notify>)>>,
    registered: Mutex<Vec<PaymentRecord>>,
    client_ip: Mutex<Option<String>>,
    saved_addresses: Mutex<Vec<(UserId, ShippingAddress)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        *backend.next_session_id.lock().unwrap() = Some("FAKE-SESSION-1".to_string());
        *backend.client_ip.lock().unwrap() = Some("203.0.113.7".to_string());
        backend
    }

    // ---- cart-side controls ----

    pub fn fail_cart_writes(&self, fail: bool) {
        self.fail_cart_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts_for_product(&self, product: ProductId) {
        self.fail_products.lock().unwrap().push(product);
    }

    pub fn clear_upsert_failures(&self) {
        self.fail_products.lock().unwrap().clear();
    }

    pub fn seed_server_cart(&self, user: UserId, items: Vec<CartItem>) {
        self.carts.lock().unwrap().insert(user.as_i32(), items);
    }

    pub fn server_cart(&self, user: UserId) -> Vec<CartItem> {
        self.carts
            .lock()
            .unwrap()
            .get(&user.as_i32())
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    // ---- gateway-side controls ----

    /// Session id the next `create_session` returns; `None` simulates a
    /// gateway response with no id.
    pub fn set_next_session_id(&self, id: Option<&str>) {
        *self.next_session_id.lock().unwrap() = id.map(str::to_string);
    }

    pub fn set_result(&self, code: &str, description: &str) {
        *self.result.lock().unwrap() = Some(GatewayResult {
            code: code.to_string(),
            description: description.to_string(),
        });
    }

    /// `None` makes `client_ip` fail, exercising the sentinel fallback.
    pub fn set_client_ip(&self, ip: Option<&str>) {
        *self.client_ip.lock().unwrap() = ip.map(str::to_string);
    }

    pub fn create_session_calls(&self) -> usize {
        self.create_session_calls.load(Ordering::SeqCst)
    }

    pub fn consult_calls(&self) -> usize {
        self.consult_calls.load(Ordering::SeqCst)
    }

    /// Hold the next consult for `session` until the returned handle is
    /// notified. The call count still increments before blocking.
    pub fn gate_consult(&self, session: &CheckoutSessionId) -> std::sync::Arc<Notify> {
        let notify = std::sync::Arc::new(Notify::new());
        *self.consult_gate.lock().unwrap() =
            Some((session.clone(), std::sync::Arc::clone(&notify)));
        notify
    }

    pub fn session_payloads(&self) -> Vec<SessionRequest> {
        self.session_payloads.lock().unwrap().clone()
    }

    pub fn registered_payments(&self) -> Vec<PaymentRecord> {
        self.registered.lock().unwrap().clone()
    }

    pub fn saved_addresses(&self) -> Vec<(UserId, ShippingAddress)> {
        self.saved_addresses.lock().unwrap().clone()
    }

    fn check_cart_write(&self, product: Option<ProductId>) -> Result<(), BackendError> {
        if self.fail_cart_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        if let Some(product) = product {
            if self.fail_products.lock().unwrap().contains(&product) {
                return Err(unavailable());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CartBackend for FakeBackend {
    async fn upsert_item(&self, user: UserId, item: &CartItem) -> Result<(), BackendError> {
        self.check_cart_write(Some(item.product_id))?;
        let mut carts = self.carts.lock().unwrap();
        let cart = carts.entry(user.as_i32()).or_default();
        match cart
            .iter_mut()
            .find(|line| line.product_id == item.product_id)
        {
            Some(line) => line.quantity = line.quantity.saturating_add(item.quantity),
            None => cart.push(item.clone()),
        }
        Ok(())
    }

    async fn set_quantity(
        &self,
        user: UserId,
        product: ProductId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        self.check_cart_write(Some(product))?;
        let mut carts = self.carts.lock().unwrap();
        if let Some(line) = carts
            .entry(user.as_i32())
            .or_default()
            .iter_mut()
            .find(|line| line.product_id == product)
        {
            line.quantity = quantity;
        }
        Ok(())
    }

    async fn remove_item(&self, user: UserId, product: ProductId) -> Result<(), BackendError> {
        self.check_cart_write(Some(product))?;
        let mut carts = self.carts.lock().unwrap();
        carts
            .entry(user.as_i32())
            .or_default()
            .retain(|line| line.product_id != product);
        Ok(())
    }

    async fn fetch_cart(&self, user: UserId) -> Result<Vec<CartItem>, BackendError> {
        Ok(self.server_cart(user))
    }

    async fn clear_cart(&self, user: UserId) -> Result<(), BackendError> {
        self.check_cart_write(None)?;
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.carts.lock().unwrap().remove(&user.as_i32());
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FakeBackend {
    async fn create_session(
        &self,
        payload: &SessionRequest,
    ) -> Result<CheckoutSessionId, BackendError> {
        self.create_session_calls.fetch_add(1, Ordering::SeqCst);
        self.session_payloads.lock().unwrap().push(payload.clone());
        match self
            .next_session_id
            .lock()
            .unwrap()
            .clone()
            .map(CheckoutSessionId::new)
        {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(BackendError::MissingSessionId),
        }
    }

    async fn consult_result(
        &self,
        session: &CheckoutSessionId,
    ) -> Result<GatewayResult, BackendError> {
        self.consult_calls.fetch_add(1, Ordering::SeqCst);
        let gate = {
            let mut gate = self.consult_gate.lock().unwrap();
            match gate.take() {
                Some((gated, notify)) if gated == *session => Some(notify),
                other => {
                    *gate = other;
                    None
                }
            }
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(unavailable)
    }

    async fn register_payment(&self, record: &PaymentRecord) -> Result<(), BackendError> {
        self.registered.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn client_ip(&self) -> Result<String, BackendError> {
        self.client_ip
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(unavailable)
    }

    async fn save_address(
        &self,
        user: UserId,
        address: &ShippingAddress,
    ) -> Result<(), BackendError> {
        self.saved_addresses
            .lock()
            .unwrap()
            .push((user, address.clone()));
        Ok(())
    }
}
