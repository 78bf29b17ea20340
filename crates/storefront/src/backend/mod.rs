//! Backend API proxy client.
//!
//! The storefront never talks to the Datafast gateway directly; every
//! gateway interaction goes through the backend proxy, which also owns the
//! server-side cart and the persisted payment records. This module provides
//! the `reqwest` client for that REST surface and the seam traits
//! ([`CartBackend`], [`PaymentGateway`]) the cart store, checkout
//! orchestrator, and reconciliation service are written against.

pub mod types;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use vitrina_core::{CartItem, CheckoutSessionId, ProductId, ShippingAddress, UserId};

use crate::config::BackendConfig;
use types::{
    CartClearRequest, CartQuantityRequest, CartUpsertRequest, CheckoutSessionResponse,
    ClientIpResponse, ConsultResultResponse, GatewayResult, PaymentRecord, SaveAddressRequest,
    ServerCartLine,
};

/// Flat key-value payload for gateway session creation, as built by the
/// checkout orchestrator (`customer.givenName`, `cart.items[0].name`, ...).
pub type SessionRequest = std::collections::BTreeMap<String, String>;

/// Errors that can occur when talking to the backend proxy.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response body.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Session creation response carried no usable session id.
    #[error("checkout response contained no session id")]
    MissingSessionId,
}

/// Server-side cart operations, keyed by authenticated user.
#[async_trait]
pub trait CartBackend: Send + Sync {
    /// Additive upsert: quantities accumulate on repeated calls for the
    /// same product.
    async fn upsert_item(&self, user: UserId, item: &CartItem) -> Result<(), BackendError>;

    /// Set the quantity of an existing line.
    async fn set_quantity(
        &self,
        user: UserId,
        product: ProductId,
        quantity: u32,
    ) -> Result<(), BackendError>;

    /// Remove one line.
    async fn remove_item(&self, user: UserId, product: ProductId) -> Result<(), BackendError>;

    /// Fetch the full server-side cart.
    async fn fetch_cart(&self, user: UserId) -> Result<Vec<CartItem>, BackendError>;

    /// Atomic clear of the whole cart (single call, not N deletes).
    async fn clear_cart(&self, user: UserId) -> Result<(), BackendError>;
}

/// Gateway operations proxied by the backend.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment session; returns the gateway-issued id.
    async fn create_session(
        &self,
        payload: &SessionRequest,
    ) -> Result<CheckoutSessionId, BackendError>;

    /// Consult the final disposition of a session.
    async fn consult_result(
        &self,
        session: &CheckoutSessionId,
    ) -> Result<GatewayResult, BackendError>;

    /// Persist the final payment record.
    async fn register_payment(&self, record: &PaymentRecord) -> Result<(), BackendError>;

    /// Resolve the shopper's public IP; best-effort input to session
    /// creation.
    async fn client_ip(&self) -> Result<String, BackendError>;

    /// Save an address to the user's profile (side effect of a successful
    /// attempt, never a precondition).
    async fn save_address(
        &self,
        user: UserId,
        address: &ShippingAddress,
    ) -> Result<(), BackendError>;
}

/// Client for the backend API proxy.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Create a new backend client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let value = format!("Bearer {}", api_key.expose_secret());
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&value)
                    .map_err(|e| BackendError::Parse(format!("Invalid API key format: {e}")))?,
            );
        }

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Turn a non-success response into `BackendError::Api`.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::check_status(response).await
    }
}

#[async_trait]
impl CartBackend for BackendClient {
    #[instrument(skip(self, item), fields(user = %user, product = %item.product_id))]
    async fn upsert_item(&self, user: UserId, item: &CartItem) -> Result<(), BackendError> {
        self.post_json("/api/cart/add", &CartUpsertRequest::new(user, item))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user = %user, product = %product))]
    async fn set_quantity(
        &self,
        user: UserId,
        product: ProductId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        let body = CartQuantityRequest {
            id_usuario: user.as_i32(),
            cantidad: quantity,
        };
        let response = self
            .client
            .put(self.url(&format!("/api/cart/update/{product}")))
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user = %user, product = %product))]
    async fn remove_item(&self, user: UserId, product: ProductId) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.url(&format!("/api/cart/remove/{product}")))
            .query(&[("id_usuario", user.as_i32())])
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user = %user))]
    async fn fetch_cart(&self, user: UserId) -> Result<Vec<CartItem>, BackendError> {
        let response = self
            .client
            .get(self.url("/api/cart"))
            .query(&[("id_usuario", user.as_i32())])
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let lines: Vec<ServerCartLine> = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(lines.into_iter().map(CartItem::from).collect())
    }

    #[instrument(skip(self), fields(user = %user))]
    async fn clear_cart(&self, user: UserId) -> Result<(), BackendError> {
        self.post_json(
            "/api/carrito/vaciar",
            &CartClearRequest {
                id_usuario: user.as_i32(),
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for BackendClient {
    #[instrument(skip(self, payload))]
    async fn create_session(
        &self,
        payload: &SessionRequest,
    ) -> Result<CheckoutSessionId, BackendError> {
        let response = self.post_json("/api/checkout", payload).await?;

        let body: CheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        match body.id.map(CheckoutSessionId::new) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(BackendError::MissingSessionId),
        }
    }

    #[instrument(skip(self), fields(session = %session))]
    async fn consult_result(
        &self,
        session: &CheckoutSessionId,
    ) -> Result<GatewayResult, BackendError> {
        let response = self
            .client
            .get(self.url("/api/checkout/resultado"))
            .query(&[("id", session.as_str())])
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: ConsultResultResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(body.result)
    }

    #[instrument(skip(self, record), fields(session = %record.resource_path))]
    async fn register_payment(&self, record: &PaymentRecord) -> Result<(), BackendError> {
        self.post_json("/api/procesar-pago", record).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn client_ip(&self) -> Result<String, BackendError> {
        let response = self.client.get(self.url("/api/cliente-ip")).send().await?;
        let response = Self::check_status(response).await?;

        let body: ClientIpResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(body.ip)
    }

    #[instrument(skip(self, address), fields(user = %user))]
    async fn save_address(
        &self,
        user: UserId,
        address: &ShippingAddress,
    ) -> Result<(), BackendError> {
        let body = SaveAddressRequest {
            id_usuario: user.as_i32(),
            nombre: address.name.clone(),
            apellido: address.surname.clone(),
            direccion: address.street.clone(),
            telefono: address.phone.clone(),
            cedula: address.national_id.clone(),
            ciudad: address.city.clone(),
            provincia: address.province.clone(),
            codigo_postal: address.postal_code.clone(),
            notas: address.notes.clone(),
        };
        self.post_json("/api/direccion/guardar", &body).await?;
        Ok(())
    }
}
