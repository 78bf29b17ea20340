//! Checkout orchestration.
//!
//! One orchestrator instance is one checkout attempt. It owns the attempt's
//! state machine and translates the cart, addresses, and customer identity
//! into a single gateway session-creation request. The orchestrator is not
//! idempotent by design: every call mints a fresh merchant transaction id
//! and a fresh gateway session, so double-submit prevention belongs to the
//! caller.

pub mod payload;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{instrument, warn};
use uuid::Uuid;

use vitrina_core::{
    BillingAddress, CheckoutSession, CheckoutSessionId, CustomerIdentity, ShippingAddress,
};

use crate::backend::{BackendError, PaymentGateway};
use crate::cart::CartStore;
use crate::config::StoreRules;
use payload::{build_session_request, GATEWAY_CURRENCY};

/// Sentinel used when the client IP cannot be resolved; never a hard
/// failure.
const IP_SENTINEL: &str = "0.0.0.0";

/// States of one checkout attempt. All UI gating derives from this single
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutState {
    Idle,
    Validating,
    CreatingSession,
    /// The hosted payment widget can be rendered with this session.
    SessionReady(CheckoutSessionId),
    Reconciling,
    Succeeded,
    Failed { reason: String, retryable: bool },
}

/// Payment methods offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment through the Datafast hosted widget.
    Datafast,
}

/// Everything the shopper supplies for one attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutInput {
    pub shipping: ShippingAddress,
    /// Defaults to the shipping address when absent.
    #[serde(default)]
    pub billing: Option<BillingAddress>,
    pub customer: CustomerIdentity,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub terms_accepted: bool,
    /// Persist the shipping address to the profile after a successful
    /// attempt.
    #[serde(default)]
    pub save_address: bool,
}

/// Errors from one checkout attempt. The three validation variants are
/// deliberately distinct so each unmet precondition can be named to the
/// shopper.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("missing required address fields: {0}")]
    MissingAddressFields(String),

    #[error("no payment method selected")]
    NoPaymentMethod,

    #[error("terms and conditions not accepted")]
    TermsNotAccepted,

    #[error("checkout cancelled")]
    Cancelled,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CheckoutError {
    /// Whether the attempt may simply be restarted.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Cancellation handle for an in-flight session creation.
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Abort the attempt; the orchestrator returns
    /// [`CheckoutError::Cancelled`] and no session is minted afterwards.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// Observer side of a [`CancelHandle`].
#[derive(Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that can never fire; for callers without a cancel path.
    #[must_use]
    pub fn never() -> Self {
        let (_handle, token) = cancel_pair();
        token
    }

    /// Resolves when cancellation is requested; pends forever if the
    /// handle is gone without firing.
    async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                // Handle dropped without cancelling; nothing can fire now.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancel handle and token.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelToken { receiver })
}

/// Builds and submits the gateway session-creation request for one
/// attempt.
pub struct CheckoutOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    rules: StoreRules,
    state: Mutex<CheckoutState>,
}

impl CheckoutOrchestrator {
    #[must_use]
    pub fn new(gateway: Arc<dyn PaymentGateway>, rules: StoreRules) -> Self {
        Self {
            gateway,
            rules,
            state: Mutex::new(CheckoutState::Idle),
        }
    }

    /// Current state of the attempt.
    pub async fn state(&self) -> CheckoutState {
        self.state.lock().await.clone()
    }

    async fn set_state(&self, state: CheckoutState) {
        *self.state.lock().await = state;
    }

    /// Validate the three independent gates, each with its own error.
    fn validate(input: &CheckoutInput) -> Result<(), CheckoutError> {
        let mut missing = input.shipping.missing_fields();
        if let Some(billing) = &input.billing {
            for field in billing.missing_fields() {
                if !missing.contains(&field) {
                    missing.push(field);
                }
            }
        }
        if !missing.is_empty() {
            return Err(CheckoutError::MissingAddressFields(missing.join(", ")));
        }
        if input.payment_method.is_none() {
            return Err(CheckoutError::NoPaymentMethod);
        }
        if !input.terms_accepted {
            return Err(CheckoutError::TermsNotAccepted);
        }
        Ok(())
    }

    /// Run one attempt: validate, resolve the client IP, build the
    /// payload, and submit it. At most one session id is produced per
    /// invocation.
    ///
    /// # Errors
    ///
    /// Validation errors never reach the network layer and leave the
    /// attempt in `Idle`. Gateway and transport errors move it to
    /// `Failed` and may be retried with a fresh call.
    #[instrument(skip_all)]
    pub async fn create_session(
        &self,
        cart: &CartStore,
        input: &CheckoutInput,
        mut cancel: CancelToken,
    ) -> Result<CheckoutSession, CheckoutError> {
        self.set_state(CheckoutState::Validating).await;
        if let Err(e) = Self::validate(input) {
            // Validation blocks locally; the attempt can restart at once.
            self.set_state(CheckoutState::Idle).await;
            return Err(e);
        }

        self.set_state(CheckoutState::CreatingSession).await;
        let result = tokio::select! {
            // An already-requested cancel must win before any request
            // leaves the process.
            biased;
            () = cancel.cancelled() => {
                self.set_state(CheckoutState::Idle).await;
                return Err(CheckoutError::Cancelled);
            }
            result = self.submit(cart, input) => result,
        };

        match result {
            Ok(session) => {
                self.set_state(CheckoutState::SessionReady(session.id.clone()))
                    .await;
                self.save_address_if_requested(input).await;
                Ok(session)
            }
            Err(e) => {
                self.set_state(CheckoutState::Failed {
                    reason: e.to_string(),
                    retryable: true,
                })
                .await;
                Err(CheckoutError::Backend(e))
            }
        }
    }

    async fn submit(
        &self,
        cart: &CartStore,
        input: &CheckoutInput,
    ) -> Result<CheckoutSession, BackendError> {
        let client_ip = match self.gateway.client_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Client IP lookup failed, using sentinel: {e}");
                IP_SENTINEL.to_string()
            }
        };

        let items = cart.items().await;
        let totals = cart.totals().await;
        let billing = input
            .billing
            .clone()
            .unwrap_or_else(|| BillingAddress::from_shipping(&input.shipping));
        // Unique per attempt; a retry always gets a new transaction id.
        let merchant_tx_id = Uuid::new_v4().to_string();

        let request = build_session_request(
            &input.customer,
            &input.shipping,
            &billing,
            &items,
            totals,
            self.rules.shipping_cost,
            &client_ip,
            &merchant_tx_id,
        );

        let session_id = self.gateway.create_session(&request).await?;
        Ok(CheckoutSession {
            id: session_id,
            amount: vitrina_core::round_money(totals.total + self.rules.shipping_cost),
            currency: GATEWAY_CURRENCY.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Best-effort profile persistence; only after a session exists, never
    /// a precondition.
    async fn save_address_if_requested(&self, input: &CheckoutInput) {
        if !input.save_address {
            return;
        }
        let Some(user) = input.customer.user_id else {
            return;
        };
        if let Err(e) = self.gateway.save_address(user, &input.shipping).await {
            warn!("Failed to save address to profile: {e}");
        }
    }
}
