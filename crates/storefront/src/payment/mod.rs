//! Payment result reconciliation.
//!
//! After the hosted widget redirects back, the gateway must be consulted
//! exactly once per session for side effects: clearing the cart and
//! registering the payment record. Redirect handlers fire more than once
//! in practice (reloads, double navigation), so the service keeps a record
//! of every session it has already settled and replays the stored outcome
//! instead of repeating the side effects.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use vitrina_core::{CheckoutSessionId, PaymentOutcome, UserId};

use crate::backend::types::PaymentRecord;
use crate::backend::{BackendError, PaymentGateway};
use crate::cart::CartStore;

/// Result-code prefixes the gateway documents as successful. Everything
/// else is a decline or an error.
pub const SUCCESS_CODE_PREFIXES: [&str; 4] = ["000.000.", "000.100.1", "000.3", "000.6"];

/// Whether a gateway result code denotes a successful payment.
#[must_use]
pub fn is_success_code(code: &str) -> bool {
    SUCCESS_CODE_PREFIXES
        .iter()
        .any(|prefix| code.starts_with(prefix))
}

/// The shopper a reconciliation runs on behalf of.
#[derive(Debug, Clone)]
pub struct Shopper {
    pub user_id: Option<UserId>,
    pub email: String,
}

/// One session's settlement slot. `None` until the session settles, then
/// the outcome every later call replays.
type SessionSlot = Arc<Mutex<Option<PaymentOutcome>>>;

/// Settles payment sessions exactly once each.
pub struct ReconciliationService {
    gateway: Arc<dyn PaymentGateway>,
    /// One slot per session. The outer lock is held only long enough to
    /// find or create a slot; the slot's own lock is what serializes
    /// concurrent calls for the same session, so reconciliations of
    /// different sessions proceed independently.
    sessions: Mutex<HashMap<CheckoutSessionId, SessionSlot>>,
}

impl ReconciliationService {
    #[must_use]
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            gateway,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Consult the gateway for a session's result and apply its side
    /// effects. Calling again for the same session returns the stored
    /// outcome without consulting, clearing, or recording anything.
    ///
    /// On success the cart is emptied and the record carries `esExitoso`
    /// as 1; on a decline the cart is untouched and the record carries 0.
    /// Record registration is best-effort either way.
    ///
    /// # Errors
    ///
    /// Returns an error when the gateway consult itself fails; nothing is
    /// recorded and a later call will consult again.
    #[instrument(skip(self, cart), fields(session = %session_id))]
    pub async fn reconcile(
        &self,
        session_id: &CheckoutSessionId,
        shopper: &Shopper,
        cart: &CartStore,
    ) -> Result<PaymentOutcome, BackendError> {
        let slot = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(sessions.entry(session_id.clone()).or_default())
        };
        let mut settled = slot.lock().await;
        if let Some(outcome) = settled.as_ref() {
            info!("Session already settled, replaying outcome");
            return Ok(outcome.clone());
        }

        let result = self.gateway.consult_result(session_id).await?;
        let succeeded = is_success_code(&result.code);

        if succeeded {
            cart.clear().await;
        }

        let record = PaymentRecord {
            resource_path: session_id.as_str().to_string(),
            estado_pago: result.description.clone(),
            codigo_pago: result.code.clone(),
            es_exitoso: u8::from(succeeded),
            usuario_correo: shopper.email.clone(),
        };
        if let Err(e) = self.gateway.register_payment(&record).await {
            warn!("Failed to register payment record: {e}");
        }

        let outcome = PaymentOutcome {
            session_id: session_id.clone(),
            result_code: result.code,
            result_description: result.description,
            succeeded,
        };
        *settled = Some(outcome.clone());
        Ok(outcome)
    }
}
