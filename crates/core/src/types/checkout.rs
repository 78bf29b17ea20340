//! Checkout and payment data carried between the storefront and the
//! payment gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::id::{CheckoutSessionId, UserId};

/// Shipping address entered for one checkout attempt.
///
/// All fields except `notes` are required; validation happens through
/// [`missing_fields`](Self::missing_fields) so each unmet field can be
/// named to the shopper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub surname: String,
    pub street: String,
    pub phone: String,
    /// National identification number (cedula).
    pub national_id: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    /// Optional free-text delivery notes.
    #[serde(default)]
    pub notes: Option<String>,
}

impl ShippingAddress {
    /// Names of required fields that are empty or whitespace-only.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required: [(&'static str, &str); 8] = [
            ("name", &self.name),
            ("surname", &self.surname),
            ("street", &self.street),
            ("phone", &self.phone),
            ("national_id", &self.national_id),
            ("city", &self.city),
            ("province", &self.province),
            ("postal_code", &self.postal_code),
        ];
        required
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| field)
            .collect()
    }

    /// Whether every required field is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Billing address. Same shape and validation rules as the shipping
/// address; kept as a distinct type so the two cannot be swapped by
/// accident.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingAddress {
    pub name: String,
    pub surname: String,
    pub street: String,
    pub phone: String,
    pub national_id: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl BillingAddress {
    /// Names of required fields that are empty or whitespace-only.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required: [(&'static str, &str); 8] = [
            ("name", &self.name),
            ("surname", &self.surname),
            ("street", &self.street),
            ("phone", &self.phone),
            ("national_id", &self.national_id),
            ("city", &self.city),
            ("province", &self.province),
            ("postal_code", &self.postal_code),
        ];
        required
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| field)
            .collect()
    }

    /// Derive a billing address from a shipping address (the common case
    /// where the shopper bills to the delivery address).
    #[must_use]
    pub fn from_shipping(shipping: &ShippingAddress) -> Self {
        Self {
            name: shipping.name.clone(),
            surname: shipping.surname.clone(),
            street: shipping.street.clone(),
            phone: shipping.phone.clone(),
            national_id: shipping.national_id.clone(),
            city: shipping.city.clone(),
            province: shipping.province.clone(),
            postal_code: shipping.postal_code.clone(),
            notes: shipping.notes.clone(),
        }
    }
}

/// Identity of the shopper starting a payment.
///
/// `user_id` is `None` for guest checkouts; the gateway still receives the
/// rest of the customer block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub user_id: Option<UserId>,
    pub email: String,
    pub given_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub surname: String,
    pub phone: String,
    /// National identification number (cedula).
    pub national_id: String,
}

/// One payment attempt at the gateway.
///
/// Immutable once issued; retrying a payment always mints a new session
/// with a fresh id, never reuses an old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Opaque, gateway-issued session identifier.
    pub id: CheckoutSessionId,
    /// Amount submitted to the gateway.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
    /// When the session was created locally.
    pub created_at: DateTime<Utc>,
}

/// Final disposition of a payment session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub session_id: CheckoutSessionId,
    /// Gateway result code, e.g. "000.100.110".
    pub result_code: String,
    /// Gateway's human-readable description of the result.
    pub result_description: String,
    pub succeeded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_address() -> ShippingAddress {
        ShippingAddress {
            name: "Maria".to_string(),
            surname: "Andrade".to_string(),
            street: "Av. Amazonas N24-03".to_string(),
            phone: "0991234567".to_string(),
            national_id: "1712345678".to_string(),
            city: "Quito".to_string(),
            province: "Pichincha".to_string(),
            postal_code: "170150".to_string(),
            notes: None,
        }
    }

    #[test]
    fn test_complete_address_has_no_missing_fields() {
        assert!(complete_address().missing_fields().is_empty());
        assert!(complete_address().is_complete());
    }

    #[test]
    fn test_missing_fields_are_named() {
        let mut address = complete_address();
        address.city = String::new();
        address.phone = "   ".to_string();
        let missing = address.missing_fields();
        assert_eq!(missing, vec!["phone", "city"]);
        assert!(!address.is_complete());
    }

    #[test]
    fn test_notes_are_optional() {
        let mut address = complete_address();
        address.notes = Some("dejar en porteria".to_string());
        assert!(address.is_complete());
    }

    #[test]
    fn test_billing_from_shipping() {
        let shipping = complete_address();
        let billing = BillingAddress::from_shipping(&shipping);
        assert_eq!(billing.name, shipping.name);
        assert_eq!(billing.national_id, shipping.national_id);
        assert!(billing.missing_fields().is_empty());
    }
}
