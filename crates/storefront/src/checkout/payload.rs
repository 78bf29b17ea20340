//! Gateway session-request payload.
//!
//! Datafast takes a flat key-value form (`customer.givenName`,
//! `cart.items[0].price`, ...). The builder here produces that map from
//! the domain types; the backend proxy forwards it verbatim, adding only
//! its own credentials.

use rust_decimal::Decimal;

use vitrina_core::{
    format_amount, round_money, BillingAddress, CartItem, CartTotals, CustomerIdentity,
    ShippingAddress,
};

use crate::backend::SessionRequest;

/// Country for all address blocks; fixed for this deployment.
pub const GATEWAY_COUNTRY: &str = "EC";

/// Currency for all payment sessions.
pub const GATEWAY_CURRENCY: &str = "USD";

/// Datafast payment type for an immediate debit.
const PAYMENT_TYPE: &str = "DB";

/// Fixed width the gateway requires for identification documents.
const IDENTIFICATION_DOC_WIDTH: usize = 10;

/// Left-pad a national identification number with zeros to the gateway's
/// fixed width. Longer values pass through unchanged.
#[must_use]
pub fn pad_national_id(national_id: &str) -> String {
    format!("{national_id:0>width$}", width = IDENTIFICATION_DOC_WIDTH)
}

/// Build the complete session-creation request.
///
/// `amount` is the cart total plus shipping, rounded at this step like
/// every other monetary value. `merchant_tx_id` must be unique per attempt;
/// the orchestrator mints a fresh UUID for each call.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn build_session_request(
    customer: &CustomerIdentity,
    shipping: &ShippingAddress,
    billing: &BillingAddress,
    items: &[CartItem],
    totals: CartTotals,
    shipping_cost: Decimal,
    client_ip: &str,
    merchant_tx_id: &str,
) -> SessionRequest {
    let mut request = SessionRequest::new();
    let mut put = |key: &str, value: String| {
        request.insert(key.to_string(), value);
    };

    put("amount", format_amount(totals.total + shipping_cost));
    put("currency", GATEWAY_CURRENCY.to_string());
    put("paymentType", PAYMENT_TYPE.to_string());
    put("merchantTransactionId", merchant_tx_id.to_string());

    // Customer block
    put("customer.givenName", customer.given_name.clone());
    if let Some(middle_name) = &customer.middle_name {
        put("customer.middleName", middle_name.clone());
    }
    put("customer.surname", customer.surname.clone());
    put("customer.ip", client_ip.to_string());
    put(
        "customer.merchantCustomerId",
        customer
            .user_id
            .map_or_else(|| "0".to_string(), |id| id.to_string()),
    );
    put("customer.email", customer.email.clone());
    put("customer.identificationDocType", "IDCARD".to_string());
    put(
        "customer.identificationDocId",
        pad_national_id(&customer.national_id),
    );
    put("customer.phone", customer.phone.clone());

    // Address blocks; country is fixed for this deployment
    put("billing.street1", billing.street.clone());
    put("billing.city", billing.city.clone());
    put("billing.state", billing.province.clone());
    put("billing.postcode", billing.postal_code.clone());
    put("billing.country", GATEWAY_COUNTRY.to_string());
    put("shipping.street1", shipping.street.clone());
    put("shipping.city", shipping.city.clone());
    put("shipping.state", shipping.province.clone());
    put("shipping.postcode", shipping.postal_code.clone());
    put("shipping.country", GATEWAY_COUNTRY.to_string());

    // Line items
    for (index, item) in items.iter().enumerate() {
        put(
            &format!("cart.items[{index}].name"),
            item.display_name.clone(),
        );
        put(
            &format!("cart.items[{index}].description"),
            item.display_name.clone(),
        );
        put(
            &format!("cart.items[{index}].price"),
            format_amount(item.unit_price),
        );
        put(
            &format!("cart.items[{index}].quantity"),
            format!("{}", item.quantity),
        );
    }

    // Tax breakdown: untaxed base (shipping), taxable base, and VAT
    put(
        "customParameters[SHOPPER_VAL_BASE0]",
        format_amount(round_money(shipping_cost)),
    );
    put(
        "customParameters[SHOPPER_VAL_BASEIMP]",
        format_amount(totals.subtotal),
    );
    put(
        "customParameters[SHOPPER_VAL_IVA]",
        format_amount(totals.tax),
    );

    request
}
