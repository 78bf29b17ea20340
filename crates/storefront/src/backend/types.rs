//! Wire types for the backend API proxy.
//!
//! Field names follow the backend's JSON contract (`id_usuario`,
//! `esExitoso`, ...) via serde renames; everything else in the crate uses
//! the domain types from `vitrina-core`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use vitrina_core::{format_amount, CartItem, ProductId, UserId};

/// Body for `POST /api/cart/add` (additive upsert of one line).
#[derive(Debug, Clone, Serialize)]
pub struct CartUpsertRequest {
    pub id_usuario: i32,
    pub id_producto: i32,
    pub nombre: String,
    /// Unit price formatted to 2 decimals, matching the storefront's
    /// display formatting.
    pub precio: String,
    pub cantidad: u32,
    pub imagen: String,
}

impl CartUpsertRequest {
    pub fn new(user: UserId, item: &CartItem) -> Self {
        Self {
            id_usuario: user.as_i32(),
            id_producto: item.product_id.as_i32(),
            nombre: item.display_name.clone(),
            precio: format_amount(item.unit_price),
            cantidad: item.quantity,
            imagen: item.image_ref.clone(),
        }
    }
}

/// Body for `PUT /api/cart/update/{id_producto}`.
#[derive(Debug, Clone, Serialize)]
pub struct CartQuantityRequest {
    pub id_usuario: i32,
    pub cantidad: u32,
}

/// Body for `POST /api/carrito/vaciar` (atomic clear).
#[derive(Debug, Clone, Serialize)]
pub struct CartClearRequest {
    pub id_usuario: i32,
}

/// One line of the server-side cart from `GET /api/cart`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerCartLine {
    pub id_producto: i32,
    pub nombre: String,
    pub precio: Decimal,
    pub cantidad: u32,
    #[serde(default)]
    pub imagen: String,
}

impl From<ServerCartLine> for CartItem {
    fn from(line: ServerCartLine) -> Self {
        Self {
            product_id: ProductId::new(line.id_producto),
            display_name: line.nombre,
            unit_price: line.precio,
            quantity: line.cantidad,
            image_ref: line.imagen,
        }
    }
}

/// Response of `POST /api/checkout`.
///
/// A missing or empty `id` is a hard failure of session creation, never a
/// partial success.
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionResponse {
    #[serde(default)]
    pub id: Option<String>,
}

/// Response of `GET /api/checkout/resultado`.
#[derive(Debug, Deserialize)]
pub struct ConsultResultResponse {
    pub result: GatewayResult,
}

/// Gateway result code and description.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResult {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

/// Body for `POST /api/procesar-pago` (persist the final payment record).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// The backend keys the record by the checkout session id, carried in
    /// this field per the wire contract.
    pub resource_path: String,
    pub estado_pago: String,
    pub codigo_pago: String,
    /// 1 for a successful payment, 0 otherwise.
    pub es_exitoso: u8,
    pub usuario_correo: String,
}

/// Response of `GET /api/cliente-ip`.
#[derive(Debug, Deserialize)]
pub struct ClientIpResponse {
    pub ip: String,
}

/// Body for `POST /api/direccion/guardar` (save address to profile).
#[derive(Debug, Clone, Serialize)]
pub struct SaveAddressRequest {
    pub id_usuario: i32,
    pub nombre: String,
    pub apellido: String,
    pub direccion: String,
    pub telefono: String,
    pub cedula: String,
    pub ciudad: String,
    pub provincia: String,
    pub codigo_postal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notas: Option<String>,
}
