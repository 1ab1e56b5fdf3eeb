//! Orders awaiting a push notification.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{DeviceToken, OrderId};

/// Delivery-type code of an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Code `E`: the order left the store with a courier.
    OutForDelivery,
    /// Code `R`: the order waits at the counter.
    ReadyForPickup,
}

impl OrderType {
    /// Parse a storage code. Case-insensitive, surrounding whitespace ignored.
    pub fn from_code(code: &str) -> Result<Self, DomainError> {
        match code.trim().to_ascii_uppercase().as_str() {
            "E" => Ok(Self::OutForDelivery),
            "R" => Ok(Self::ReadyForPickup),
            _ => Err(DomainError::UnknownOrderType(code.to_string())),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::OutForDelivery => "E",
            Self::ReadyForPickup => "R",
        }
    }

    /// Notification title for an order of this type.
    pub fn title(self, order_id: OrderId) -> String {
        match self {
            Self::OutForDelivery => format!("Seu pedido #{order_id} saiu para entrega!"),
            Self::ReadyForPickup => format!("Seu pedido #{order_id} está pronto para retirada!"),
        }
    }

    /// Notification body for an order of this type.
    pub fn body(self) -> &'static str {
        match self {
            Self::OutForDelivery => "Oba! Seu pedido está a caminho e chegará em breve. 🛵",
            Self::ReadyForPickup => "Pode vir buscar seu pedido quando quiser. 📦",
        }
    }
}

/// An eligible order as returned by a claim, in claim order.
///
/// `order_type` is the raw storage code; it is validated at dispatch time so
/// that data-quality problems surface as `InvalidInput` outcomes instead of
/// aborting the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    pub id: OrderId,
    pub order_type: String,
    pub device_token: DeviceToken,
}

impl PendingOrder {
    pub fn new(id: OrderId, order_type: impl Into<String>, device_token: DeviceToken) -> Self {
        Self {
            id,
            order_type: order_type.into(),
            device_token,
        }
    }
}
