use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for customer orders.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

/// Identifier wrapper for administrative dossiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DossierId(pub String);

/// Identifier wrapper for uploaded documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

/// Identifier issued by the utility for a consumption-data consent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsentId(pub String);

/// Authenticated identity performing a mutation. The authorization boundary
/// is external; this core trusts the identity it is handed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Admin,
    Customer,
    System,
}

impl Actor {
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::Admin,
        }
    }

    pub fn customer(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::Customer,
        }
    }

    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            kind: ActorKind::System,
        }
    }
}

/// Order lifecycle status. Only advances forward along the linear chain;
/// `cancelled` is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Validated,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Validated => "validated",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// The single forward successor, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Confirmed),
            Self::Confirmed => Some(Self::Validated),
            Self::Validated => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Whether `requested` is directly reachable from `self`.
    pub fn can_transition_to(self, requested: Self) -> bool {
        if requested == Self::Cancelled {
            return !self.is_terminal();
        }
        self.next() == Some(requested)
    }
}

/// Payment state as reported by the external payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address_line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line2: Option<String>,
    pub postal_code: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_kwc: Option<f32>,
}

/// A customer order. Amounts are carried in cents as opaque integers; this
/// core performs no currency or tax computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub total_amount_cents: u32,
    pub payment_status: PaymentStatus,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItem>,
}

/// Classification of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Photo,
    Contract,
    Certificate,
    DeliveryProof,
    Misc,
}

/// Reference to an uploaded document. The storage key is an opaque handle
/// into external blob storage; the bytes are never interpreted here.
/// Documents are immutable once created, only superseded by new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: DocumentId,
    pub dossier_id: DossierId,
    pub order_id: OrderId,
    pub kind: DocumentKind,
    pub file_name: String,
    pub content_type: String,
    pub storage_key: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
}
