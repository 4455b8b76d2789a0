//! Core entity structures

use serde::{Deserialize, Serialize};

use crate::{
    DevelopmentStatus, DocumentKind, EntityId, FinanceRecordType, PaymentStatus, SaleStatus,
    Timestamp, UnitStatus, UnitType, UserRole,
};

/// Platform account: buyer, developer staff, agent or admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A building project offered for sale by a developer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Development {
    pub id: EntityId,
    pub developer_id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub city: String,
    pub address: String,
    pub status: DevelopmentStatus,
    pub total_units: i64,
    pub completion_date: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A sellable unit inside a development.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: EntityId,
    pub development_id: EntityId,
    pub unit_number: String,
    pub unit_type: UnitType,
    pub bedrooms: i64,
    pub bathrooms: i64,
    pub floor_area_sqm: f64,
    pub price_cents: i64,
    pub status: UnitStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Room of a unit (read-only child row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: EntityId,
    pub unit_id: EntityId,
    pub name: String,
    pub room_type: String,
    pub area_sqm: f64,
}

/// Buyer-selectable finish or upgrade for a unit (read-only child row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomizationOption {
    pub id: EntityId,
    pub unit_id: EntityId,
    pub category: String,
    pub name: String,
    pub price_delta_cents: i64,
    pub is_default: bool,
}

/// Reservation or purchase of a unit by a buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: EntityId,
    pub unit_id: EntityId,
    pub buyer_id: EntityId,
    pub agreed_price_cents: i64,
    pub status: SaleStatus,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Metadata of a stored document. The bytes live in object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: EntityId,
    pub owner_id: EntityId,
    pub development_id: Option<EntityId>,
    pub sale_id: Option<EntityId>,
    pub title: String,
    pub kind: DocumentKind,
    pub storage_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Money movement attached to a sale. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinanceRecord {
    pub id: EntityId,
    pub sale_id: EntityId,
    pub buyer_id: EntityId,
    pub record_type: FinanceRecordType,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub due_date: Option<Timestamp>,
    pub paid_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One page of results plus the total used for pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}
