//! Typed create/update inputs with explicit validation.
//!
//! Drafts carry every caller-supplied field of a new entity; the layer adds
//! the id and timestamps. Patches carry only the fields to change.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::validation::{
    validate_email, validate_entity_id, validate_positive_f64, validate_text, HasUpdates,
    Validate, ValidateRange,
};
use crate::{
    DevelopmentStatus, DocumentKind, EntityId, FinanceRecordType, PaymentStatus, SaleStatus,
    Timestamp, UnitStatus, UnitType, UserRole, ValidationError,
};

const MAX_NAME_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 5_000;
const MAX_STORAGE_KEY_LEN: usize = 1_024;
const MAX_DOCUMENT_BYTES: i64 = 100 * 1024 * 1024;
const MAX_FLOOR_AREA_SQM: f64 = 100_000.0;

static PHONE_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^\+?[0-9 ()-]{6,20}$"));
static MIME_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[a-z]+/[a-z0-9.+-]+$"));
static CURRENCY_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}$"));

fn check_pattern(
    pattern: &Lazy<Result<Regex, regex::Error>>,
    field: &str,
    value: &str,
    reason: &str,
) -> Result<(), ValidationError> {
    match pattern.as_ref() {
        Ok(regex) if regex.is_match(value) => Ok(()),
        _ => Err(ValidationError::invalid(field, reason)),
    }
}

fn check_phone(phone: &str) -> Result<(), ValidationError> {
    check_pattern(&PHONE_PATTERN, "phone", phone, "is not a valid phone number")
}

fn check_mime(mime: &str) -> Result<(), ValidationError> {
    check_pattern(&MIME_PATTERN, "mime_type", mime, "is not a valid MIME type")
}

fn check_currency(currency: &str) -> Result<(), ValidationError> {
    check_pattern(
        &CURRENCY_PATTERN,
        "currency",
        currency,
        "must be a three-letter ISO 4217 code",
    )
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub company_name: Option<String>,
}

impl Validate for NewUser {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_email("email", &self.email)?;
        validate_text("full_name", &self.full_name, MAX_NAME_LEN)?;
        if let Some(phone) = &self.phone {
            check_phone(phone)?;
        }
        if let Some(company) = &self.company_name {
            validate_text("company_name", company, MAX_NAME_LEN)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<UserRole>,
    pub phone: Option<String>,
    pub company_name: Option<String>,
}

impl HasUpdates for UserPatch {
    fn has_any_updates(&self) -> bool {
        self.email.is_some()
            || self.full_name.is_some()
            || self.role.is_some()
            || self.phone.is_some()
            || self.company_name.is_some()
    }
}

impl Validate for UserPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        self.validate_has_updates()?;
        if let Some(email) = &self.email {
            validate_email("email", email)?;
        }
        if let Some(name) = &self.full_name {
            validate_text("full_name", name, MAX_NAME_LEN)?;
        }
        if let Some(phone) = &self.phone {
            check_phone(phone)?;
        }
        if let Some(company) = &self.company_name {
            validate_text("company_name", company, MAX_NAME_LEN)?;
        }
        Ok(())
    }
}

// ============================================================================
// DEVELOPMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevelopment {
    pub developer_id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub city: String,
    pub address: String,
    pub status: DevelopmentStatus,
    pub total_units: i64,
    pub completion_date: Option<Timestamp>,
}

impl Validate for NewDevelopment {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_entity_id("developer_id", &self.developer_id)?;
        validate_text("name", &self.name, MAX_NAME_LEN)?;
        if let Some(description) = &self.description {
            validate_text("description", description, MAX_DESCRIPTION_LEN)?;
        }
        validate_text("city", &self.city, MAX_NAME_LEN)?;
        validate_text("address", &self.address, MAX_NAME_LEN)?;
        self.total_units.validate_range("total_units", 1, 10_000)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<DevelopmentStatus>,
    pub total_units: Option<i64>,
    pub completion_date: Option<Timestamp>,
}

impl HasUpdates for DevelopmentPatch {
    fn has_any_updates(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.status.is_some()
            || self.total_units.is_some()
            || self.completion_date.is_some()
    }
}

impl Validate for DevelopmentPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        self.validate_has_updates()?;
        if let Some(name) = &self.name {
            validate_text("name", name, MAX_NAME_LEN)?;
        }
        if let Some(description) = &self.description {
            validate_text("description", description, MAX_DESCRIPTION_LEN)?;
        }
        if let Some(total) = self.total_units {
            total.validate_range("total_units", 1, 10_000)?;
        }
        Ok(())
    }
}

// ============================================================================
// UNITS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUnit {
    pub development_id: EntityId,
    pub unit_number: String,
    pub unit_type: UnitType,
    pub bedrooms: i64,
    pub bathrooms: i64,
    pub floor_area_sqm: f64,
    pub price_cents: i64,
    pub status: UnitStatus,
}

impl Validate for NewUnit {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_entity_id("development_id", &self.development_id)?;
        validate_text("unit_number", &self.unit_number, 32)?;
        self.bedrooms.validate_range("bedrooms", 0, 20)?;
        self.bathrooms.validate_range("bathrooms", 0, 20)?;
        validate_positive_f64("floor_area_sqm", self.floor_area_sqm, MAX_FLOOR_AREA_SQM)?;
        self.price_cents.validate_positive("price_cents")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitPatch {
    pub unit_type: Option<UnitType>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub floor_area_sqm: Option<f64>,
    pub price_cents: Option<i64>,
    pub status: Option<UnitStatus>,
}

impl HasUpdates for UnitPatch {
    fn has_any_updates(&self) -> bool {
        self.unit_type.is_some()
            || self.bedrooms.is_some()
            || self.bathrooms.is_some()
            || self.floor_area_sqm.is_some()
            || self.price_cents.is_some()
            || self.status.is_some()
    }
}

impl Validate for UnitPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        self.validate_has_updates()?;
        if let Some(bedrooms) = self.bedrooms {
            bedrooms.validate_range("bedrooms", 0, 20)?;
        }
        if let Some(bathrooms) = self.bathrooms {
            bathrooms.validate_range("bathrooms", 0, 20)?;
        }
        if let Some(area) = self.floor_area_sqm {
            validate_positive_f64("floor_area_sqm", area, MAX_FLOOR_AREA_SQM)?;
        }
        if let Some(price) = self.price_cents {
            price.validate_positive("price_cents")?;
        }
        Ok(())
    }
}

/// Optional filters for unit listings within a development.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitFilter {
    pub status: Option<UnitStatus>,
    pub unit_type: Option<UnitType>,
    pub min_bedrooms: Option<i64>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
}

impl Validate for UnitFilter {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(bedrooms) = self.min_bedrooms {
            bedrooms.validate_range("min_bedrooms", 0, 20)?;
        }
        if let Some(min) = self.min_price_cents {
            min.validate_range("min_price_cents", 0, i64::MAX)?;
        }
        if let Some(max) = self.max_price_cents {
            max.validate_range("max_price_cents", 0, i64::MAX)?;
        }
        if let (Some(min), Some(max)) = (self.min_price_cents, self.max_price_cents) {
            if min > max {
                return Err(ValidationError::invalid(
                    "min_price_cents",
                    "must not exceed max_price_cents",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SALES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSale {
    pub unit_id: EntityId,
    pub buyer_id: EntityId,
    pub agreed_price_cents: i64,
    pub status: SaleStatus,
}

impl Validate for NewSale {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_entity_id("unit_id", &self.unit_id)?;
        validate_entity_id("buyer_id", &self.buyer_id)?;
        self.agreed_price_cents.validate_positive("agreed_price_cents")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalePatch {
    pub agreed_price_cents: Option<i64>,
    pub status: Option<SaleStatus>,
    pub completed_at: Option<Timestamp>,
}

impl HasUpdates for SalePatch {
    fn has_any_updates(&self) -> bool {
        self.agreed_price_cents.is_some() || self.status.is_some() || self.completed_at.is_some()
    }
}

impl Validate for SalePatch {
    fn validate(&self) -> Result<(), ValidationError> {
        self.validate_has_updates()?;
        if let Some(price) = self.agreed_price_cents {
            price.validate_positive("agreed_price_cents")?;
        }
        Ok(())
    }
}

// ============================================================================
// DOCUMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub owner_id: EntityId,
    pub development_id: Option<EntityId>,
    pub sale_id: Option<EntityId>,
    pub title: String,
    pub kind: DocumentKind,
    pub storage_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

impl Validate for NewDocument {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_entity_id("owner_id", &self.owner_id)?;
        if let Some(development_id) = &self.development_id {
            validate_entity_id("development_id", development_id)?;
        }
        if let Some(sale_id) = &self.sale_id {
            validate_entity_id("sale_id", sale_id)?;
        }
        validate_text("title", &self.title, MAX_NAME_LEN)?;
        validate_text("storage_key", &self.storage_key, MAX_STORAGE_KEY_LEN)?;
        check_mime(&self.mime_type)?;
        self.size_bytes.validate_range("size_bytes", 1, MAX_DOCUMENT_BYTES)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub kind: Option<DocumentKind>,
    pub sale_id: Option<EntityId>,
}

impl HasUpdates for DocumentPatch {
    fn has_any_updates(&self) -> bool {
        self.title.is_some() || self.kind.is_some() || self.sale_id.is_some()
    }
}

impl Validate for DocumentPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        self.validate_has_updates()?;
        if let Some(title) = &self.title {
            validate_text("title", title, MAX_NAME_LEN)?;
        }
        if let Some(sale_id) = &self.sale_id {
            validate_entity_id("sale_id", sale_id)?;
        }
        Ok(())
    }
}

// ============================================================================
// FINANCE RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFinanceRecord {
    pub sale_id: EntityId,
    pub buyer_id: EntityId,
    pub record_type: FinanceRecordType,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub due_date: Option<Timestamp>,
}

impl Validate for NewFinanceRecord {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_entity_id("sale_id", &self.sale_id)?;
        validate_entity_id("buyer_id", &self.buyer_id)?;
        self.amount_cents.validate_positive("amount_cents")?;
        check_currency(&self.currency)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinanceRecordPatch {
    pub amount_cents: Option<i64>,
    pub status: Option<PaymentStatus>,
    pub due_date: Option<Timestamp>,
    pub paid_at: Option<Timestamp>,
}

impl HasUpdates for FinanceRecordPatch {
    fn has_any_updates(&self) -> bool {
        self.amount_cents.is_some()
            || self.status.is_some()
            || self.due_date.is_some()
            || self.paid_at.is_some()
    }
}

impl Validate for FinanceRecordPatch {
    fn validate(&self) -> Result<(), ValidationError> {
        self.validate_has_updates()?;
        if let Some(amount) = self.amount_cents {
            amount.validate_positive("amount_cents")?;
        }
        Ok(())
    }
}
