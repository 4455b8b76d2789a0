//! Concrete repositories.
//!
//! Each module pairs a mapper with the finders of one entity. The engine in
//! [`crate::repository`] does the work; these modules only describe tables
//! and filters.

pub mod development;
pub mod document;
pub mod finance;
pub mod sale;
pub mod unit;
pub mod user;

pub use development::{DevelopmentMapper, DevelopmentRepository};
pub use document::{DocumentMapper, DocumentRepository};
pub use finance::{FinanceRecordMapper, FinanceRepository};
pub use sale::{SaleMapper, SaleRepository};
pub use unit::{CustomizationOptionMapper, RoomMapper, UnitMapper, UnitRepository};
pub use user::{UserMapper, UserRepository};
