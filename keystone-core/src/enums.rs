//! Closed enumerations: resources, cache namespaces, operations and the
//! string-backed domain enums stored in entity tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownVariant;

/// Declares an enum persisted as snake_case text.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        enum_name: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================================================
// RESOURCES
// ============================================================================

text_enum! {
    /// Every table the layer may touch. Table names never come from callers.
    Resource {
        Users => "users",
        Developments => "developments",
        Units => "units",
        UnitRooms => "unit_rooms",
        CustomizationOptions => "unit_customization_options",
        Sales => "sales",
        Documents => "documents",
        FinanceRecords => "finance_records",
    }
}

impl Resource {
    /// Table name as embedded in query text.
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }

    /// Resolve a table name against the allow-list.
    pub fn from_table_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Singular resource type recorded in audit events.
    pub fn resource_type(&self) -> &'static str {
        match self {
            Resource::Users => "user",
            Resource::Developments => "development",
            Resource::Units => "unit",
            Resource::UnitRooms => "unit_room",
            Resource::CustomizationOptions => "customization_option",
            Resource::Sales => "sale",
            Resource::Documents => "document",
            Resource::FinanceRecords => "finance_record",
        }
    }

    /// Cache region that holds this resource's reads.
    pub fn namespace(&self) -> CacheNamespace {
        match self {
            Resource::Users => CacheNamespace::User,
            Resource::Developments => CacheNamespace::Development,
            Resource::Units | Resource::UnitRooms | Resource::CustomizationOptions => {
                CacheNamespace::Unit
            }
            Resource::Sales => CacheNamespace::Sale,
            Resource::Documents => CacheNamespace::Document,
            Resource::FinanceRecords => CacheNamespace::Finance,
        }
    }
}

text_enum! {
    /// Cache regions, one per entity family.
    CacheNamespace {
        User => "user",
        Development => "development",
        Unit => "unit",
        Sale => "sale",
        Document => "document",
        Finance => "finance",
    }
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Repository operation, used for rate-limit keys, audit actions and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FindById,
    FindAll,
    Create,
    Update,
    Delete,
    /// Named finder returning at most one entity.
    FindOne(&'static str),
    /// Named finder returning a list or a page.
    FindMany(&'static str),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::FindById => "findById",
            Operation::FindAll => "findAll",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::FindOne(name) | Operation::FindMany(name) => name,
        }
    }

    pub fn is_read(&self) -> bool {
        !matches!(
            self,
            Operation::Create | Operation::Update | Operation::Delete
        )
    }

    /// Base operation whose rate limit applies when no explicit entry exists.
    pub fn limit_class(&self) -> Operation {
        match self {
            Operation::FindOne(_) => Operation::FindById,
            Operation::FindMany(_) => Operation::FindAll,
            other => *other,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

text_enum! {
    /// Outcome of an audited operation.
    AuditStatus {
        Success => "success",
        Failure => "failure",
    }
}

// ============================================================================
// DOMAIN ENUMS
// ============================================================================

text_enum! {
    UserRole {
        Buyer => "buyer",
        Developer => "developer",
        Agent => "agent",
        Admin => "admin",
    }
}

text_enum! {
    DevelopmentStatus {
        Planning => "planning",
        Selling => "selling",
        SoldOut => "sold_out",
        Completed => "completed",
    }
}

text_enum! {
    UnitType {
        Studio => "studio",
        Apartment => "apartment",
        Townhouse => "townhouse",
        Penthouse => "penthouse",
    }
}

text_enum! {
    UnitStatus {
        Available => "available",
        Reserved => "reserved",
        Sold => "sold",
    }
}

text_enum! {
    SaleStatus {
        Reserved => "reserved",
        Contracted => "contracted",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

text_enum! {
    DocumentKind {
        Contract => "contract",
        FloorPlan => "floor_plan",
        Brochure => "brochure",
        Identity => "identity",
        Financial => "financial",
    }
}

text_enum! {
    FinanceRecordType {
        Deposit => "deposit",
        Installment => "installment",
        Mortgage => "mortgage",
        Refund => "refund",
    }
}

text_enum! {
    PaymentStatus {
        Pending => "pending",
        Paid => "paid",
        Overdue => "overdue",
        Refunded => "refunded",
    }
}
