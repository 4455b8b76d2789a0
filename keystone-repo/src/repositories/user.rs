//! Users.

use keystone_core::{
    validate_email, EntityId, NewUser, QueryError, Resource, Row, SqlValue, Timestamp, User,
    UserPatch,
};
use keystone_storage::{Filter, Record, SortOrder};

use crate::error::RepoResult;
use crate::mapper::{get_enum, get_opt_str, get_str, get_timestamp, EntityMapper, RowMapper, NEWEST_FIRST};
use crate::repository::{Lookup, Repository};

pub struct UserMapper;

pub type UserRepository = Repository<UserMapper>;

impl RowMapper for UserMapper {
    type Entity = User;

    const RESOURCE: Resource = Resource::Users;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "email",
        "full_name",
        "role",
        "phone",
        "company_name",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static [(&'static str, SortOrder)] = NEWEST_FIRST;

    fn map_to_entity(row: &Row) -> Result<User, QueryError> {
        Ok(User {
            id: get_str(row, "id")?,
            email: get_str(row, "email")?,
            full_name: get_str(row, "full_name")?,
            role: get_enum(row, "role")?,
            phone: get_opt_str(row, "phone")?,
            company_name: get_opt_str(row, "company_name")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn map_to_record(user: &User) -> Record {
        vec![
            ("id", SqlValue::from(&user.id)),
            ("email", SqlValue::from(&user.email)),
            ("full_name", SqlValue::from(&user.full_name)),
            ("role", SqlValue::from(user.role.as_str())),
            ("phone", SqlValue::from(user.phone.clone())),
            ("company_name", SqlValue::from(user.company_name.clone())),
            ("created_at", SqlValue::from(user.created_at)),
            ("updated_at", SqlValue::from(user.updated_at)),
        ]
    }
}

impl EntityMapper for UserMapper {
    type Draft = NewUser;
    type Patch = UserPatch;

    fn entity_id(user: &User) -> &str {
        &user.id
    }

    fn build(draft: NewUser, id: EntityId, now: Timestamp) -> User {
        User {
            id,
            // Emails are compared case-insensitively by storing them lowered.
            email: draft.email.to_lowercase(),
            full_name: draft.full_name,
            role: draft.role,
            phone: draft.phone,
            company_name: draft.company_name,
            created_at: now,
            updated_at: now,
        }
    }

    fn patch_record(patch: &UserPatch) -> Record {
        let mut record = Record::new();
        if let Some(email) = &patch.email {
            record.push(("email", SqlValue::from(email.to_lowercase())));
        }
        if let Some(full_name) = &patch.full_name {
            record.push(("full_name", SqlValue::from(full_name)));
        }
        if let Some(role) = patch.role {
            record.push(("role", SqlValue::from(role.as_str())));
        }
        if let Some(phone) = &patch.phone {
            record.push(("phone", SqlValue::from(phone)));
        }
        if let Some(company_name) = &patch.company_name {
            record.push(("company_name", SqlValue::from(company_name)));
        }
        record
    }
}

impl Repository<UserMapper> {
    /// Look a user up by email address (case-insensitive).
    pub async fn find_by_email(&self, email: &str, actor_id: &str) -> RepoResult<Option<User>> {
        let email = email.trim().to_lowercase();
        let lookup = Lookup::one("findByEmail")
            .check(validate_email("email", &email))
            .filter(Filter::eq("email", email.as_str()));
        self.find_one_by(lookup, actor_id).await
    }
}
