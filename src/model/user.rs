use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::role::Role;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub hashed_password: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Public view of a user; never carries the credential hash.
#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "email": "jane@example.com",
    "username": "jane",
    "full_name": "Jane Doe",
    "role": "employee",
    "is_active": true,
    "created_at": "2026-01-01T08:00:00Z",
    "updated_at": null
}))]
pub struct UserResponse {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

pub const USER_COLUMNS: &str =
    "id, email, username, full_name, hashed_password, role, is_active, created_at, updated_at";
