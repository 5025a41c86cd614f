//! User model - accounts held by the credential store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::PasswordHashString;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Admin,
    User,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "admin",
            UserType::User => "user",
        }
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserType::Admin),
            "user" => Ok(UserType::User),
            _ => Err(format!("Invalid user type: {}", s)),
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored user record. Only the credential store holds these.
#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub user_type: UserType,
    pub password_hash: PasswordHashString,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Convert to sanitized response (no password hash).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            user_type: self.user_type,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Fields required to insert a user; the hash is computed by the caller.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub user_type: UserType,
    pub password_hash: PasswordHashString,
}

/// Partial update merged into an existing record.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub user_type: Option<UserType>,
    pub password_hash: Option<PasswordHashString>,
}

impl UserChanges {
    /// Names of the fields this change touches, for audit details.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.email.is_some() {
            fields.push("email");
        }
        if self.user_type.is_some() {
            fields.push("type");
        }
        if self.password_hash.is_some() {
            fields.push("password");
        }
        fields
    }
}

/// User as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
