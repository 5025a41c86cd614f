use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::UserResponse;
use crate::utils::validate_user_type;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,

    #[serde(rename = "type")]
    #[validate(custom(function = "validate_user_type"))]
    pub user_type: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: Option<String>,

    #[serde(rename = "type")]
    #[validate(custom(function = "validate_user_type"))]
    pub user_type: Option<String>,
}

/// `GET /users` query string.
///
/// `page` and `limit` are clamped into range by their accessors rather than
/// rejected.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct UserListQuery {
    pub page: Option<i64>,

    pub limit: Option<i64>,

    pub name: Option<String>,

    pub email: Option<String>,

    #[serde(rename = "type")]
    #[validate(custom(function = "validate_user_type"))]
    pub user_type: Option<String>,
}

impl UserListQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).clamp(1, i64::from(u32::MAX)) as u32
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(i64::from(DEFAULT_PAGE_SIZE))
            .clamp(1, i64::from(MAX_PAGE_SIZE)) as u32
    }

    /// Active filters as `(name, value)` pairs in a fixed order.
    pub fn filters(&self) -> Vec<(&'static str, &str)> {
        [
            ("name", self.name.as_deref()),
            ("email", self.email.as_deref()),
            ("type", self.user_type.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (k, v)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: usize,
    pub items_per_page: u32,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<u32>,
    pub prev_page: Option<u32>,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total_items: usize) -> Self {
        let total_pages = total_items.div_ceil(limit as usize) as u32;
        let has_next = page < total_pages;
        let has_prev = page > 1;
        Self {
            current_page: page,
            total_pages,
            total_items,
            items_per_page: limit,
            has_next,
            has_prev,
            next_page: has_next.then_some(page + 1),
            prev_page: has_prev.then_some(page - 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: String,
    pub first: String,
    pub last: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserList {
    pub items: Vec<UserResponse>,
    pub pagination: Pagination,
    pub links: Links,
}
