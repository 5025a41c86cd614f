//! HTTP handlers for the user API.

pub mod audit;
pub mod auth;
pub mod health;
pub mod metrics;
pub mod users;
pub mod version;
