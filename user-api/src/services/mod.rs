//! Business logic: credential store, cache backend, tokens, audit log,
//! users resource, auth flows and daily metrics.

pub mod audit;
pub mod auth;
pub mod cache;
pub mod error;
pub mod metrics;
pub mod store;
pub mod tokens;
pub mod users;

pub use audit::AuditLog;
pub use auth::AuthService;
pub use cache::{Cache, CacheStore, InMemoryCache, RedisCache};
pub use error::ServiceError;
pub use metrics::MetricsService;
pub use store::CredentialStore;
pub use tokens::{Claims, TokenPair, TokenService};
pub use users::UserService;
