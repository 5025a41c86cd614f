pub mod auth;
pub mod cache;
pub mod context;
pub mod features;
pub mod metrics;
pub mod rate_limit;
pub mod version;

pub use auth::{auth_middleware, AuthUser};
pub use cache::{response_cache_middleware, CachePolicy, ResponseCache};
pub use context::request_context;
pub use features::require_audit_logs;
pub use metrics::daily_metrics_middleware;
pub use rate_limit::rate_limit_middleware;
pub use version::{version_middleware, RequestedVersion};
