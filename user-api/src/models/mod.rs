pub mod api_version;
pub mod audit;
pub mod user;

pub use api_version::ApiVersion;
pub use audit::{AuditAction, AuditEntry, AuditEvent, AuditFilters, RequestContext, Severity};
pub use user::{NewUser, User, UserChanges, UserResponse, UserType};
