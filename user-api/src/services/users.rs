//! Users resource: listing with pagination, CRUD, cache invalidation and
//! audit trail.

use serde_json::json;
use std::sync::Arc;

use super::audit::AuditLog;
use super::cache::Cache;
use super::store::CredentialStore;
use super::ServiceError;
use crate::dtos::user::{
    CreateUserRequest, Links, Pagination, UpdateUserRequest, UserList, UserListQuery,
};
use crate::models::{
    AuditAction, AuditEvent, NewUser, RequestContext, User, UserChanges, UserResponse, UserType,
};
use crate::utils::Password;

pub const LIST_CACHE_PREFIX: &str = "cache:users:list";
pub const ITEM_CACHE_PREFIX: &str = "cache:users:item";

/// Cache key for a listing: version, page, limit and active filters.
pub fn list_cache_key(version: &str, query: &UserListQuery) -> String {
    let mut key = format!(
        "{}:{}:page={}:limit={}",
        LIST_CACHE_PREFIX,
        version,
        query.page(),
        query.limit()
    );
    for (name, value) in query.filters() {
        key.push_str(&format!(":{}={}", name, value.to_lowercase()));
    }
    key
}

pub fn item_cache_key(version: &str, id: u64) -> String {
    format!("{}:{}:{}", ITEM_CACHE_PREFIX, version, id)
}

fn parse_user_type(value: &str) -> Result<UserType, ServiceError> {
    value.parse().map_err(ServiceError::Validation)
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<CredentialStore>,
    cache: Cache,
    audit: AuditLog,
}

impl UserService {
    pub fn new(store: Arc<CredentialStore>, cache: Cache, audit: AuditLog) -> Self {
        Self {
            store,
            cache,
            audit,
        }
    }

    /// One page of users plus navigation links rooted at `base_url`.
    pub async fn list(&self, query: &UserListQuery, base_url: &str) -> UserList {
        let page = query.page();
        let limit = query.limit();
        let name = query.name.as_deref().map(str::to_lowercase);
        let email = query.email.as_deref().map(str::to_lowercase);
        let user_type = query.user_type.as_deref();

        let matching: Vec<User> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|u| name.as_deref().map_or(true, |n| u.name.to_lowercase().contains(n)))
            .filter(|u| email.as_deref().map_or(true, |e| u.email.to_lowercase().contains(e)))
            .filter(|u| user_type.map_or(true, |t| u.user_type.as_str() == t))
            .collect();

        let pagination = Pagination::new(page, limit, matching.len());
        let start = (page as usize - 1).saturating_mul(limit as usize);
        let items = matching
            .iter()
            .skip(start)
            .take(limit as usize)
            .map(User::sanitized)
            .collect();

        let links = build_links(base_url, query, &pagination);

        UserList {
            items,
            pagination,
            links,
        }
    }

    pub async fn get(&self, id: u64) -> Result<UserResponse, ServiceError> {
        self.store
            .get(id)
            .await
            .map(|u| u.sanitized())
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    pub async fn create(
        &self,
        request: CreateUserRequest,
        ctx: &RequestContext,
    ) -> Result<UserResponse, ServiceError> {
        let user_type = parse_user_type(&request.user_type)?;

        if self.store.email_exists(&request.email, None).await {
            return Err(ServiceError::DuplicateEmail);
        }

        let password_hash = self.store.hash(Password::new(request.password)).await?;
        let user = self
            .store
            .create(NewUser {
                name: request.name,
                email: request.email,
                user_type,
                password_hash,
            })
            .await?;

        self.invalidate_lists().await;
        self.audit
            .record(
                AuditEvent::new(AuditAction::UserCreated, ctx)
                    .resource("user", user.id)
                    .details(json!({ "email": user.email, "type": user.user_type })),
            )
            .await;

        tracing::info!(user_id = user.id, "User created");
        Ok(user.sanitized())
    }

    pub async fn update(
        &self,
        id: u64,
        request: UpdateUserRequest,
        ctx: &RequestContext,
    ) -> Result<UserResponse, ServiceError> {
        if self.store.get(id).await.is_none() {
            return Err(ServiceError::NotFound("User".to_string()));
        }

        let password_hash = match request.password {
            Some(password) => Some(self.store.hash(Password::new(password)).await?),
            None => None,
        };
        let changes = UserChanges {
            name: request.name,
            email: request.email,
            user_type: request.user_type.as_deref().map(parse_user_type).transpose()?,
            password_hash,
        };
        let changed_fields = changes.changed_fields();

        let user = self
            .store
            .update(id, changes)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        self.invalidate_user(id).await;
        self.audit
            .record(
                AuditEvent::new(AuditAction::UserUpdated, ctx)
                    .resource("user", id)
                    .details(json!({ "changedFields": changed_fields })),
            )
            .await;

        tracing::info!(user_id = id, ?changed_fields, "User updated");
        Ok(user.sanitized())
    }

    pub async fn delete(&self, id: u64, ctx: &RequestContext) -> Result<(), ServiceError> {
        let Some(user) = self.store.get(id).await else {
            return Err(ServiceError::NotFound("User".to_string()));
        };

        match self.store.delete(id).await {
            Ok(true) => {}
            Ok(false) => return Err(ServiceError::NotFound("User".to_string())),
            Err(err @ ServiceError::ForbiddenOperation(_)) => {
                tracing::warn!(user_id = id, actor = ?ctx.user_id, "Attempt to delete primary admin");
                self.audit
                    .record(
                        AuditEvent::new(AuditAction::AdminDeleteAttempt, ctx)
                            .failed()
                            .resource("user", id)
                            .details(json!({ "email": user.email })),
                    )
                    .await;
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        self.invalidate_user(id).await;
        self.audit
            .record(
                AuditEvent::new(AuditAction::UserDeleted, ctx)
                    .resource("user", id)
                    .details(json!({ "email": user.email })),
            )
            .await;

        tracing::info!(user_id = id, "User deleted");
        Ok(())
    }

    async fn invalidate_lists(&self) {
        self.cache
            .delete_pattern(&format!("{}:*", LIST_CACHE_PREFIX))
            .await;
    }

    async fn invalidate_user(&self, id: u64) {
        self.cache
            .delete_pattern(&format!("{}:*:{}", ITEM_CACHE_PREFIX, id))
            .await;
        self.invalidate_lists().await;
    }
}

fn page_link(base_url: &str, query: &UserListQuery, page: u32, limit: u32) -> String {
    let page = page.to_string();
    let limit = limit.to_string();
    let mut params = vec![("page", page.as_str()), ("limit", limit.as_str())];
    params.extend(query.filters());

    match serde_urlencoded::to_string(&params) {
        Ok(qs) => format!("{}?{}", base_url, qs),
        Err(_) => base_url.to_string(),
    }
}

fn build_links(base_url: &str, query: &UserListQuery, pagination: &Pagination) -> Links {
    let limit = pagination.items_per_page;
    Links {
        self_link: page_link(base_url, query, pagination.current_page, limit),
        first: page_link(base_url, query, 1, limit),
        last: page_link(base_url, query, pagination.total_pages.max(1), limit),
        next: pagination
            .next_page
            .map(|p| page_link(base_url, query, p, limit)),
        prev: pagination
            .prev_page
            .map(|p| page_link(base_url, query, p, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditFilters;

    async fn service() -> (UserService, Cache, AuditLog) {
        let store = Arc::new(
            CredentialStore::seeded(
                10,
                "Admin",
                "admin@example.com",
                Password::new("admin123".to_string()),
            )
            .await
            .unwrap(),
        );
        let cache = Cache::in_memory();
        let audit = AuditLog::new(cache.clone());
        (
            UserService::new(store, cache.clone(), audit.clone()),
            cache,
            audit,
        )
    }

    fn create_request(name: &str, email: &str) -> CreateUserRequest {
        CreateUserRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: "secret1".to_string(),
            user_type: "user".to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_paginates_and_links() {
        let (users, _, _) = service().await;
        let ctx = RequestContext::default();
        for i in 0..11 {
            users
                .create(create_request("Member", &format!("m{}@example.com", i)), &ctx)
                .await
                .unwrap();
        }

        let query = UserListQuery {
            page: Some(2),
            limit: Some(5),
            ..Default::default()
        };
        let list = users.list(&query, "/api/v1/users").await;

        assert_eq!(list.items.len(), 5);
        assert_eq!(list.items[0].id, 6);
        assert_eq!(list.pagination.total_items, 12);
        assert_eq!(list.pagination.total_pages, 3);
        assert_eq!(list.pagination.next_page, Some(3));
        assert_eq!(list.pagination.prev_page, Some(1));
        assert_eq!(list.links.self_link, "/api/v1/users?page=2&limit=5");
        assert_eq!(list.links.last, "/api/v1/users?page=3&limit=5");
        assert_eq!(
            list.links.next.as_deref(),
            Some("/api/v1/users?page=3&limit=5")
        );
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (users, _, _) = service().await;
        let ctx = RequestContext::default();
        users
            .create(create_request("Jane Doe", "jane@example.com"), &ctx)
            .await
            .unwrap();
        users
            .create(create_request("John Roe", "john@example.com"), &ctx)
            .await
            .unwrap();

        let query = UserListQuery {
            name: Some("JANE".to_string()),
            ..Default::default()
        };
        let list = users.list(&query, "/api/v2/users").await;
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].email, "jane@example.com");
        assert_eq!(list.links.first, "/api/v2/users?page=1&limit=10&name=JANE");

        let admins = users
            .list(
                &UserListQuery {
                    user_type: Some("admin".to_string()),
                    ..Default::default()
                },
                "/api/users",
            )
            .await;
        assert_eq!(admins.pagination.total_items, 1);
        assert!(!admins.pagination.has_next);
        assert!(admins.links.prev.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_email() {
        let (users, _, _) = service().await;
        let result = users
            .create(create_request("Dup", "admin@example.com"), &RequestContext::default())
            .await;
        assert!(matches!(result, Err(ServiceError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn test_update_invalidates_caches_and_audits_fields() {
        let (users, cache, audit) = service().await;
        let ctx = RequestContext::default();
        let jane = users
            .create(create_request("Jane", "jane@example.com"), &ctx)
            .await
            .unwrap();

        cache.set(&item_cache_key("v1", jane.id), "{}", 60).await;
        cache.set(&item_cache_key("v2", jane.id), "{}", 60).await;
        cache
            .set(&list_cache_key("v1", &UserListQuery::default()), "{}", 60)
            .await;

        let updated = users
            .update(
                jane.id,
                UpdateUserRequest {
                    name: Some("Janet".to_string()),
                    password: Some("newsecret".to_string()),
                    ..Default::default()
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Janet");

        assert!(cache.keys("cache:users:*", 10).await.is_empty());

        let entries = audit
            .query(&AuditFilters {
                action: Some(AuditAction::UserUpdated),
                ..Default::default()
            })
            .await
            .entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].details["changedFields"], json!(["name", "password"]));
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let (users, _, _) = service().await;
        let result = users
            .update(42, UpdateUserRequest::default(), &RequestContext::default())
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_primary_admin_is_audited_critical() {
        let (users, _, audit) = service().await;
        let result = users.delete(1, &RequestContext::default()).await;
        assert!(matches!(result, Err(ServiceError::ForbiddenOperation(_))));

        let entries = audit
            .query(&AuditFilters {
                action: Some(AuditAction::AdminDeleteAttempt),
                ..Default::default()
            })
            .await
            .entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, crate::models::Severity::Critical);
        assert!(!entries[0].success);
    }

    #[tokio::test]
    async fn test_delete_user() {
        let (users, _, _) = service().await;
        let ctx = RequestContext::default();
        let jane = users
            .create(create_request("Jane", "jane@example.com"), &ctx)
            .await
            .unwrap();

        users.delete(jane.id, &ctx).await.unwrap();
        assert!(matches!(
            users.get(jane.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            users.delete(jane.id, &ctx).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_cache_keys() {
        let query = UserListQuery {
            page: Some(2),
            email: Some("Example".to_string()),
            ..Default::default()
        };
        assert_eq!(
            list_cache_key("v1", &query),
            "cache:users:list:v1:page=2:limit=10:email=example"
        );
        assert_eq!(item_cache_key("v2", 7), "cache:users:item:v2:7");
    }
}
