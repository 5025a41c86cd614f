use serde_json::json;
use std::sync::Arc;

use super::audit::AuditLog;
use super::cache::{today, Cache};
use super::store::CredentialStore;
use super::tokens::TokenService;
use super::ServiceError;
use crate::dtos::auth::{AuthStats, LoginResponse, SessionCleanupReport};
use crate::models::{AuditAction, AuditEvent, RequestContext};
use crate::utils::Password;

const SESSION_SCAN_CAP: usize = 10_000;

#[derive(Clone)]
pub struct AuthService {
    store: Arc<CredentialStore>,
    tokens: TokenService,
    cache: Cache,
    audit: AuditLog,
}

impl AuthService {
    pub fn new(
        store: Arc<CredentialStore>,
        tokens: TokenService,
        cache: Cache,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            tokens,
            cache,
            audit,
        }
    }

    pub async fn login(
        &self,
        email: &str,
        password: String,
        ctx: &RequestContext,
    ) -> Result<LoginResponse, ServiceError> {
        let Some(user) = self
            .store
            .verify_credentials(email, Password::new(password))
            .await?
        else {
            tracing::warn!(email = %email, "Failed login attempt");
            self.cache.increment_counter("login_failed", 1).await;

            let mut failed_ctx = ctx.clone();
            failed_ctx.user_email = Some(email.to_string());
            self.audit
                .record(
                    AuditEvent::new(AuditAction::LoginFailed, &failed_ctx)
                        .failed()
                        .details(json!({ "reason": "invalid_credentials" })),
                )
                .await;

            return Err(ServiceError::InvalidCredentials);
        };

        let pair = self.tokens.issue_pair(&user).await?;
        self.cache.increment_counter("login_success", 1).await;

        let user_ctx = RequestContext {
            user_id: Some(user.id),
            user_email: Some(user.email.clone()),
            user_type: Some(user.user_type.to_string()),
            ..ctx.clone()
        };
        self.audit
            .record(AuditEvent::new(AuditAction::Login, &user_ctx))
            .await;

        tracing::info!(user_id = user.id, "User logged in");

        Ok(LoginResponse {
            user: user.sanitized(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
        })
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &RequestContext,
    ) -> Result<LoginResponse, ServiceError> {
        match self.tokens.refresh(refresh_token).await {
            Ok((user, pair)) => {
                self.cache.increment_counter("token_refresh", 1).await;
                let user_ctx = RequestContext {
                    user_id: Some(user.id),
                    user_email: Some(user.email.clone()),
                    user_type: Some(user.user_type.to_string()),
                    ..ctx.clone()
                };
                self.audit
                    .record(AuditEvent::new(AuditAction::TokenRefresh, &user_ctx))
                    .await;

                Ok(LoginResponse {
                    user: user.sanitized(),
                    access_token: pair.access_token,
                    refresh_token: pair.refresh_token,
                    expires_in: pair.expires_in,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "Refresh token rejected");
                self.audit
                    .record(AuditEvent::new(AuditAction::TokenRefreshFailed, ctx).failed())
                    .await;
                Err(ServiceError::InvalidRefreshToken)
            }
        }
    }

    pub async fn logout(&self, ctx: &RequestContext) -> Result<(), ServiceError> {
        let user_id = ctx
            .user_id
            .ok_or_else(|| ServiceError::Validation("No authenticated user".to_string()))?;

        self.tokens.revoke(user_id).await;
        self.cache.increment_counter("logout", 1).await;
        self.audit
            .record(AuditEvent::new(AuditAction::Logout, ctx))
            .await;

        tracing::info!(user_id, "User logged out");
        Ok(())
    }

    pub async fn stats(&self) -> AuthStats {
        let date = today();
        AuthStats {
            login_success: self.cache.counter("login_success", &date).await,
            login_failed: self.cache.counter("login_failed", &date).await,
            token_refresh: self.cache.counter("token_refresh", &date).await,
            logout: self.cache.counter("logout", &date).await,
            active_sessions: self.cache.keys("refresh_token:*", SESSION_SCAN_CAP).await.len(),
            date,
        }
    }

    /// Remove stored refresh tokens whose user is gone or whose token no
    /// longer verifies.
    pub async fn cleanup(&self, ctx: &RequestContext) -> SessionCleanupReport {
        let keys = self.cache.keys("refresh_token:*", SESSION_SCAN_CAP).await;
        let mut report = SessionCleanupReport {
            sessions_checked: keys.len(),
            sessions_removed: 0,
        };

        for key in keys {
            let user_id = key
                .strip_prefix("refresh_token:")
                .and_then(|id| id.parse::<u64>().ok());
            let stale = match (user_id, self.cache.get(&key).await) {
                (Some(id), Some(token)) => {
                    self.store.get(id).await.is_none()
                        || self.tokens.verify_refresh(&token).is_err()
                }
                (_, None) => continue,
                (None, Some(_)) => true,
            };

            if stale && self.cache.delete(&key).await {
                report.sessions_removed += 1;
            }
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::SessionCleanup, ctx).details(json!({
                    "sessionsChecked": report.sessions_checked,
                    "sessionsRemoved": report.sessions_removed,
                })),
            )
            .await;

        tracing::info!(
            sessions_checked = report.sessions_checked,
            sessions_removed = report.sessions_removed,
            "Session cleanup finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_defaults;
    use crate::models::{AuditFilters, NewUser, UserType};
    use crate::services::tokens::refresh_token_key;

    async fn service() -> (AuthService, Arc<CredentialStore>, Cache, AuditLog) {
        let config = test_defaults();
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
        let tokens = TokenService::new(&config.jwt, cache.clone(), store.clone());
        (
            AuthService::new(store.clone(), tokens, cache.clone(), audit.clone()),
            store,
            cache,
            audit,
        )
    }

    #[tokio::test]
    async fn test_login_success() {
        let (auth, _, _, _) = service().await;
        let resp = auth
            .login("admin@example.com", "admin123".to_string(), &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(resp.user.id, 1);
        assert_eq!(resp.expires_in, 24 * 3600);
        assert_eq!(auth.stats().await.login_success, 1);
        assert_eq!(auth.stats().await.active_sessions, 1);
    }

    #[tokio::test]
    async fn test_login_failure_is_audited_once() {
        let (auth, _, _, audit) = service().await;
        let result = auth
            .login("admin@example.com", "wrong".to_string(), &RequestContext::default())
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidCredentials)));

        let failed = audit
            .query(&AuditFilters {
                action: Some(AuditAction::LoginFailed),
                ..Default::default()
            })
            .await;
        assert_eq!(failed.total, 1);
        assert!(!failed.entries[0].success);
        assert_eq!(failed.entries[0].user_email.as_deref(), Some("admin@example.com"));
    }

    #[tokio::test]
    async fn test_refresh_and_logout() {
        let (auth, _, _, _) = service().await;
        let ctx = RequestContext::default();
        let login = auth
            .login("admin@example.com", "admin123".to_string(), &ctx)
            .await
            .unwrap();

        let refreshed = auth.refresh(&login.refresh_token, &ctx).await.unwrap();
        assert!(matches!(
            auth.refresh(&login.refresh_token, &ctx).await,
            Err(ServiceError::InvalidRefreshToken)
        ));

        let user_ctx = RequestContext {
            user_id: Some(1),
            ..Default::default()
        };
        auth.logout(&user_ctx).await.unwrap();
        assert!(auth.refresh(&refreshed.refresh_token, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_removes_sessions_of_deleted_users() {
        let (auth, store, cache, _) = service().await;
        let hash = store.hash(Password::new("secret1".to_string())).await.unwrap();
        let jane = store
            .create(NewUser {
                name: "Jane".to_string(),
                email: "jane@example.com".to_string(),
                user_type: UserType::User,
                password_hash: hash,
            })
            .await
            .unwrap();

        let ctx = RequestContext::default();
        auth.login("jane@example.com", "secret1".to_string(), &ctx)
            .await
            .unwrap();
        auth.login("admin@example.com", "admin123".to_string(), &ctx)
            .await
            .unwrap();
        cache.set("refresh_token:99", "garbage", 60).await;

        store.delete(jane.id).await.unwrap();

        let report = auth.cleanup(&ctx).await;
        assert_eq!(report.sessions_checked, 3);
        assert_eq!(report.sessions_removed, 2);
        assert!(cache.get(&refresh_token_key(1)).await.is_some());
    }
}
