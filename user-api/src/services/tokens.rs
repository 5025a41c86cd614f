use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::cache::Cache;
use super::store::CredentialStore;
use super::ServiceError;
use crate::config::JwtConfig;
use crate::models::User;

pub const REFRESH_TOKEN_TYPE: &str = "refresh";

pub fn refresh_token_key(user_id: u64) -> String {
    format!("refresh_token:{}", user_id)
}

/// Claims shared by access and refresh tokens.
///
/// `token_type` is the user's role on access tokens and `"refresh"` on
/// refresh tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub id: u64,
    pub email: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// HS256 token issuing and verification. Holds the single live refresh
/// token per user in the cache backend.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry: Duration,
    refresh_token_expiry: Duration,
    cache: Cache,
    store: Arc<CredentialStore>,
}

impl TokenService {
    pub fn new(config: &JwtConfig, cache: Cache, store: Arc<CredentialStore>) -> Self {
        let secret = config.secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_expiry: Duration::hours(config.access_token_expiry_hours),
            refresh_token_expiry: Duration::days(config.refresh_token_expiry_days),
            cache,
            store,
        }
    }

    fn sign(&self, user: &User, token_type: &str, lifetime: Duration) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            id: user.id,
            email: user.email.clone(),
            token_type: token_type.to_string(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    fn decode(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::ExpiredToken,
                _ => ServiceError::InvalidToken,
            })
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, ServiceError> {
        self.sign(user, user.user_type.as_str(), self.access_token_expiry)
    }

    /// Issue a refresh token and store it as the user's only live one.
    pub async fn issue_refresh_token(&self, user: &User) -> Result<String, ServiceError> {
        let token = self.sign(user, REFRESH_TOKEN_TYPE, self.refresh_token_expiry)?;
        let ttl = self.refresh_token_expiry.num_seconds().max(1) as u64;

        if !self.cache.set(&refresh_token_key(user.id), &token, ttl).await {
            tracing::warn!(user_id = user.id, "Refresh token not stored; it will not be redeemable");
        }

        Ok(token)
    }

    pub async fn issue_pair(&self, user: &User) -> Result<TokenPair, ServiceError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(user)?,
            refresh_token: self.issue_refresh_token(user).await?,
            expires_in: self.access_token_expiry.num_seconds(),
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, ServiceError> {
        let claims = self.decode(token)?;
        if claims.token_type == REFRESH_TOKEN_TYPE {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, ServiceError> {
        let claims = self.decode(token)?;
        if claims.token_type != REFRESH_TOKEN_TYPE {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    /// Redeem a refresh token for a new pair. The presented token is
    /// consumed, so a second redemption fails.
    pub async fn refresh(&self, token: &str) -> Result<(User, TokenPair), ServiceError> {
        let claims = self
            .verify_refresh(token)
            .map_err(|_| ServiceError::InvalidRefreshToken)?;

        if !self
            .cache
            .compare_and_delete(&refresh_token_key(claims.id), token)
            .await
        {
            tracing::warn!(user_id = claims.id, "Refresh token is not the stored one");
            return Err(ServiceError::InvalidRefreshToken);
        }

        let user = self
            .store
            .get(claims.id)
            .await
            .ok_or(ServiceError::InvalidRefreshToken)?;

        let pair = self.issue_pair(&user).await?;
        Ok((user, pair))
    }

    /// Drop the stored refresh token for `user_id`.
    pub async fn revoke(&self, user_id: u64) -> bool {
        self.cache.delete(&refresh_token_key(user_id)).await
    }
}
