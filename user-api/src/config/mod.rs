use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::models::api_version;

#[derive(Debug, Clone)]
pub struct UserApiConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub admin: AdminConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub versioning: VersioningConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Unset means the in-process backend is used.
    pub url: Option<String>,
    pub enabled: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub access_token_expiry_hours: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Argon2 memory cost is `2^work_factor` KiB.
    pub work_factor: u32,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub name: String,
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
    pub login_attempts: u32,
    pub login_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub users_list_ttl_seconds: u64,
    pub user_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct VersioningConfig {
    pub default_version: String,
}

pub const MIN_PASSWORD_WORK_FACTOR: u32 = 10;
const MAX_PASSWORD_WORK_FACTOR: u32 = 20;

impl UserApiConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = UserApiConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("user-api"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
                enabled: parse_env("CACHE_ENABLED", "true")?,
                timeout_ms: parse_env("REDIS_TIMEOUT_MS", "500")?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env(
                    "JWT_SECRET",
                    Some("dev-only-secret-change-me-before-deploying"),
                    is_prod,
                )?),
                access_token_expiry_hours: parse_env("JWT_ACCESS_TOKEN_EXPIRY_HOURS", "24")?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7")?,
            },
            password: PasswordConfig {
                work_factor: parse_env("PASSWORD_WORK_FACTOR", "12")?,
            },
            admin: AdminConfig {
                name: get_env("ADMIN_NAME", Some("Administrator"), false)?,
                email: get_env("ADMIN_EMAIL", Some("admin@example.com"), false)?,
                password: SecretString::new(get_env("ADMIN_PASSWORD", Some("admin123"), is_prod)?),
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), false)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                max_requests: parse_env("RATE_LIMIT_MAX_REQUESTS", "100")?,
                window_ms: parse_env("RATE_LIMIT_WINDOW_MS", "900000")?,
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5")?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900")?,
            },
            cache: CacheConfig {
                users_list_ttl_seconds: parse_env("CACHE_USERS_LIST_TTL", "300")?,
                user_ttl_seconds: parse_env("CACHE_USER_TTL", "600")?,
            },
            versioning: VersioningConfig {
                default_version: get_env("API_DEFAULT_VERSION", Some("v1"), false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_expiry_hours <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_EXPIRY_HOURS must be positive"));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(config_error("JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"));
        }

        if !(MIN_PASSWORD_WORK_FACTOR..=MAX_PASSWORD_WORK_FACTOR)
            .contains(&self.password.work_factor)
        {
            return Err(config_error(format!(
                "PASSWORD_WORK_FACTOR must be between {} and {}",
                MIN_PASSWORD_WORK_FACTOR, MAX_PASSWORD_WORK_FACTOR
            )));
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window_ms == 0 {
            return Err(config_error(
                "RATE_LIMIT_MAX_REQUESTS and RATE_LIMIT_WINDOW_MS must be positive",
            ));
        }

        if api_version::find(&self.versioning.default_version).is_none() {
            return Err(config_error(format!(
                "API_DEFAULT_VERSION '{}' is not a supported version",
                self.versioning.default_version
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.jwt.secret.expose_secret().len() < 32 {
                return Err(config_error(
                    "JWT_SECRET must be at least 32 characters in production",
                ));
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Prod
    }
}

fn config_error(msg: impl std::fmt::Display) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if required {
                Err(config_error(format!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(config_error(format!("{} is required but not set", key)))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .trim()
        .parse()
        .map_err(|e: T::Err| config_error(format!("{} is invalid: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Fixed settings for tests, using the cheapest allowed password hashing.
pub fn test_defaults() -> UserApiConfig {
    UserApiConfig {
        common: core_config::Config::default(),
        environment: Environment::Test,
        service_name: "user-api".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        redis: RedisConfig {
            url: None,
            enabled: true,
            timeout_ms: 500,
        },
        jwt: JwtConfig {
            secret: SecretString::new("test-secret".to_string()),
            access_token_expiry_hours: 24,
            refresh_token_expiry_days: 7,
        },
        password: PasswordConfig { work_factor: 10 },
        admin: AdminConfig {
            name: "Admin".to_string(),
            email: "admin@example.com".to_string(),
            password: SecretString::new("admin123".to_string()),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            max_requests: 100,
            window_ms: 900_000,
            login_attempts: 5,
            login_window_seconds: 900,
        },
        cache: CacheConfig {
            users_list_ttl_seconds: 300,
            user_ttl_seconds: 600,
        },
        versioning: VersioningConfig {
            default_version: "v1".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("production".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("DEV".parse::<Environment>(), Ok(Environment::Dev));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_validate_rejects_weak_work_factor() {
        let mut config = test_defaults();
        assert!(config.validate().is_ok());

        config.password.work_factor = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_default_version() {
        let mut config = test_defaults();
        config.versioning.default_version = "v9".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prod_requires_long_secret() {
        let mut config = test_defaults();
        config.environment = Environment::Prod;
        assert!(config.validate().is_err());

        config.jwt.secret = SecretString::new("x".repeat(48));
        assert!(config.validate().is_ok());
    }
}
