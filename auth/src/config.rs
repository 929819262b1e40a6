use crate::error::{AuthError, Result};
use crate::password::HashCost;
use chrono::Duration;

/// Settings of the auth use cases.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret tokens are signed with.
    pub jwt_secret: String,

    /// How long an issued token stays valid.
    pub token_ttl: Duration,

    /// Password hashing cost.
    pub hash_cost: HashCost,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::hours(24),
            hash_cost: HashCost::default(),
        }
    }

    /// Reads `AUTH_JWT_SECRET` (required) and `AUTH_TOKEN_TTL_SECS` from the
    /// environment.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("AUTH_JWT_SECRET")
            .map_err(|_| AuthError::Config("AUTH_JWT_SECRET is not set".into()))?;
        let mut config = Self::new(secret);
        if let Ok(ttl) = std::env::var("AUTH_TOKEN_TTL_SECS") {
            let seconds: i64 = ttl
                .parse()
                .map_err(|e| AuthError::Config(format!("AUTH_TOKEN_TTL_SECS: {}", e)))?;
            config.token_ttl = Duration::try_seconds(seconds).ok_or_else(|| {
                AuthError::Config(format!("AUTH_TOKEN_TTL_SECS out of range: {}", seconds))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            return Err(AuthError::Config("jwt_secret must not be empty".into()));
        }
        if self.token_ttl <= Duration::zero() {
            return Err(AuthError::Config("token_ttl must be positive".into()));
        }
        Ok(())
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_hash_cost(mut self, cost: HashCost) -> Self {
        self.hash_cost = cost;
        self
    }
}
