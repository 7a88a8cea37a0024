use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Unique per issued token so two tokens minted in the same second differ.
    pub jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn secret<'a>(&self, config: &'a Config) -> &'a [u8] {
        match self {
            TokenKind::Access => config.access_secret(),
            TokenKind::Refresh => config.refresh_secret(),
        }
    }

    pub fn ttl(&self, config: &Config) -> Duration {
        match self {
            TokenKind::Access => Duration::minutes(config.auth.access_token_minutes),
            TokenKind::Refresh => Duration::days(config.auth.refresh_token_days),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub fn issue(kind: TokenKind, user_id: &str, config: &Config) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + kind.ttl(config)).timestamp(),
        iat: now.timestamp(),
        jti: uuid::Uuid::now_v7().to_string(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(kind.secret(config)),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {}", e)))
}

pub fn issue_pair(user_id: &str, config: &Config) -> AppResult<TokenPair> {
    Ok(TokenPair {
        access: issue(TokenKind::Access, user_id, config)?,
        refresh: issue(TokenKind::Refresh, user_id, config)?,
    })
}

/// Check signature and expiry. Returns the claims or the decoding error.
pub fn verify(
    kind: TokenKind,
    token: &str,
    config: &Config,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(kind.secret(config)),
        &validation,
    )
    .map(|data| data.claims)
}

/// Generate a random 64-character hex signing secret.
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Compare a presented token against the stored one without early exit.
pub fn tokens_match(presented: &str, stored: &str) -> bool {
    let a = presented.as_bytes();
    let b = stored.as_bytes();

    let len_match = a.len() == b.len();
    let max_len = a.len().max(b.len());

    let mut result = 0u8;
    for i in 0..max_len {
        let byte_a = a.get(i).copied().unwrap_or(0);
        let byte_b = b.get(i).copied().unwrap_or(0);
        result |= byte_a ^ byte_b;
    }

    len_match && result == 0
}
