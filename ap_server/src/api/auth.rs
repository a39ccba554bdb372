//! Bearer token verification.
//!
//! Tokens are HS256 JWTs issued by the account service; this server only
//! checks them. The `sub` claim carries the numeric user id.

use arena_pay::UserId;
use jsonwebtoken::{DecodingKey, Validation, decode, errors::Error as JwtError};
use serde::{Deserialize, Serialize};

/// Claims read from an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: UserId,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    #[serde(default)]
    pub iat: i64,
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Decode and check signature and expiry
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        decode::<AccessTokenClaims>(token, &self.key, &self.validation).map(|data| data.claims)
    }
}
