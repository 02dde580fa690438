//! Signed session tokens.

use jsonwebtoken::{decode, encode, errors::Error, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub id: String,
    /// Privilege flag.
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
    /// Issued at, seconds since the Unix epoch.
    pub iat: u64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// Issues and verifies HS256 session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer from a shared secret.
    #[must_use]
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Token lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue(&self, user_id: &str, is_admin: bool) -> Result<String, Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let claims = Claims {
            id: user_id.to_string(),
            is_admin,
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is invalid or the token expired.
    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        decode::<Claims>(token, &self.decoding, &Validation::default()).map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let token = issuer.issue("user-1", false).unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.id, "user-1");
        assert!(!claims.is_admin);
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let other = TokenIssuer::new(b"other", Duration::from_secs(60));
        let token = issuer.issue("user-1", false).unwrap();

        assert!(other.verify(&token).is_err());
        assert!(issuer.verify("garbage").is_err());
    }
}
