#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

//! Bearer token authentication for PushBox.
//!
//! Tokens are standard three-segment signed tokens (HS256 over a shared
//! secret). Verification is an explicit result value: the caller consumes
//! [`TokenAuth::verify_token`] and decides what to do with a failure; nothing
//! here unwinds.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a PushBox bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (client identity)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token is expired")]
    Expired,
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Invalid token issuer")]
    InvalidIssuer,
    #[error("Invalid token audience")]
    InvalidAudience,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Failed to encode token: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

/// Mints and verifies bearer tokens against a fixed issuer, audience, and
/// shared secret.
#[derive(Clone)]
pub struct TokenAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiry_secs: i64,
}

impl std::fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuth")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiry_secs", &self.expiry_secs)
            .finish_non_exhaustive()
    }
}

impl TokenAuth {
    #[must_use]
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        expiry_secs: i64,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            audience: audience.into(),
            expiry_secs,
        }
    }

    /// Mint a new signed token for `sub`.
    ///
    /// # Errors
    ///
    /// * If token encoding fails
    pub fn create_token(&self, sub: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiry_secs);

        let claims = Claims {
            sub: sub.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(AuthError::Encode)
    }

    /// Verify a token's signature, issuer, audience, and validity window,
    /// returning its claims.
    ///
    /// # Errors
    ///
    /// * If the token is malformed, tampered with, from the wrong issuer or
    ///   audience, or outside its validity window
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data: TokenData<Claims> =
            decode(token, &self.decoding_key, &validation).map_err(|err| {
                use jsonwebtoken::errors::ErrorKind;

                match err.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                    ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                    ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                    _ => AuthError::Invalid(err.to_string()),
                }
            })?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn auth() -> TokenAuth {
        TokenAuth::new("secret", "auth0", "aud0", 3600)
    }

    #[test]
    fn valid_token_verifies_within_its_window() {
        let auth = auth();

        let token = auth.create_token("client123").unwrap();
        let claims = auth.verify_token(&token).unwrap();

        assert_eq!(claims.sub, "client123");
        assert_eq!(claims.iss, "auth0");
        assert_eq!(claims.aud, "aud0");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let auth = auth();

        let token = auth.create_token("client123").unwrap();
        let (message, _signature) = token.rsplit_once('.').unwrap();
        let tampered = format!("{message}.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");

        assert!(matches!(
            auth.verify_token(&tampered),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let other = TokenAuth::new("secret", "intruder", "aud0", 3600);

        let token = other.create_token("client123").unwrap();

        assert!(matches!(
            auth().verify_token(&token),
            Err(AuthError::InvalidIssuer)
        ));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let other = TokenAuth::new("secret", "auth0", "elsewhere", 3600);

        let token = other.create_token("client123").unwrap();

        assert!(matches!(
            auth().verify_token(&token),
            Err(AuthError::InvalidAudience)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        // minted already two hours past expiry, beyond any leeway
        let stale = TokenAuth::new("secret", "auth0", "aud0", -7200);

        let token = stale.create_token("client123").unwrap();

        assert!(matches!(
            auth().verify_token(&token),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let other = TokenAuth::new("not-the-secret", "auth0", "aud0", 3600);

        let token = other.create_token("client123").unwrap();

        assert!(matches!(
            auth().verify_token(&token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            auth().verify_token("not-a-token"),
            Err(AuthError::Invalid(_))
        ));
    }
}
