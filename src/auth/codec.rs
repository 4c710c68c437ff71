/// Stateless signer/verifier for the bearer token pair.
///
/// Access and long-lived (refresh) tokens are independently signed HS256
/// JWTs using two distinct secrets. Verification is signature + expiry
/// only; whether a refresh token is still honored is the session ledger's
/// call, keyed by the token's one-way fingerprint.
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::claims::{Claims, Role};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Which half of the pair a token claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// A freshly issued token pair. Never persisted as-is: the refresh token
/// is tracked server-side only by its fingerprint.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenCodec {
    settings: JwtSettings,
}

impl TokenCodec {
    /// Settings must have passed `JwtSettings::validate` at startup.
    pub fn new(settings: JwtSettings) -> Self {
        Self { settings }
    }

    pub fn refresh_token_expiry(&self) -> i64 {
        self.settings.refresh_token_expiry
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Access => self.settings.access_secret.as_bytes(),
            TokenKind::Refresh => self.settings.refresh_secret.as_bytes(),
        }
    }

    fn expiry(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.settings.access_token_expiry,
            TokenKind::Refresh => self.settings.refresh_token_expiry,
        }
    }

    fn sign(
        &self,
        account_id: Uuid,
        email: &str,
        role: Role,
        kind: TokenKind,
    ) -> Result<String, AppError> {
        let claims = Claims::new(
            account_id,
            email.to_string(),
            role,
            self.expiry(kind),
            self.settings.issuer.clone(),
        );

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret(kind)),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Issue a fresh access/refresh pair for an account.
    pub fn issue_pair(
        &self,
        account_id: Uuid,
        email: &str,
        role: Role,
    ) -> Result<TokenPair, AppError> {
        let access_token = self.sign(account_id, email, role, TokenKind::Access)?;
        let refresh_token = self.sign(account_id, email, role, TokenKind::Refresh)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.settings.access_token_expiry,
        })
    }

    /// Validate signature and expiry, returning the embedded claims.
    ///
    /// An elapsed TTL on an otherwise valid token is `TokenExpired`; any
    /// other failure (bad signature, wrong secret, malformed shape) is
    /// `TokenInvalid`, so callers can give differentiated guidance.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.settings.issuer]);
        validation.leeway = 0;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret(kind)),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::Auth(AuthError::TokenExpired)
            }
            _ => AppError::Auth(AuthError::TokenInvalid),
        })
    }

    /// One-way, deterministic fingerprint of a raw token.
    ///
    /// This is the only form in which a refresh token ever reaches
    /// storage, so a leaked database yields no usable tokens.
    pub fn fingerprint(raw_token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_token.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
