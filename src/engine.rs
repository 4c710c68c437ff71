/// The authentication engine: every public operation and every security
/// invariant of the credential/session core.
///
/// The HTTP layer validates input shape and hands normalized values to
/// these methods. Merged failure shapes, the verified-email gate,
/// single-use codes, rotation discipline and replay containment are all
/// decided here and in the store transactions this layer drives.
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, TokenCodec, TokenKind, TokenPair};
use crate::email_client::EmailClient;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::store::verification_codes::CodePurpose;
use crate::store::{accounts, session_tokens, verification_codes};

/// Account view safe to return to callers: no password hash.
#[derive(Debug, Serialize)]
pub struct AccountProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub email_verified: bool,
    pub created_at: String,
}

impl From<accounts::Account> for AccountProfile {
    fn from(account: accounts::Account) -> Self {
        Self {
            id: account.id.to_string(),
            email: account.email,
            name: account.name,
            role: account.role,
            email_verified: account.email_verified,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct AuthEngine {
    pool: PgPool,
    codec: TokenCodec,
    email_client: EmailClient,
    hash_cost: u32,
}

impl AuthEngine {
    pub fn new(pool: PgPool, codec: TokenCodec, email_client: EmailClient, hash_cost: u32) -> Self {
        Self {
            pool,
            codec,
            email_client,
            hash_cost,
        }
    }

    /// Queue a code email without tying its fate to the caller's request.
    /// Delivery failure is logged; the user can always request a resend.
    fn spawn_code_email(&self, to: String, name: String, purpose: CodePurpose, code: String) {
        let client = self.email_client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send_code(&to, &name, purpose, &code).await {
                tracing::error!(error = %e, recipient = %to, "Code email delivery failed");
            }
        });
    }

    /// Register a new account and issue its email verification code.
    ///
    /// The pre-check gives a friendly failure; the unique constraint on
    /// email is what actually closes the check-then-insert race.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Uuid, AppError> {
        if accounts::find_by_email(&self.pool, email).await?.is_some() {
            return Err(AppError::Database(DatabaseError::DuplicateEmail));
        }

        let password_hash = hash_password(password, self.hash_cost)?;
        let account = accounts::create(&self.pool, email, name, &password_hash).await?;

        let code = verification_codes::issue(&self.pool, email, CodePurpose::Registration).await?;
        self.spawn_code_email(
            account.email.clone(),
            account.name.clone(),
            CodePurpose::Registration,
            code,
        );

        tracing::info!(account_id = %account.id, "Account registered");
        Ok(account.id)
    }

    /// Consume a registration code and mark the account verified, as one
    /// transaction: either both happen or neither does.
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<AccountProfile, AppError> {
        let account = accounts::find_by_email(&self.pool, email)
            .await?
            .ok_or(AppError::Auth(AuthError::CodeInvalidOrExpired))?;

        let mut tx = self.pool.begin().await?;
        verification_codes::consume(&mut tx, email, code, CodePurpose::Registration).await?;
        let account = accounts::mark_email_verified(&mut tx, account.id).await?;
        tx.commit().await?;

        tracing::info!(account_id = %account.id, "Email verified");

        let client = self.email_client.clone();
        let (to, name) = (account.email.clone(), account.name.clone());
        tokio::spawn(async move {
            if let Err(e) = client.send_welcome(&to, &name).await {
                tracing::error!(error = %e, recipient = %to, "Welcome email delivery failed");
            }
        });

        Ok(account.into())
    }

    /// Re-issue a registration code.
    ///
    /// The response is identical whether the account is missing, already
    /// verified, or pending; only the pending case actually acts, so a
    /// prober learns nothing from this route.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AppError> {
        if let Some(account) = accounts::find_by_email(&self.pool, email).await? {
            if !account.email_verified {
                let code =
                    verification_codes::issue(&self.pool, email, CodePurpose::Registration).await?;
                self.spawn_code_email(account.email, account.name, CodePurpose::Registration, code);
            }
        }
        Ok(())
    }

    /// Authenticate and open a session.
    ///
    /// "No such account" and "wrong password" fail identically so the
    /// route cannot be used for email enumeration.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(AccountProfile, TokenPair), AppError> {
        let account = accounts::find_by_email(&self.pool, email)
            .await?
            .ok_or(AppError::Auth(AuthError::InvalidCredentials))?;

        if !verify_password(password, &account.password_hash)? {
            return Err(AppError::Auth(AuthError::InvalidCredentials));
        }

        if !account.email_verified {
            return Err(AppError::Auth(AuthError::EmailNotVerified));
        }

        let pair = self
            .codec
            .issue_pair(account.id, &account.email, account.role()?)?;
        session_tokens::record(
            &self.pool,
            account.id,
            &TokenCodec::fingerprint(&pair.refresh_token),
            self.codec.refresh_token_expiry(),
        )
        .await?;
        accounts::touch_last_login(&self.pool, account.id).await?;

        tracing::info!(account_id = %account.id, "Login succeeded");
        Ok((account.into(), pair))
    }

    /// Rotate a long-lived token, detecting replay.
    ///
    /// A token that verifies cryptographically but has no ledger entry was
    /// either already rotated away or forged from a leaked value, so every
    /// session for that account is revoked. Losing the rotate race *after*
    /// a successful lookup is a concurrent refresh of the same token: that
    /// caller just fails, without the mass revocation, so client retries
    /// cannot trigger logout storms.
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self.codec.verify(raw_refresh_token, TokenKind::Refresh)?;
        let account_id = claims.account_id()?;

        let account = accounts::find_by_id(&self.pool, account_id)
            .await?
            .ok_or(AppError::Auth(AuthError::TokenInvalid))?;

        let fingerprint = TokenCodec::fingerprint(raw_refresh_token);
        if session_tokens::find_by_fingerprint(&self.pool, &fingerprint)
            .await?
            .is_none()
        {
            tracing::warn!(
                account_id = %account.id,
                "Refresh token not in ledger; possible reuse, revoking all sessions"
            );
            session_tokens::revoke_all(&self.pool, account.id).await?;
            return Err(AppError::Auth(AuthError::TokenInvalid));
        }

        // Mint from the stored row, not the old claims, so a role or email
        // change propagates at the next rotation.
        let pair = self
            .codec
            .issue_pair(account.id, &account.email, account.role()?)?;
        let new_fingerprint = TokenCodec::fingerprint(&pair.refresh_token);

        match session_tokens::rotate(
            &self.pool,
            &fingerprint,
            account.id,
            &new_fingerprint,
            self.codec.refresh_token_expiry(),
        )
        .await
        {
            Ok(()) => Ok(pair),
            Err(AppError::Database(DatabaseError::NotFound(_))) => {
                tracing::info!(
                    account_id = %account.id,
                    "Lost a concurrent rotation race; rejecting without revocation"
                );
                Err(AppError::Auth(AuthError::TokenInvalid))
            }
            Err(e) => Err(e),
        }
    }

    /// Close the session behind one long-lived token. Idempotent: an
    /// already-revoked token still logs out successfully.
    pub async fn logout(&self, raw_refresh_token: &str) -> Result<(), AppError> {
        self.codec.verify(raw_refresh_token, TokenKind::Refresh)?;
        session_tokens::revoke(&self.pool, &TokenCodec::fingerprint(raw_refresh_token)).await?;
        Ok(())
    }

    pub async fn logout_all(&self, account_id: Uuid) -> Result<(), AppError> {
        session_tokens::revoke_all(&self.pool, account_id).await
    }

    /// Start a password reset. The caller always gets the same answer;
    /// a code is issued and sent only when the account actually exists.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        if let Some(account) = accounts::find_by_email(&self.pool, email).await? {
            let code =
                verification_codes::issue(&self.pool, email, CodePurpose::PasswordReset).await?;
            self.spawn_code_email(account.email, account.name, CodePurpose::PasswordReset, code);
        }
        Ok(())
    }

    /// Non-consuming validity check for a reset code. Must not consume:
    /// the same code has to be presentable to `reset_password` next.
    pub async fn verify_reset_code(&self, email: &str, code: &str) -> Result<(), AppError> {
        if !verification_codes::peek(&self.pool, email, code, CodePurpose::PasswordReset).await? {
            return Err(AppError::Auth(AuthError::CodeInvalidOrExpired));
        }
        Ok(())
    }

    /// Consume the reset code, store the new hash, and revoke every
    /// session in one transaction; the user then logs in fresh everywhere.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let account = accounts::find_by_email(&self.pool, email)
            .await?
            .ok_or(AppError::Auth(AuthError::CodeInvalidOrExpired))?;

        let new_hash = hash_password(new_password, self.hash_cost)?;

        let mut tx = self.pool.begin().await?;
        verification_codes::consume(&mut tx, email, code, CodePurpose::PasswordReset).await?;
        accounts::update_password_hash(&mut tx, account.id, &new_hash).await?;
        session_tokens::revoke_all(&mut tx, account.id).await?;
        tx.commit().await?;

        tracing::info!(account_id = %account.id, "Password reset completed");
        Ok(())
    }

    /// Change password for an authenticated account; all other sessions
    /// are revoked.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let account = accounts::find_by_id(&self.pool, account_id)
            .await?
            .ok_or(AppError::Auth(AuthError::InvalidCredentials))?;

        if !verify_password(current_password, &account.password_hash)? {
            return Err(AppError::Auth(AuthError::InvalidCredentials));
        }

        let new_hash = hash_password(new_password, self.hash_cost)?;

        let mut tx = self.pool.begin().await?;
        accounts::update_password_hash(&mut tx, account.id, &new_hash).await?;
        session_tokens::revoke_all(&mut tx, account.id).await?;
        tx.commit().await?;

        tracing::info!(account_id = %account.id, "Password changed");
        Ok(())
    }

    pub async fn current_account(&self, account_id: Uuid) -> Result<AccountProfile, AppError> {
        let account = accounts::find_by_id(&self.pool, account_id)
            .await?
            .ok_or(AppError::Auth(AuthError::TokenInvalid))?;
        Ok(account.into())
    }

    /// Sweep expired session tokens and verification codes. Housekeeping
    /// only; every read path re-checks expiry itself.
    pub async fn cleanup(&self) -> Result<(u64, u64), AppError> {
        let tokens = session_tokens::sweep_expired(&self.pool).await?;
        let codes = verification_codes::sweep_expired(&self.pool).await?;

        if tokens > 0 || codes > 0 {
            tracing::info!(
                expired_tokens = tokens,
                expired_codes = codes,
                "Expiry sweep completed"
            );
        }
        Ok((tokens, codes))
    }
}
