/// Verification code ledger: outstanding one-time codes keyed by
/// (email, purpose).
///
/// Invariant: at most one unconsumed, unexpired code per (email, purpose);
/// issuing replaces any prior outstanding code. A code flips unconsumed to
/// consumed exactly once and is inert afterwards.
use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::postgres::PgExecutor;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AuthError};

/// Codes expire 15 minutes after issuance.
const CODE_TTL_MINUTES: i64 = 15;

/// What a code proves control of an email address for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePurpose {
    Registration,
    PasswordReset,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Registration => "registration",
            CodePurpose::PasswordReset => "password_reset",
        }
    }
}

/// Uniform random 6-digit code, leading zeros preserved.
fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Issue a fresh code for (email, purpose), invalidating any outstanding
/// one. Delete-then-insert runs in one transaction so two concurrent
/// issues cannot leave two live codes.
pub async fn issue(pool: &PgPool, email: &str, purpose: CodePurpose) -> Result<String, AppError> {
    let code = generate_code();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM email_verifications WHERE email = $1 AND purpose = $2")
        .bind(email)
        .bind(purpose.as_str())
        .execute(&mut tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO email_verifications (id, email, code, purpose, expires_at, consumed, created_at)
        VALUES ($1, $2, $3, $4, $5, false, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(&code)
    .bind(purpose.as_str())
    .bind(now + Duration::minutes(CODE_TTL_MINUTES))
    .bind(now)
    .execute(&mut tx)
    .await?;

    tx.commit().await?;

    Ok(code)
}

/// Consume a matching code: flips `consumed` in a single UPDATE against
/// the full predicate. Wrong code, expired code, already-consumed code,
/// and purpose mismatch all yield the same generic failure.
pub async fn consume<'e>(
    executor: impl PgExecutor<'e>,
    email: &str,
    code: &str,
    purpose: CodePurpose,
) -> Result<(), AppError> {
    let rows = sqlx::query(
        r#"
        UPDATE email_verifications
        SET consumed = true
        WHERE email = $1 AND code = $2 AND purpose = $3
          AND consumed = false AND expires_at > now()
        "#,
    )
    .bind(email)
    .bind(code)
    .bind(purpose.as_str())
    .execute(executor)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(AppError::Auth(AuthError::CodeInvalidOrExpired));
    }

    Ok(())
}

/// Read-only check on the same predicate as `consume`, without consuming.
///
/// Used by the reset-code precheck: the caller must still be able to
/// present the same code to the actual reset operation.
pub async fn peek<'e>(
    executor: impl PgExecutor<'e>,
    email: &str,
    code: &str,
    purpose: CodePurpose,
) -> Result<bool, AppError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM email_verifications
            WHERE email = $1 AND code = $2 AND purpose = $3
              AND consumed = false AND expires_at > now()
        )
        "#,
    )
    .bind(email)
    .bind(code)
    .bind(purpose.as_str())
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

/// Delete rows past expiry. Housekeeping only: expiry is always also
/// enforced in the `consume`/`peek` predicates.
pub async fn sweep_expired(pool: &PgPool) -> Result<u64, AppError> {
    let rows = sqlx::query("DELETE FROM email_verifications WHERE expires_at <= now()")
        .execute(pool)
        .await?
        .rows_affected();

    Ok(rows)
}
