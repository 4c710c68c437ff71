/// Session token ledger: issued long-lived tokens, tracked by fingerprint.
///
/// A refresh token is honored only while its fingerprint exists, unexpired,
/// in this ledger. Rotation atomically replaces the old fingerprint with
/// the new one, so at most one long-lived token per rotation chain is ever
/// valid and a replayed pre-rotation token is detectable by its absence.
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Record a freshly issued token's fingerprint.
pub async fn record<'e>(
    executor: impl PgExecutor<'e>,
    account_id: Uuid,
    fingerprint: &str,
    ttl_seconds: i64,
) -> Result<(), AppError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(fingerprint)
    .bind(now + Duration::seconds(ttl_seconds))
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Look up an unexpired token by fingerprint.
pub async fn find_by_fingerprint(
    pool: &PgPool,
    fingerprint: &str,
) -> Result<Option<SessionToken>, AppError> {
    let token = sqlx::query_as::<_, SessionToken>(
        "SELECT * FROM refresh_tokens WHERE token_hash = $1 AND expires_at > now()",
    )
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    Ok(token)
}

/// Atomically swap the old fingerprint for the new one.
///
/// The DELETE must hit exactly one row; otherwise the transaction aborts
/// with `NotFound`. Two concurrent rotations of the same token can only
/// delete the row once, so exactly one of them wins.
pub async fn rotate(
    pool: &PgPool,
    old_fingerprint: &str,
    account_id: Uuid,
    new_fingerprint: &str,
    ttl_seconds: i64,
) -> Result<(), AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
        .bind(old_fingerprint)
        .execute(&mut tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        return Err(AppError::Database(DatabaseError::NotFound(
            "refresh token".to_string(),
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(new_fingerprint)
    .bind(now + Duration::seconds(ttl_seconds))
    .bind(now)
    .execute(&mut tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Revoke a single token. Revoking an absent fingerprint is a no-op, so
/// logout stays idempotent.
pub async fn revoke<'e>(executor: impl PgExecutor<'e>, fingerprint: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
        .bind(fingerprint)
        .execute(executor)
        .await?;

    Ok(())
}

/// Revoke every token for an account: logout-all, password change/reset,
/// and replay containment.
pub async fn revoke_all<'e>(
    executor: impl PgExecutor<'e>,
    account_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(account_id)
        .execute(executor)
        .await?;

    tracing::info!(account_id = %account_id, "All session tokens revoked for account");
    Ok(())
}

/// Delete rows past expiry. Validity never depends on this running:
/// `find_by_fingerprint` filters expired rows itself.
pub async fn sweep_expired(pool: &PgPool) -> Result<u64, AppError> {
    let rows = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= now()")
        .execute(pool)
        .await?
        .rows_affected();

    Ok(rows)
}
