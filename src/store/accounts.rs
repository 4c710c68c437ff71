/// Credential store: durable record of accounts and their password hashes.
///
/// Pure data access, no policy. Accounts are never physically deleted by
/// this layer. Functions are generic over the executor so the engine can
/// run them inside transactions.
use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::AppError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: String,
    pub email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn role(&self) -> Result<Role, AppError> {
        Role::parse(&self.role)
    }
}

/// Insert a new account with `email_verified = false`.
///
/// A duplicate email surfaces as `DuplicateEmail` from the unique
/// constraint, so a concurrent pre-check race cannot slip through.
pub async fn create<'e>(
    executor: impl PgExecutor<'e>,
    email: &str,
    name: &str,
    password_hash: &str,
) -> Result<Account, AppError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO users (id, email, name, password_hash, role, email_verified, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 'member', false, $5, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(name)
    .bind(password_hash)
    .bind(Utc::now())
    .fetch_one(executor)
    .await?;

    Ok(account)
}

pub async fn find_by_email<'e>(
    executor: impl PgExecutor<'e>,
    email: &str,
) -> Result<Option<Account>, AppError> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(executor)
        .await?;

    Ok(account)
}

pub async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Account>, AppError> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(account)
}

/// Flip the email-verified flag. Flips at most once in practice: the
/// registration code that gates this is single-use.
pub async fn mark_email_verified<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Account, AppError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        UPDATE users
        SET email_verified = true, updated_at = $1
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(account)
}

pub async fn update_password_hash<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    new_hash: &str,
) -> Result<Account, AppError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        UPDATE users
        SET password_hash = $1, updated_at = $2
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(new_hash)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(account)
}

pub async fn touch_last_login<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}
