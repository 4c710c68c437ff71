/// HTTP surface of the authentication engine.
///
/// Handlers stay thin: admit through the rate gate, validate input shape,
/// call the engine, serialize the result. All policy lives in the engine.
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::Claims;
use crate::engine::{AccountProfile, AuthEngine};
use crate::error::AppError;
use crate::rate_gate::{RateGate, RouteClass};
use crate::validators::{is_valid_code, is_valid_email, is_valid_name};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct CodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user: AccountProfile,
    pub tokens: crate::auth::TokenPair,
}

/// The gate is keyed on the transport peer address. Forwarded headers are
/// caller-controlled and would hand out a fresh window per spoofed value,
/// so they are never consulted here.
fn caller_identity(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// POST /auth/register
pub async fn register(
    req: HttpRequest,
    form: web::Json<RegisterRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Auth)?;

    let email = is_valid_email(&form.email)?;
    let name = is_valid_name(&form.name)?;

    let account_id = engine.register(&email, &form.password, &name).await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "Registration successful. Please check your email.",
        "account_id": account_id.to_string(),
    })))
}

/// POST /auth/verify-email
pub async fn verify_email(
    req: HttpRequest,
    form: web::Json<CodeRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Auth)?;

    let email = is_valid_email(&form.email)?;
    let code = is_valid_code(&form.code)?;

    let user = engine.verify_email(&email, &code).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Email verified successfully.",
        "user": user,
    })))
}

/// POST /auth/resend-verification
pub async fn resend_verification(
    req: HttpRequest,
    form: web::Json<EmailRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Sensitive)?;

    let email = is_valid_email(&form.email)?;
    engine.resend_verification(&email).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "If the account needs verification, a new code has been sent.",
    })))
}

/// POST /auth/login
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Auth)?;

    let email = is_valid_email(&form.email)?;
    let (user, tokens) = engine.login(&email, &form.password).await?;

    Ok(HttpResponse::Ok().json(SessionResponse { user, tokens }))
}

/// POST /auth/refresh
pub async fn refresh(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Auth)?;

    let tokens = engine.refresh(&form.refresh_token).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "tokens": tokens })))
}

/// POST /auth/logout
pub async fn logout(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Auth)?;

    engine.logout(&form.refresh_token).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Logged out successfully.",
    })))
}

/// POST /auth/forgot-password
pub async fn forgot_password(
    req: HttpRequest,
    form: web::Json<EmailRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Sensitive)?;

    let email = is_valid_email(&form.email)?;
    engine.forgot_password(&email).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "If an account exists, a password reset code has been sent.",
    })))
}

/// POST /auth/verify-reset-code
pub async fn verify_reset_code(
    req: HttpRequest,
    form: web::Json<CodeRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Sensitive)?;

    let email = is_valid_email(&form.email)?;
    let code = is_valid_code(&form.code)?;
    engine.verify_reset_code(&email, &code).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "valid": true,
        "message": "Code is valid.",
    })))
}

/// POST /auth/reset-password
pub async fn reset_password(
    req: HttpRequest,
    form: web::Json<ResetPasswordRequest>,
    engine: web::Data<AuthEngine>,
    gate: web::Data<RateGate>,
) -> Result<HttpResponse, AppError> {
    gate.check(&caller_identity(&req), RouteClass::Sensitive)?;

    let email = is_valid_email(&form.email)?;
    let code = is_valid_code(&form.code)?;
    engine.reset_password(&email, &code, &form.new_password).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Password has been reset successfully.",
    })))
}

/// POST /auth/logout-all (authenticated)
pub async fn logout_all(
    claims: web::ReqData<Claims>,
    engine: web::Data<AuthEngine>,
) -> Result<HttpResponse, AppError> {
    engine.logout_all(claims.account_id()?).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Logged out from all devices.",
    })))
}

/// POST /auth/change-password (authenticated)
pub async fn change_password(
    claims: web::ReqData<Claims>,
    form: web::Json<ChangePasswordRequest>,
    engine: web::Data<AuthEngine>,
) -> Result<HttpResponse, AppError> {
    engine
        .change_password(
            claims.account_id()?,
            &form.current_password,
            &form.new_password,
        )
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Password changed successfully. Other sessions have been logged out.",
    })))
}

/// GET /auth/me (authenticated)
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    engine: web::Data<AuthEngine>,
) -> Result<HttpResponse, AppError> {
    let user = engine.current_account(claims.account_id()?).await?;
    Ok(HttpResponse::Ok().json(user))
}
