use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;

use crate::auth::TokenCodec;
use crate::configuration::Settings;
use crate::email_client::EmailClient;
use crate::engine::AuthEngine;
use crate::middleware::AccessTokenMiddleware;
use crate::rate_gate::RateGate;
use crate::routes::{
    change_password, forgot_password, get_current_user, health_check, login, logout, logout_all,
    refresh, register, resend_verification, reset_password, verify_email, verify_reset_code,
};

pub fn run(listener: TcpListener, pool: PgPool, settings: Settings) -> Result<Server, std::io::Error> {
    let codec = TokenCodec::new(settings.jwt.clone());
    let email_client = EmailClient::new(settings.email.clone(), reqwest::Client::new());
    let engine = web::Data::new(AuthEngine::new(
        pool,
        codec.clone(),
        email_client,
        settings.application.password_hash_cost,
    ));
    let gate = web::Data::new(RateGate::new(settings.rate_limit.clone()));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .app_data(gate.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/verify-email", web::post().to(verify_email))
            .route(
                "/auth/resend-verification",
                web::post().to(resend_verification),
            )
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
            .route("/auth/forgot-password", web::post().to(forgot_password))
            .route("/auth/verify-reset-code", web::post().to(verify_reset_code))
            .route("/auth/reset-password", web::post().to(reset_password))
            // Routes behind access token validation
            .service(
                web::scope("/auth")
                    .wrap(AccessTokenMiddleware::new(codec.clone()))
                    .route("/me", web::get().to(get_current_user))
                    .route("/logout-all", web::post().to(logout_all))
                    .route("/change-password", web::post().to(change_password)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
