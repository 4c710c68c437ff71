//! End-to-end tests for the credential and session lifecycle, driven over
//! HTTP against a disposable database per test.
//!
//! Requires a local Postgres reachable with the settings in
//! `configuration.yaml`; run with `cargo test -- --ignored`.

use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::net::TcpListener;

use authgate::configuration::{get_configuration, DatabaseSettings, Settings};
use authgate::startup::run;

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
}

async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

async fn spawn_app_with(tweak: impl FnOnce(&mut Settings)) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    // Nothing listens here; deliveries fail fast and are logged, which is
    // exactly the fire-and-forget contract.
    configuration.email.base_url = "http://127.0.0.1:1".to_string();
    // Generous defaults so multi-request tests never trip the gate; the
    // rate-limit test lowers these itself.
    configuration.rate_limit.auth_limit = 1000;
    configuration.rate_limit.sensitive_limit = 1000;
    configuration.application.password_hash_cost = 4;
    tweak(&mut configuration);

    let connection_pool = configure_database(&configuration.database).await;

    let server =
        run(listener, connection_pool.clone(), configuration).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        db_pool: connection_pool,
    }
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");

    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn post_json(
    client: &reqwest::Client,
    url: String,
    body: serde_json::Value,
) -> reqwest::Response {
    client
        .post(&url)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request.")
}

async fn stored_code(app: &TestApp, email: &str, purpose: &str) -> String {
    sqlx::query_scalar::<_, String>(
        "SELECT code FROM email_verifications WHERE email = $1 AND purpose = $2",
    )
    .bind(email)
    .bind(purpose)
    .fetch_one(&app.db_pool)
    .await
    .expect("Failed to fetch stored verification code")
}

async fn register(app: &TestApp, client: &reqwest::Client, email: &str) -> reqwest::Response {
    post_json(
        client,
        format!("{}/auth/register", app.address),
        serde_json::json!({
            "name": "Ann",
            "email": email,
            "password": "Aa123456",
        }),
    )
    .await
}

async fn register_and_verify(app: &TestApp, client: &reqwest::Client, email: &str) {
    let response = register(app, client, email).await;
    assert_eq!(201, response.status().as_u16());

    let code = stored_code(app, email, "registration").await;
    let response = post_json(
        client,
        format!("{}/auth/verify-email", app.address),
        serde_json::json!({ "email": email, "code": code }),
    )
    .await;
    assert_eq!(200, response.status().as_u16());
}

async fn login(
    app: &TestApp,
    client: &reqwest::Client,
    email: &str,
    password: &str,
) -> reqwest::Response {
    post_json(
        client,
        format!("{}/auth/login", app.address),
        serde_json::json!({ "email": email, "password": password }),
    )
    .await
}

async fn refresh(app: &TestApp, client: &reqwest::Client, token: &str) -> reqwest::Response {
    post_json(
        client,
        format!("{}/auth/refresh", app.address),
        serde_json::json!({ "refresh_token": token }),
    )
    .await
}

// --- Registration ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn register_creates_an_unverified_account() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = register(&app, &client, "a@test.com").await;
    assert_eq!(201, response.status().as_u16());

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert!(body.get("account_id").is_some());

    let (email_verified, role): (bool, String) = sqlx::query_as::<_, (bool, String)>(
        "SELECT email_verified, role FROM users WHERE email = 'a@test.com'",
    )
    .fetch_one(&app.db_pool)
    .await
    .expect("Failed to fetch created account");
    assert!(!email_verified);
    assert_eq!(role, "member");

    // A registration code is outstanding.
    let code = stored_code(&app, "a@test.com", "registration").await;
    assert_eq!(code.len(), 6);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn registering_the_same_email_twice_is_a_conflict() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    assert_eq!(201, register(&app, &client, "a@test.com").await.status());

    let response = register(&app, &client, "a@test.com").await;
    assert_eq!(409, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_EMAIL");
}

// --- Login ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn login_before_verification_fails_with_email_not_verified() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    assert_eq!(201, register(&app, &client, "a@test.com").await.status());

    let response = login(&app, &client, "a@test.com", "Aa123456").await;
    assert_eq!(403, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "EMAIL_NOT_VERIFIED");
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn bad_password_and_unknown_email_fail_identically() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;

    let wrong_password = login(&app, &client, "a@test.com", "Bb123456").await;
    let unknown_email = login(&app, &client, "nobody@test.com", "Aa123456").await;

    assert_eq!(401, wrong_password.status().as_u16());
    assert_eq!(401, unknown_email.status().as_u16());

    let body_a: serde_json::Value = wrong_password.json().await.unwrap();
    let body_b: serde_json::Value = unknown_email.json().await.unwrap();
    assert_eq!(body_a["code"], body_b["code"]);
    assert_eq!(body_a["message"], body_b["message"]);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn verified_login_returns_profile_and_token_pair() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;

    let response = login(&app, &client, "a@test.com", "Aa123456").await;
    assert_eq!(200, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["email"], "a@test.com");
    assert_eq!(body["user"]["email_verified"], true);
    assert!(body["tokens"]["access_token"].is_string());
    assert!(body["tokens"]["refresh_token"].is_string());

    // Only the fingerprint of the refresh token is stored.
    let stored: String =
        sqlx::query_scalar("SELECT token_hash FROM refresh_tokens WHERE token_hash IS NOT NULL")
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_ne!(stored, body["tokens"]["refresh_token"].as_str().unwrap());
}

// --- Verification codes ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn reissuing_a_code_invalidates_the_previous_one() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    assert_eq!(201, register(&app, &client, "a@test.com").await.status());
    let first_code = stored_code(&app, "a@test.com", "registration").await;

    let response = post_json(
        &client,
        format!("{}/auth/resend-verification", app.address),
        serde_json::json!({ "email": "a@test.com" }),
    )
    .await;
    assert_eq!(200, response.status().as_u16());

    let second_code = stored_code(&app, "a@test.com", "registration").await;

    // The superseded code is rejected even if it happens to collide.
    if first_code != second_code {
        let stale = post_json(
            &client,
            format!("{}/auth/verify-email", app.address),
            serde_json::json!({ "email": "a@test.com", "code": first_code }),
        )
        .await;
        assert_eq!(400, stale.status().as_u16());
    }

    let fresh = post_json(
        &client,
        format!("{}/auth/verify-email", app.address),
        serde_json::json!({ "email": "a@test.com", "code": second_code }),
    )
    .await;
    assert_eq!(200, fresh.status().as_u16());
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn a_code_cannot_be_consumed_twice() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    assert_eq!(201, register(&app, &client, "a@test.com").await.status());
    let code = stored_code(&app, "a@test.com", "registration").await;

    let first = post_json(
        &client,
        format!("{}/auth/verify-email", app.address),
        serde_json::json!({ "email": "a@test.com", "code": code }),
    )
    .await;
    assert_eq!(200, first.status().as_u16());

    let second = post_json(
        &client,
        format!("{}/auth/verify-email", app.address),
        serde_json::json!({ "email": "a@test.com", "code": code }),
    )
    .await;
    assert_eq!(400, second.status().as_u16());

    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["code"], "CODE_INVALID_OR_EXPIRED");
}

// --- Refresh rotation and replay detection ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn replaying_a_rotated_token_revokes_every_session() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;
    let session: serde_json::Value = login(&app, &client, "a@test.com", "Aa123456")
        .await
        .json()
        .await
        .unwrap();
    let original = session["tokens"]["refresh_token"].as_str().unwrap().to_string();

    // First rotation succeeds and yields a new pair.
    let rotated = refresh(&app, &client, &original).await;
    assert_eq!(200, rotated.status().as_u16());
    let rotated: serde_json::Value = rotated.json().await.unwrap();
    let successor = rotated["tokens"]["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(original, successor);

    // Replaying the pre-rotation token is the reuse signal.
    let replay = refresh(&app, &client, &original).await;
    assert_eq!(401, replay.status().as_u16());
    let body: serde_json::Value = replay.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_INVALID");

    // Containment: the post-rotation token is revoked too.
    let contained = refresh(&app, &client, &successor).await;
    assert_eq!(401, contained.status().as_u16());
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn a_forged_but_never_issued_token_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = refresh(&app, &client, "not.a.token").await;
    assert_eq!(401, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_INVALID");
}

// --- Logout ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn logout_revokes_the_session_and_is_idempotent() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;
    let session: serde_json::Value = login(&app, &client, "a@test.com", "Aa123456")
        .await
        .json()
        .await
        .unwrap();
    let token = session["tokens"]["refresh_token"].as_str().unwrap().to_string();

    let url = format!("{}/auth/logout", app.address);
    let first = post_json(&client, url.clone(), serde_json::json!({ "refresh_token": token })).await;
    assert_eq!(200, first.status().as_u16());

    // Revoking an already-absent fingerprint still reports success.
    let second = post_json(&client, url, serde_json::json!({ "refresh_token": token })).await;
    assert_eq!(200, second.status().as_u16());
}

// --- Password reset ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn forgot_password_response_is_identical_for_any_email() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;

    let url = format!("{}/auth/forgot-password", app.address);
    let existing = post_json(&client, url.clone(), serde_json::json!({ "email": "a@test.com" })).await;
    let missing = post_json(&client, url, serde_json::json!({ "email": "ghost@test.com" })).await;

    assert_eq!(200, existing.status().as_u16());
    assert_eq!(200, missing.status().as_u16());

    let body_a: serde_json::Value = existing.json().await.unwrap();
    let body_b: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body_a, body_b);

    // Only the real account got a code.
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM email_verifications WHERE purpose = 'password_reset'")
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn reset_code_precheck_does_not_consume_the_code() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;
    post_json(
        &client,
        format!("{}/auth/forgot-password", app.address),
        serde_json::json!({ "email": "a@test.com" }),
    )
    .await;
    let code = stored_code(&app, "a@test.com", "password_reset").await;

    // The precheck can run any number of times; resetting still works after.
    let url = format!("{}/auth/verify-reset-code", app.address);
    for _ in 0..2 {
        let response = post_json(
            &client,
            url.clone(),
            serde_json::json!({ "email": "a@test.com", "code": code }),
        )
        .await;
        assert_eq!(200, response.status().as_u16());
    }

    let response = post_json(
        &client,
        format!("{}/auth/reset-password", app.address),
        serde_json::json!({ "email": "a@test.com", "code": code, "new_password": "Bb654321" }),
    )
    .await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn reset_password_rotates_credentials_and_revokes_sessions() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;
    let session: serde_json::Value = login(&app, &client, "a@test.com", "Aa123456")
        .await
        .json()
        .await
        .unwrap();
    let old_refresh = session["tokens"]["refresh_token"].as_str().unwrap().to_string();

    post_json(
        &client,
        format!("{}/auth/forgot-password", app.address),
        serde_json::json!({ "email": "a@test.com" }),
    )
    .await;
    let code = stored_code(&app, "a@test.com", "password_reset").await;

    let response = post_json(
        &client,
        format!("{}/auth/reset-password", app.address),
        serde_json::json!({ "email": "a@test.com", "code": code, "new_password": "Bb654321" }),
    )
    .await;
    assert_eq!(200, response.status().as_u16());

    // Old password is dead, new one works.
    assert_eq!(401, login(&app, &client, "a@test.com", "Aa123456").await.status());
    assert_eq!(200, login(&app, &client, "a@test.com", "Bb654321").await.status());

    // Every pre-reset session is gone.
    assert_eq!(401, refresh(&app, &client, &old_refresh).await.status());
}

// --- Authenticated routes ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn me_requires_a_valid_access_token() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;

    let unauthenticated = client
        .get(&format!("{}/auth/me", app.address))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, unauthenticated.status().as_u16());

    let session: serde_json::Value = login(&app, &client, "a@test.com", "Aa123456")
        .await
        .json()
        .await
        .unwrap();
    let access = session["tokens"]["access_token"].as_str().unwrap();

    let me = client
        .get(&format!("{}/auth/me", app.address))
        .bearer_auth(access)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, me.status().as_u16());
    let body: serde_json::Value = me.json().await.unwrap();
    assert_eq!(body["email"], "a@test.com");
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn change_password_requires_the_current_one_and_revokes_sessions() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_and_verify(&app, &client, "a@test.com").await;
    let session: serde_json::Value = login(&app, &client, "a@test.com", "Aa123456")
        .await
        .json()
        .await
        .unwrap();
    let access = session["tokens"]["access_token"].as_str().unwrap().to_string();
    let old_refresh = session["tokens"]["refresh_token"].as_str().unwrap().to_string();

    let url = format!("{}/auth/change-password", app.address);
    let wrong_current = client
        .post(&url)
        .bearer_auth(&access)
        .json(&serde_json::json!({ "current_password": "Wrong123", "new_password": "Bb654321" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, wrong_current.status().as_u16());

    let changed = client
        .post(&url)
        .bearer_auth(&access)
        .json(&serde_json::json!({ "current_password": "Aa123456", "new_password": "Bb654321" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, changed.status().as_u16());

    assert_eq!(401, refresh(&app, &client, &old_refresh).await.status());
    assert_eq!(200, login(&app, &client, "a@test.com", "Bb654321").await.status());
}

// --- Rate limiting ---

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn the_sensitive_tier_throttles_reset_probing() {
    let app = spawn_app_with(|settings| {
        settings.rate_limit.sensitive_limit = 2;
    })
    .await;
    let client = reqwest::Client::new();

    let url = format!("{}/auth/forgot-password", app.address);
    for _ in 0..2 {
        let response = post_json(&client, url.clone(), serde_json::json!({ "email": "a@test.com" })).await;
        assert_eq!(200, response.status().as_u16());
    }

    // A spoofed forwarding header does not buy a fresh window; the gate is
    // keyed on the transport peer.
    let throttled = client
        .post(&url)
        .header("X-Forwarded-For", "10.99.99.1")
        .json(&serde_json::json!({ "email": "a@test.com" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(429, throttled.status().as_u16());
    assert!(throttled.headers().get("Retry-After").is_some());

    let body: serde_json::Value = throttled.json().await.unwrap();
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
}
