use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::time::Duration;

use authgate::configuration::get_configuration;
use authgate::engine::AuthEngine;
use authgate::startup::run;
use authgate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting authgate");

    // Configuration load includes JWT secret validation; a weak or missing
    // signing secret refuses to boot here.
    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let connection_string = configuration.database.connection_string();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&connection_string)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    tracing::info!("Database connection pool created");

    // Background expiry sweep. Correctness never depends on it; expiry is
    // also checked at read time.
    {
        let engine = AuthEngine::new(
            pool.clone(),
            authgate::auth::TokenCodec::new(configuration.jwt.clone()),
            authgate::email_client::EmailClient::new(
                configuration.email.clone(),
                reqwest::Client::new(),
            ),
            configuration.application.password_hash_cost,
        );
        let period = Duration::from_secs(configuration.application.cleanup_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if let Err(e) = engine.cleanup().await {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        });
    }

    let address = format!("127.0.0.1:{}", configuration.application.port);
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, pool, configuration)?;
    server.await
}
