use config::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    pub email: EmailSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub port: u16,
    /// Bcrypt work factor for password hashing.
    pub password_hash_cost: u32,
    /// Seconds between background expiry sweeps.
    pub cleanup_interval_seconds: u64,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Signing configuration for the bearer token pair.
///
/// Access and refresh tokens are signed with two distinct secrets so a
/// token minted for one purpose can never verify as the other.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry: i64,  // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64, // seconds (e.g., 1209600 for 14 days)
    pub issuer: String,
}

const MIN_SECRET_LENGTH: usize = 32;

impl JwtSettings {
    /// Validate the signing secrets once at startup.
    ///
    /// A misconfigured signer is not recoverable at request time, so the
    /// process refuses to boot on a missing, weak, or reused secret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "jwt.access_secret is missing or shorter than {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if self.refresh_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "jwt.refresh_secret is missing or shorter than {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::Message(
                "jwt access and refresh secrets must be different".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailSettings {
    pub base_url: String,
    pub sender: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: u64,
    /// Limit for login/registration-adjacent routes.
    pub auth_limit: u32,
    /// Limit for password-reset-adjacent routes.
    pub sensitive_limit: u32,
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.jwt.validate()?;
    Ok(settings)
}
