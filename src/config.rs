use std::time::Duration;

use anyhow::{bail, Context};

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL under which uploaded objects are publicly reachable.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub secure: bool,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub cookies: CookieConfig,
    pub server: ServerConfig,
}

/// Longest accepted token lifetime.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const SESSION_COOKIE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL")?;
        let database_max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let jwt = JwtConfig {
            access_secret: std::env::var("ACCESS_TOKEN_SECRET").context("ACCESS_TOKEN_SECRET")?,
            refresh_secret: std::env::var("REFRESH_TOKEN_SECRET")
                .context("REFRESH_TOKEN_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "account-service".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "account-service-users".into()),
            access_ttl: parse_expiry(
                &std::env::var("ACCESS_TOKEN_EXPIRY").unwrap_or_else(|_| "15m".into()),
            )
            .context("ACCESS_TOKEN_EXPIRY")?,
            refresh_ttl: parse_expiry(
                &std::env::var("REFRESH_TOKEN_EXPIRY").unwrap_or_else(|_| "10d".into()),
            )
            .context("REFRESH_TOKEN_EXPIRY")?,
        };
        jwt.validate()?;

        let endpoint = std::env::var("STORAGE_ENDPOINT").context("STORAGE_ENDPOINT")?;
        let bucket = std::env::var("STORAGE_BUCKET").context("STORAGE_BUCKET")?;
        let public_url = std::env::var("STORAGE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let storage = StorageConfig {
            access_key: std::env::var("STORAGE_ACCESS_KEY").context("STORAGE_ACCESS_KEY")?,
            secret_key: std::env::var("STORAGE_SECRET_KEY").context("STORAGE_SECRET_KEY")?,
            region: std::env::var("STORAGE_REGION").unwrap_or_else(|_| "us-east-1".into()),
            endpoint,
            bucket,
            public_url,
        };

        let cookies = CookieConfig {
            secure: std::env::var("COOKIE_SECURE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            max_age: SESSION_COOKIE_MAX_AGE,
        };

        let server = ServerConfig {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("APP_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8080),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            jwt,
            storage,
            cookies,
            server,
        })
    }
}

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            bail!("token secrets must not be empty");
        }
        if self.access_secret == self.refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }
        if self.access_ttl.is_zero() || self.refresh_ttl.is_zero() {
            bail!("token lifetimes must be positive");
        }
        if self.access_ttl > MAX_TOKEN_TTL || self.refresh_ttl > MAX_TOKEN_TTL {
            bail!(
                "token lifetimes must not exceed {} days",
                MAX_TOKEN_TTL.as_secs() / 86_400
            );
        }
        Ok(())
    }
}

/// Parses lifetimes such as `900`, `15m`, `12h` or `10d`. A bare number is seconds.
pub fn parse_expiry(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.char_indices().last() {
        Some((idx, 's')) => (&raw[..idx], 1),
        Some((idx, 'm')) => (&raw[..idx], 60),
        Some((idx, 'h')) => (&raw[..idx], 60 * 60),
        Some((idx, 'd')) => (&raw[..idx], 24 * 60 * 60),
        Some(_) => (raw, 1),
        None => bail!("empty duration"),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid duration {raw:?}"))?;
    let secs = value
        .checked_mul(multiplier)
        .with_context(|| format!("duration {raw:?} is too large"))?;
    Ok(Duration::from_secs(secs))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
