use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Panics at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Optional: when unset, every analysis takes the deterministic
    /// keyword-fallback path instead of calling the remote model.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_max_output_tokens: u32,
    pub gemini_max_retries: u32,
    pub gemini_max_backoff_ms: u64,
    pub max_file_size_mb: u64,
    pub throttle_window_ms: u64,
    pub throttle_limit: usize,
    pub app_env: String,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            gemini_model: optional_env("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_max_output_tokens: parse_env("GEMINI_MAX_OUTPUT_TOKENS", 2048)?,
            gemini_max_retries: parse_env("GEMINI_MAX_RETRIES", 2)?,
            gemini_max_backoff_ms: parse_env("GEMINI_MAX_BACKOFF_MS", 8000)?,
            max_file_size_mb: parse_env("MAX_FILE_SIZE_MB", 10)?,
            throttle_window_ms: parse_env("THROTTLE_WINDOW_MS", 60_000)?,
            throttle_limit: parse_env("THROTTLE_LIMIT", 10)?,
            app_env: optional_env("APP_ENV", "development"),
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG", "info"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// The size limit enforced on analyzable documents, in bytes.
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
