use std::time::Duration;

pub const DEFAULT_GOOGLE_TOKENINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/tokeninfo";
pub const DEFAULT_INFERENCE_URL: &str = "https://models.github.ai/inference/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek/DeepSeek-V3-0324";

/// Process configuration, read once at startup and passed down through
/// `AppState`. Nothing below `main` reads the environment.
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub google: GoogleConfig,
    pub inference: InferenceConfig,
    pub cors_origins: Vec<String>,
    pub port: u16,
}

#[derive(Clone)]
pub struct GoogleConfig {
    pub tokeninfo_url: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct InferenceConfig {
    pub url: String,
    /// Bearer token for the inference endpoint. Planning is unavailable without it.
    pub token: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is not a valid URL ('{value}'): {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let parse_url = |key: &'static str, default: &str| -> Result<String, ConfigError> {
            let value = get(key).unwrap_or_else(|| default.to_string());
            url::Url::parse(&value).map_err(|e| ConfigError::InvalidUrl {
                name: key,
                value: value.clone(),
                reason: e.to_string(),
            })?;
            Ok(value)
        };

        let database_url = require("DATABASE_URL")?;
        let jwt_secret = require("JWT_SECRET_KEY")?;

        let google = GoogleConfig {
            tokeninfo_url: parse_url("GOOGLE_TOKENINFO_URL", DEFAULT_GOOGLE_TOKENINFO_URL)?,
            timeout: Duration::from_secs(parse_or(&get, "GOOGLE_VERIFY_TIMEOUT_SECS", 10)),
        };

        let inference = InferenceConfig {
            url: parse_url("AI_INFERENCE_URL", DEFAULT_INFERENCE_URL)?,
            token: get("GITHUB_TOKEN"),
            model: get("AI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_or(&get, "AI_TEMPERATURE", 0.7),
            top_p: parse_or(&get, "AI_TOP_P", 0.9),
            max_tokens: parse_or(&get, "AI_MAX_TOKENS", 1500),
            timeout: Duration::from_secs(parse_or(&get, "AI_TIMEOUT_SECS", 30)),
        };

        let cors_origins = get("AITODO_CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&get, "AITODO_DB_MAX_CONNECTIONS", 10),
            jwt_secret,
            access_token_ttl: chrono::Duration::minutes(parse_or(
                &get,
                "AITODO_ACCESS_TOKEN_TTL_MINUTES",
                60,
            )),
            refresh_token_ttl: chrono::Duration::days(parse_or(
                &get,
                "AITODO_REFRESH_TOKEN_TTL_DAYS",
                7,
            )),
            google,
            inference,
            cors_origins,
            port: parse_or(&get, "PORT", 8000),
        })
    }
}

/// Parse an optional numeric setting, warning and falling back on garbage.
fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = key, value = %raw, "invalid config value, using default");
            default
        }),
    }
}
