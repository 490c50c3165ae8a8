use serde::Deserialize;

use aitodo_core::users::GoogleProfile;

use crate::config::GoogleConfig;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GoogleVerifyError {
    /// Google rejected the token, or answered without a subject id.
    #[error("Invalid Google token")]
    InvalidCredential,
    /// Network failure or timeout. Distinct so callers can retry instead of re-prompting.
    #[error("Failed to verify Google token: {0}")]
    ProviderUnreachable(String),
}

impl From<GoogleVerifyError> for AppError {
    fn from(err: GoogleVerifyError) -> Self {
        match err {
            GoogleVerifyError::InvalidCredential => AppError::Validation {
                message: err.to_string(),
                field: Some("token".to_string()),
                docs_hint: Some(
                    "Send a current Google OAuth access token obtained by the client.".to_string(),
                ),
            },
            GoogleVerifyError::ProviderUnreachable(_) => AppError::UpstreamUnavailable {
                message: err.to_string(),
            },
        }
    }
}

/// Validates Google OAuth access tokens against the `tokeninfo` endpoint.
#[derive(Clone)]
pub struct GoogleVerifier {
    client: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleVerifier {
    pub fn new(client: reqwest::Client, config: GoogleConfig) -> Self {
        Self { client, config }
    }

    pub async fn verify(&self, token: &str) -> Result<GoogleProfile, GoogleVerifyError> {
        let response = self
            .client
            .get(&self.config.tokeninfo_url)
            .query(&[("access_token", token)])
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| GoogleVerifyError::ProviderUnreachable(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            tracing::warn!(
                status = %response.status(),
                "Google tokeninfo rejected token"
            );
            return Err(GoogleVerifyError::InvalidCredential);
        }

        let info = response
            .json::<TokenInfoResponse>()
            .await
            .map_err(|_| GoogleVerifyError::InvalidCredential)?;

        profile_from_token_info(info)
    }
}

fn profile_from_token_info(info: TokenInfoResponse) -> Result<GoogleProfile, GoogleVerifyError> {
    let google_id = info
        .sub
        .filter(|sub| !sub.trim().is_empty())
        .ok_or(GoogleVerifyError::InvalidCredential)?;

    Ok(GoogleProfile::new(
        google_id,
        info.email.unwrap_or_default(),
        info.name.as_deref().unwrap_or(""),
        info.picture.as_deref().unwrap_or(""),
    ))
}
