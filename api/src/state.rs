use std::sync::Arc;

use sqlx::PgPool;

use aitodo_core::auth::TokenIssuer;

use crate::config::AppConfig;
use crate::google::GoogleVerifier;
use crate::inference::InferenceClient;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub tokens: Arc<TokenIssuer>,
    pub google: GoogleVerifier,
    pub inference: InferenceClient,
}

impl AppState {
    pub fn new(db: PgPool, config: &AppConfig) -> Self {
        let http = reqwest::Client::new();
        Self {
            db,
            tokens: Arc::new(TokenIssuer::new(
                config.jwt_secret.as_bytes(),
                config.access_token_ttl,
                config.refresh_token_ttl,
            )),
            google: GoogleVerifier::new(http.clone(), config.google.clone()),
            inference: InferenceClient::new(http, config.inference.clone()),
        }
    }
}
