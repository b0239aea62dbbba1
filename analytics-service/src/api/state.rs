use std::time::Instant;

use sqlx::PgPool;

use crate::{auth::TokenSigner, config::AppConfig, ml::MlService};

pub struct AppState {
    pub pool: PgPool,
    pub tokens: TokenSigner,
    pub ml: MlService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pool: PgPool, cfg: &AppConfig) -> Self {
        let secret = cfg.auth.secret_key.as_deref().unwrap_or_default();
        Self {
            tokens: TokenSigner::new(secret, cfg.auth.access_token_expire_minutes),
            ml: MlService::new(pool.clone(), cfg.ml.clone()),
            pool,
            started_at: Instant::now(),
        }
    }
}
