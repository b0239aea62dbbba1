use energy_client::{db::user_queries, domain::NewUser, StoreError};
use sqlx::PgPool;

use super::hash_password;
use crate::config::AuthConfig;

/// Creates the configured superuser on an empty user table. Does nothing when
/// no bootstrap password is configured or any user already exists.
pub async fn ensure_bootstrap_admin(pool: &PgPool, cfg: &AuthConfig) -> anyhow::Result<()> {
    let Some(password) = cfg.bootstrap_admin_password.clone() else {
        return Ok(());
    };
    if user_queries::count_users(pool).await? > 0 {
        tracing::debug!("users exist, skipping bootstrap admin");
        return Ok(());
    }

    let hashed_password = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
    let admin = NewUser {
        username: cfg.bootstrap_admin_username.clone(),
        email: None,
        hashed_password,
        full_name: Some("Administrator".to_string()),
        is_superuser: true,
    };

    match user_queries::create_user(pool, &admin).await {
        Ok(user) => {
            tracing::info!(username = %user.username, "created bootstrap admin user");
            Ok(())
        }
        // Another instance got there first.
        Err(StoreError::Conflict(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
