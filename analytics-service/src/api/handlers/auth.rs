use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use energy_client::{
    db::user_queries,
    domain::{NewUser, User},
    StoreError,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    api::{
        error::ApiError,
        extract::{ApiForm, ApiJson, CurrentUser},
        state::AppState,
    },
    auth::{hash_password, verify_password, AuthError},
};

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

const MIN_PASSWORD_LEN: usize = 8;

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let username = self.username.trim();
        if username.len() < 3 || username.len() > 50 {
            return Err(ApiError::Unprocessable("username must be 3 to 50 characters".to_string()));
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(ApiError::Unprocessable("email is not a valid address".to_string())),
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::Unprocessable(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))
}

pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    ApiForm(form): ApiForm<TokenForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = user_queries::find_user_by_username(&state.pool, &form.username).await?;
    let Some(user) = user else {
        tracing::info!(username = %form.username, "token request for unknown user");
        return Err(AuthError::InvalidCredentials.into());
    };

    let stored = user.hashed_password.clone();
    let password = form.password;
    if !run_blocking(move || verify_password(&password, &stored)).await? {
        tracing::info!(username = %user.username, "token request with wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }
    if !user.is_active {
        return Err(AuthError::Inactive.into());
    }

    let access_token = state.tokens.issue(&user.username, OffsetDateTime::now_utc())?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: state.tokens.ttl().whole_seconds(),
    }))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    req.validate()?;

    let password = req.password.clone();
    let hashed_password = run_blocking(move || hash_password(&password)).await??;

    let new_user = NewUser {
        username: req.username.trim().to_string(),
        email: Some(req.email.trim().to_lowercase()),
        hashed_password,
        full_name: req.full_name,
        is_superuser: false,
    };
    let user = user_queries::create_user(&state.pool, &new_user)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ApiError::BadRequest("username or email already registered".to_string()),
            other => other.into(),
        })?;

    tracing::info!(username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            full_name: None,
        }
    }

    #[test]
    fn registration_validation() {
        assert!(request("alice", "alice@example.com", "longenough").validate().is_ok());
        assert!(request("al", "alice@example.com", "longenough").validate().is_err());
        assert!(request("alice", "not-an-email", "longenough").validate().is_err());
        assert!(request("alice", "alice@example.com", "short").validate().is_err());
    }
}
