use sqlx::PgPool;

use crate::domain::{NewUser, User};
use crate::StoreError;

const USER_COLUMNS: &str =
    "id, username, email, hashed_password, full_name, is_active, is_superuser, created_at";

pub async fn create_user(pool: &PgPool, user: &NewUser) -> Result<User, StoreError> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (username, email, hashed_password, full_name, is_superuser)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.hashed_password)
    .bind(&user.full_name)
    .bind(user.is_superuser)
    .fetch_one(pool)
    .await
    .map_err(|e| StoreError::from_write(e, "username or email already registered"))
}

pub async fn find_user_by_username(pool: &PgPool, username: &str) -> Result<Option<User>, StoreError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn count_users(pool: &PgPool) -> Result<i64, StoreError> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(n)
}
