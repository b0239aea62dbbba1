pub mod bootstrap;
pub mod password;
pub mod token;

pub use bootstrap::ensure_bootstrap_admin;
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenSigner};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("incorrect username or password")]
    InvalidCredentials,
    #[error("inactive user")]
    Inactive,
    #[error("could not validate credentials")]
    InvalidToken,
    #[error("token has expired")]
    Expired,
    #[error("password hashing failed: {0}")]
    Hash(String),
}
