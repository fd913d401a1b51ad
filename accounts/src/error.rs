//! Error types for the accounts core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wallet, role and user operations
#[derive(Error, Debug)]
pub enum Error {
    // Currency errors
    #[error("Invalid currency kind: {0}")]
    InvalidCurrencyKind(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Amount must be an integer, got: {0}")]
    InvalidAmount(String),

    #[error("Cannot send to: {0}")]
    InvalidTarget(String),

    #[error("Balance overflow on wallet {owner}")]
    BalanceOverflow { owner: String },

    // Authorization errors
    #[error("Clearance level {required} out of range {min}..={max}")]
    OutOfRange { required: i32, min: i32, max: i32 },

    #[error("Invalid credentials")]
    InvalidCredentials,

    // User factory errors
    #[error("Users must have an email address")]
    MissingEmail,

    #[error("Users must have a username")]
    MissingUsername,

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Email already taken: {0}")]
    EmailTaken(String),

    // Storage errors
    #[error("No {kind} found for {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigSource(#[from] config::ConfigError),
}

impl Error {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// True for the storage "does not exist" signal that callers are expected to catch
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
