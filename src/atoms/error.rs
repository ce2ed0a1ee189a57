// Hive Atoms: Error
//
// One coarse-grained error enum for the whole crate. Call sites that need a
// human-readable string (IPC responses, platform adapter replies) use the
// `From<HiveError> for String` conversion below rather than matching on
// variants themselves.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HiveError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authorization mismatch: {0}")]
    AuthMismatch(String),

    #[error("store i/o error: {0}")]
    StoreIo(String),

    #[error("store constraint violation: {0}")]
    StoreConstraint(String),

    #[error("store corrupt: {0}")]
    StoreCorrupt(String),

    #[error("provider auth error ({provider}): {message}")]
    ProviderAuth { provider: String, message: String },

    #[error("provider request error ({provider}): {message}")]
    ProviderRequest { provider: String, message: String },

    #[error("provider transient error ({provider}): {message}")]
    ProviderTransient { provider: String, message: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<rusqlite::Error> for HiveError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                HiveError::StoreConstraint(err.to_string())
            }
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::DatabaseCorrupt
                    || e.code == rusqlite::ErrorCode::NotADatabase =>
            {
                HiveError::StoreCorrupt(err.to_string())
            }
            other => HiveError::StoreIo(other.to_string()),
        }
    }
}

impl From<String> for HiveError {
    fn from(s: String) -> Self {
        HiveError::Other(s)
    }
}

impl From<&str> for HiveError {
    fn from(s: &str) -> Self {
        HiveError::Other(s.to_string())
    }
}

impl From<HiveError> for String {
    fn from(err: HiveError) -> Self {
        err.to_string()
    }
}

pub type HiveResult<T> = Result<T, HiveError>;

impl HiveError {
    pub fn provider_auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        HiveError::ProviderAuth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn provider_request(provider: impl Into<String>, message: impl Into<String>) -> Self {
        HiveError::ProviderRequest {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn provider_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        HiveError::ProviderTransient {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversion_round_trips_message() {
        let err: HiveError = "boom".into();
        let msg: String = err.into();
        assert_eq!(msg, "boom");
    }

    #[test]
    fn provider_constructors_set_both_fields() {
        let err = HiveError::provider_auth("openai", "bad key");
        match err {
            HiveError::ProviderAuth { provider, message } => {
                assert_eq!(provider, "openai");
                assert_eq!(message, "bad key");
            }
            _ => panic!("wrong variant"),
        }
    }
}
