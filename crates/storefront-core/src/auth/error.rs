use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    RegistrationFailed(String),

    #[error("{0}")]
    VerificationFailed(String),

    #[error("{0}")]
    ResendFailed(String),

    #[error("{0}")]
    PasswordOperationFailed(String),

    #[error("{0}")]
    FetchFailed(String),

    /// Renewal failed; local credentials have already been cleared
    #[error("{0}")]
    RefreshFailed(String),

    #[error("Unable to reach the server: {0}")]
    NetworkError(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session storage failed: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl AuthError {
    /// Classify a failure for the operation that produced it.
    ///
    /// Transport failures become `NetworkError`, other API failures become
    /// `kind` carrying the server's message (or `default` when it sent
    /// none). Errors already classified, such as `RefreshFailed`, pass
    /// through unchanged.
    pub(crate) fn classify(self, kind: fn(String) -> AuthError, default: &str) -> AuthError {
        match self {
            AuthError::Api(api) => Self::from_api(api, kind, default),
            other => other,
        }
    }

    pub(crate) fn from_api(api: ApiError, kind: fn(String) -> AuthError, default: &str) -> AuthError {
        match api {
            ApiError::Network(e) => AuthError::NetworkError(e.to_string()),
            other => kind(other.server_message().unwrap_or(default).to_string()),
        }
    }

    /// True for the terminal renewal failure that forces a sign-out
    pub fn is_session_expired(&self) -> bool {
        matches!(self, AuthError::RefreshFailed(_))
    }
}
