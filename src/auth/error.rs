// Authentication Error Types
// Errors surfaced by the session lifecycle, the session store and the provider gateway

use thiserror::Error;

use crate::identity::IdentityError;

/// Why an interactive login did not produce a delegation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginFailure {
    /// The user closed or abandoned the provider window
    #[error("login was interrupted by the user")]
    UserInterrupt,

    /// The user declined, or the provider reported an error
    #[error("identity provider rejected the login: {0}")]
    Rejected(String),

    /// The provider window could not be opened
    #[error("identity provider window unavailable: {0}")]
    WindowUnavailable(String),

    /// The provider answered with a delegation that cannot be used
    #[error("identity provider returned an invalid delegation: {0}")]
    InvalidDelegation(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    LoginRejected(#[from] LoginFailure),

    #[error("A login is already in progress")]
    LoginAlreadyInFlight,

    #[error("Already authenticated")]
    AlreadyAuthenticated,

    #[error("Session manager has not been initialized")]
    NotInitialized,

    /// Fatal: outbound requests would be signed with the wrong identity
    #[error("Failed to bind identity to request channel: {0}")]
    ChannelBinding(String),
}

/// Session store failures; recovered locally by the session manager
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session store unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("Stored session is corrupt: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl From<IdentityError> for StoreError {
    fn from(err: IdentityError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl AuthError {
    /// Whether the caller may simply try the same operation again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::LoginAlreadyInFlight
                | AuthError::LoginRejected(LoginFailure::UserInterrupt)
                | AuthError::LoginRejected(LoginFailure::WindowUnavailable(_))
        )
    }
}
