use std::time::Duration;

/// Crate-wide result type for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token not recognized by the guard.
    #[error("invalid token")]
    InvalidToken,

    /// Username/password pair rejected.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Username already registered.
    #[error("user already exists: {username}")]
    UserExists { username: String },

    /// Too many attempts for this throttle key.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Password hashing or verification failed internally.
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// The guard did not answer within its deadline.
    #[error("guard validation timed out")]
    Timeout,

    /// Wrapped source error from an external guard or provider.
    #[error("auth backend failed: {context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn backend(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
