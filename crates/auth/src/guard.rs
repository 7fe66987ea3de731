use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    context::AuthContext,
    error::{Error, Result},
    session::SessionStore,
};

/// Validates an opaque token into an [`AuthContext`].
///
/// Deployments plug in their own scheme (JWT verification, an upstream
/// identity service). Validation may suspend; the runtime wraps calls in a
/// configurable deadline.
#[async_trait]
pub trait TokenGuard: Send + Sync {
    async fn validate(&self, token: &str) -> Result<AuthContext>;
}

/// Guard over a fixed token table. Used by tests and single-tenant
/// deployments that provision tokens out of band.
#[derive(Default)]
pub struct StaticTokenGuard {
    tokens: HashMap<String, AuthContext>,
}

impl StaticTokenGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, context: AuthContext) -> Self {
        self.tokens.insert(token.into(), context);
        self
    }
}

#[async_trait]
impl TokenGuard for StaticTokenGuard {
    async fn validate(&self, token: &str) -> Result<AuthContext> {
        self.tokens.get(token).cloned().ok_or(Error::InvalidToken)
    }
}

/// Guard that accepts bearer tokens minted by `POST /auth/login`, backed by
/// the in-memory session store.
pub struct SessionTokenGuard {
    sessions: Arc<SessionStore>,
}

impl SessionTokenGuard {
    #[must_use]
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl TokenGuard for SessionTokenGuard {
    async fn validate(&self, token: &str) -> Result<AuthContext> {
        self.sessions.validate(token).ok_or(Error::InvalidToken)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_guard_validates_known_tokens() {
        let guard = StaticTokenGuard::new()
            .with_token("t1", AuthContext::for_subject("u1", ["user"], Vec::<String>::new()));

        let ctx = guard.validate("t1").await.unwrap();
        assert_eq!(ctx.subject.as_deref(), Some("u1"));
        assert!(matches!(guard.validate("nope").await, Err(Error::InvalidToken)));
    }

    #[tokio::test]
    async fn session_guard_tracks_store() {
        let sessions = Arc::new(SessionStore::new(std::time::Duration::from_secs(60)));
        let token = sessions.create(AuthContext::for_subject("u2", ["user"], ["chat.send"]));
        let guard = SessionTokenGuard::new(Arc::clone(&sessions));

        let ctx = guard.validate(&token).await.unwrap();
        assert_eq!(ctx.subject.as_deref(), Some("u2"));

        sessions.delete(&token);
        assert!(matches!(guard.validate(&token).await, Err(Error::InvalidToken)));
    }
}
