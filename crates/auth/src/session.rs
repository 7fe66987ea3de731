use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::context::AuthContext;

/// A login session minted by `POST /auth/login`.
#[derive(Debug, Clone)]
pub struct Session {
    pub context: AuthContext,
    pub created_at: Instant,
    pub expires_at: Instant,
}

/// In-memory session table: token → identity, with a fixed lifetime.
///
/// Tokens double as bearer credentials and session-cookie values. Nothing
/// is persisted; a restart logs everyone out.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    lifetime: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime,
        }
    }

    /// Mint a session for an authenticated context and return its token.
    pub fn create(&self, context: AuthContext) -> String {
        let token = generate_token();
        let now = Instant::now();
        self.sessions.insert(token.clone(), Session {
            context,
            created_at: now,
            expires_at: now + self.lifetime,
        });
        token
    }

    /// Resolve a token to its context. Expired entries are removed on the
    /// spot rather than waiting for the sweep.
    pub fn validate(&self, token: &str) -> Option<AuthContext> {
        let expired = match self.sessions.get(token) {
            Some(session) if session.expires_at > Instant::now() => {
                return Some(session.context.clone());
            },
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(token);
        }
        None
    }

    /// Drop a session (logout). Unknown tokens are a no-op.
    pub fn delete(&self, token: &str) {
        self.sessions.remove(token);
    }

    /// Sweep expired sessions; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        before - self.sessions.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// 256-bit URL-safe random token.
#[must_use]
pub fn generate_token() -> String {
    use {base64::Engine, rand::RngCore};

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(subject: &str) -> AuthContext {
        AuthContext::for_subject(subject, ["user"], Vec::<String>::new())
    }

    #[test]
    fn create_validate_delete() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create(ctx("u1"));

        let resolved = store.validate(&token).unwrap();
        assert_eq!(resolved.subject.as_deref(), Some("u1"));

        store.delete(&token);
        assert!(store.validate(&token).is_none());
    }

    #[test]
    fn expired_sessions_are_rejected_and_removed() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.create(ctx("u1"));
        assert!(store.validate(&token).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn cleanup_sweeps_only_expired() {
        let store = SessionStore::new(Duration::ZERO);
        store.create(ctx("old"));
        let removed = store.cleanup_expired();
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }
}
