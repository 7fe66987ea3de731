use std::sync::Arc;

use {
    fluxlive_auth::{AuthContext, LoginThrottle, SessionStore, UserProvider},
    fluxlive_config::LiveConfig,
    fluxlive_live::LiveRuntime,
};

/// Shared state behind every route handler.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<LiveRuntime>,
    pub sessions: Arc<SessionStore>,
    pub provider: Arc<dyn UserProvider>,
    pub throttle: Arc<LoginThrottle>,
    pub config: Arc<LiveConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(
        runtime: Arc<LiveRuntime>,
        sessions: Arc<SessionStore>,
        provider: Arc<dyn UserProvider>,
        config: LiveConfig,
    ) -> Self {
        let throttle = Arc::new(LoginThrottle::new(
            config.rate_limit_max,
            config.rate_limit_decay(),
        ));
        Self {
            runtime,
            sessions,
            provider,
            throttle,
            config: Arc::new(config),
        }
    }

    /// Resolve a session token (cookie value or bearer token) to its
    /// AuthContext.
    #[must_use]
    pub fn resolve_session(&self, token: &str) -> Option<AuthContext> {
        self.sessions.validate(token)
    }
}
