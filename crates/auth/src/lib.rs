//! Authentication primitives: identity contexts, the token-guard and
//! user-provider seams, the in-memory session store, and the login
//! throttle.
//!
//! Nothing here persists across process restarts. The traits are the
//! integration points for deployments that bring their own user database
//! or token scheme.

pub mod context;
pub mod error;
pub mod guard;
pub mod provider;
pub mod session;
pub mod throttle;

pub use {
    context::AuthContext,
    error::{Error, Result},
    guard::{SessionTokenGuard, StaticTokenGuard, TokenGuard},
    provider::{InMemoryUserProvider, UserProvider, UserRecord},
    session::{Session, SessionStore},
    throttle::{LoginThrottle, ThrottleDecision},
};
