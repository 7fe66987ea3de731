//! Runtime configuration, loaded from the process environment.
//!
//! Every knob has a built-in default; `LiveConfig::from_env()` only
//! overrides what is actually set, and rejects values that fail to parse
//! rather than silently falling back.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Lifetime of a login session, seconds.
    pub session_lifetime_seconds: u64,
    /// Name of the session cookie set by `POST /auth/login`.
    pub session_cookie_name: String,
    /// Login attempts allowed per throttle key per decay window.
    pub rate_limit_max: u32,
    /// Throttle window length, seconds.
    pub rate_limit_decay_seconds: u64,
    /// Grace period before an empty room is destroyed, seconds.
    pub room_destruction_grace_seconds: u64,
    /// State snapshots retained per instance.
    pub max_state_history: usize,
    /// Chat messages retained per room.
    pub max_chat_messages_per_room: usize,
    /// Address the gateway binds to.
    pub bind: String,
    /// Port the gateway listens on.
    pub port: u16,
    /// Guard validation deadline, seconds.
    pub auth_timeout_seconds: u64,
    /// When true, the literal `admin` permission satisfies any per-action
    /// permission requirement.
    pub admin_permission_bypass: bool,
    /// Production mode: internal errors reach clients with a generic message.
    pub production: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            session_lifetime_seconds: 7200,
            session_cookie_name: "fluxstack_session".into(),
            rate_limit_max: 5,
            rate_limit_decay_seconds: 60,
            room_destruction_grace_seconds: 300,
            max_state_history: 50,
            max_chat_messages_per_room: 100,
            bind: "127.0.0.1".into(),
            port: 4850,
            auth_timeout_seconds: 5,
            admin_permission_bypass: false,
            production: false,
        }
    }
}

impl LiveConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an injectable lookup. Tests pass closures over fixed maps
    /// instead of mutating process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        parse_into(&lookup, "SESSION_LIFETIME_SECONDS", &mut config.session_lifetime_seconds)?;
        if let Some(name) = lookup("SESSION_COOKIE_NAME") {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "SESSION_COOKIE_NAME",
                    value: name,
                });
            }
            config.session_cookie_name = name;
        }
        parse_into(&lookup, "RATE_LIMIT_MAX", &mut config.rate_limit_max)?;
        parse_into(&lookup, "RATE_LIMIT_DECAY_SECONDS", &mut config.rate_limit_decay_seconds)?;
        parse_into(
            &lookup,
            "ROOM_DESTRUCTION_GRACE_SECONDS",
            &mut config.room_destruction_grace_seconds,
        )?;
        parse_into(&lookup, "MAX_STATE_HISTORY", &mut config.max_state_history)?;
        parse_into(
            &lookup,
            "MAX_CHAT_MESSAGES_PER_ROOM",
            &mut config.max_chat_messages_per_room,
        )?;
        if let Some(bind) = lookup("FLUXLIVE_BIND") {
            config.bind = bind;
        }
        parse_into(&lookup, "FLUXLIVE_PORT", &mut config.port)?;
        parse_into(&lookup, "AUTH_TIMEOUT_SECONDS", &mut config.auth_timeout_seconds)?;
        parse_bool_into(&lookup, "ADMIN_PERMISSION_BYPASS", &mut config.admin_permission_bypass)?;
        parse_bool_into(&lookup, "PRODUCTION", &mut config.production)?;

        Ok(config)
    }

    #[must_use]
    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_seconds)
    }

    #[must_use]
    pub fn rate_limit_decay(&self) -> Duration {
        Duration::from_secs(self.rate_limit_decay_seconds)
    }

    #[must_use]
    pub fn room_destruction_grace(&self) -> Duration {
        Duration::from_secs(self.room_destruction_grace_seconds)
    }

    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw })?;
    }
    Ok(())
}

fn parse_bool_into(
    lookup: impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut bool,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *slot = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(ConfigError::Invalid { key, value: raw }),
        };
    }
    Ok(())
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn documented_defaults() {
        let config = LiveConfig::default();
        assert_eq!(config.session_lifetime_seconds, 7200);
        assert_eq!(config.session_cookie_name, "fluxstack_session");
        assert_eq!(config.rate_limit_max, 5);
        assert_eq!(config.rate_limit_decay_seconds, 60);
        assert_eq!(config.room_destruction_grace_seconds, 300);
        assert_eq!(config.max_state_history, 50);
        assert_eq!(config.max_chat_messages_per_room, 100);
    }

    #[test]
    fn empty_env_yields_defaults() {
        let config = LiveConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 4850);
        assert!(!config.production);
    }

    #[test]
    fn overrides_apply() {
        let pairs = [
            ("SESSION_LIFETIME_SECONDS", "60"),
            ("SESSION_COOKIE_NAME", "other_session"),
            ("RATE_LIMIT_MAX", "2"),
            ("ROOM_DESTRUCTION_GRACE_SECONDS", "1"),
            ("FLUXLIVE_PORT", "9000"),
            ("PRODUCTION", "true"),
        ];
        let config = LiveConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.session_lifetime_seconds, 60);
        assert_eq!(config.session_cookie_name, "other_session");
        assert_eq!(config.rate_limit_max, 2);
        assert_eq!(config.room_destruction_grace(), Duration::from_secs(1));
        assert_eq!(config.port, 9000);
        assert!(config.production);
    }

    #[test]
    fn unparseable_value_is_an_error() {
        let pairs = [("RATE_LIMIT_MAX", "lots")];
        let err = LiveConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "RATE_LIMIT_MAX", .. }));
    }

    #[test]
    fn bool_parsing_accepts_common_forms() {
        for raw in ["1", "true", "YES", "on"] {
            let pairs = [("PRODUCTION", raw)];
            assert!(LiveConfig::from_lookup(lookup_from(&pairs)).unwrap().production);
        }
        let pairs = [("PRODUCTION", "maybe")];
        assert!(LiveConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn blank_cookie_name_is_rejected() {
        let pairs = [("SESSION_COOKIE_NAME", "  ")];
        assert!(LiveConfig::from_lookup(lookup_from(&pairs)).is_err());
    }
}
