//! Process configuration, read from the environment.
//!
//! Every variable is optional. Unparseable values fall back to the default
//! with a warning instead of aborting startup.

use std::time::Duration;

use tracing::warn;

use classbook_booking::policy::DEFAULT_CANCELLATION_WINDOW_HOURS;
use classbook_infra::engine::DEFAULT_MAX_CONFLICT_RETRIES;

const DEV_ADMIN_TOKEN: &str = "dev-admin-token";
const DEV_STAFF_TOKEN: &str = "dev-staff-token";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub cancellation_window_hours: i64,
    pub max_conflict_retries: u32,
    pub admin_token: String,
    pub staff_token: String,
    /// Deliver notifications to this URL instead of the log.
    pub notify_webhook_url: Option<String>,
    /// Background purge of past events; disabled when `None`.
    pub cleanup_interval: Option<Duration>,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            cancellation_window_hours: DEFAULT_CANCELLATION_WINDOW_HOURS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            admin_token: DEV_ADMIN_TOKEN.to_string(),
            staff_token: DEV_STAFF_TOKEN.to_string(),
            notify_webhook_url: None,
            cleanup_interval: None,
            use_persistent_stores: false,
            database_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let admin_token = get("ADMIN_TOKEN").unwrap_or_else(|| {
            warn!("ADMIN_TOKEN not set; using insecure dev default");
            defaults.admin_token.clone()
        });
        let staff_token = get("STAFF_TOKEN").unwrap_or_else(|| {
            warn!("STAFF_TOKEN not set; using insecure dev default");
            defaults.staff_token.clone()
        });

        let cancellation_window_hours = parse_or(
            "CANCELLATION_WINDOW_HOURS",
            get("CANCELLATION_WINDOW_HOURS"),
            defaults.cancellation_window_hours,
        );
        let cancellation_window_hours = if cancellation_window_hours < 0 {
            warn!(value = cancellation_window_hours, "CANCELLATION_WINDOW_HOURS is negative; using default");
            defaults.cancellation_window_hours
        } else {
            cancellation_window_hours
        };

        let cleanup_interval = get("CLEANUP_INTERVAL_SECS")
            .and_then(|raw| match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    warn!(value = %raw, "invalid CLEANUP_INTERVAL_SECS; background purge disabled");
                    None
                }
            });

        Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            cancellation_window_hours,
            max_conflict_retries: parse_or(
                "MAX_CONFLICT_RETRIES",
                get("MAX_CONFLICT_RETRIES"),
                defaults.max_conflict_retries,
            ),
            admin_token,
            staff_token,
            notify_webhook_url: get("NOTIFY_WEBHOOK_URL"),
            cleanup_interval,
            use_persistent_stores: parse_or(
                "USE_PERSISTENT_STORES",
                get("USE_PERSISTENT_STORES"),
                defaults.use_persistent_stores,
            ),
            database_url: get("DATABASE_URL"),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Debug,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = ?default, "invalid value; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config(&[]), AppConfig::default());
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("CANCELLATION_WINDOW_HOURS", " 48 "),
            ("MAX_CONFLICT_RETRIES", "3"),
            ("ADMIN_TOKEN", "secret"),
            ("NOTIFY_WEBHOOK_URL", "http://hooks.local/notify"),
            ("CLEANUP_INTERVAL_SECS", "3600"),
            ("USE_PERSISTENT_STORES", "true"),
        ]);

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.cancellation_window_hours, 48);
        assert_eq!(cfg.max_conflict_retries, 3);
        assert_eq!(cfg.admin_token, "secret");
        assert_eq!(cfg.staff_token, DEV_STAFF_TOKEN);
        assert_eq!(cfg.notify_webhook_url.as_deref(), Some("http://hooks.local/notify"));
        assert_eq!(cfg.cleanup_interval, Some(Duration::from_secs(3600)));
        assert!(cfg.use_persistent_stores);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = config(&[
            ("CANCELLATION_WINDOW_HOURS", "a day"),
            ("MAX_CONFLICT_RETRIES", "-1"),
            ("CLEANUP_INTERVAL_SECS", "soon"),
            ("USE_PERSISTENT_STORES", "yes please"),
        ]);

        assert_eq!(cfg.cancellation_window_hours, DEFAULT_CANCELLATION_WINDOW_HOURS);
        assert_eq!(cfg.max_conflict_retries, DEFAULT_MAX_CONFLICT_RETRIES);
        assert_eq!(cfg.cleanup_interval, None);
        assert!(!cfg.use_persistent_stores);
    }

    #[test]
    fn negative_window_is_rejected() {
        let cfg = config(&[("CANCELLATION_WINDOW_HOURS", "-4")]);
        assert_eq!(cfg.cancellation_window_hours, DEFAULT_CANCELLATION_WINDOW_HOURS);
    }
}
