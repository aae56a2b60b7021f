use rocket::figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: String,
    pub session_hours: i64,
    pub view_cache_ttl_secs: u64,
    pub otlp_endpoint: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://course-platform.db?mode=rwc".to_string(),
            environment: "development".to_string(),
            session_hours: 1,
            view_cache_ttl_secs: 1800,
            otlp_endpoint: None,
            admin_username: None,
            admin_password: None,
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::raw().filter(|key| key.as_str().eq_ignore_ascii_case("database_url")))
            .merge(Env::prefixed("APP_"))
    }

    pub fn load() -> Result<Self, rocket::figment::Error> {
        Self::figment().extract()
    }

    /// Both halves must be present for the bootstrap admin to be seeded.
    pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        match (&self.admin_username, &self.admin_password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some((username.as_str(), password.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        temp_env::with_vars_unset(
            [
                "DATABASE_URL",
                "APP_SESSION_HOURS",
                "APP_VIEW_CACHE_TTL_SECS",
                "APP_OTLP_ENDPOINT",
                "APP_ADMIN_USERNAME",
                "APP_ADMIN_PASSWORD",
                "APP_ENVIRONMENT",
                "APP_DATABASE_URL",
            ],
            || {
                let config = AppConfig::load().expect("Failed to load config");
                assert_eq!(config, AppConfig::default());
                assert!(config.bootstrap_admin().is_none());
            },
        );
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("sqlite::memory:")),
                ("APP_DATABASE_URL", None),
                ("APP_SESSION_HOURS", Some("12")),
                ("APP_VIEW_CACHE_TTL_SECS", Some("60")),
                ("APP_ADMIN_USERNAME", Some("root")),
                ("APP_ADMIN_PASSWORD", Some("hunter22")),
            ],
            || {
                let config = AppConfig::load().expect("Failed to load config");
                assert_eq!(config.database_url, "sqlite::memory:");
                assert_eq!(config.session_hours, 12);
                assert_eq!(config.view_cache_ttl_secs, 60);
                assert_eq!(config.bootstrap_admin(), Some(("root", "hunter22")));
            },
        );
    }

    #[test]
    #[serial]
    fn test_partial_admin_is_ignored() {
        temp_env::with_vars(
            [
                ("APP_ADMIN_USERNAME", Some("root")),
                ("APP_ADMIN_PASSWORD", None::<&str>),
            ],
            || {
                let config = AppConfig::load().expect("Failed to load config");
                assert!(config.bootstrap_admin().is_none());
            },
        );
    }
}
