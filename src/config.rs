//! Runtime settings, loaded once at startup and handed to each component.
//!
//! Values come from an optional `config.toml` in the working directory, overridden by environment
//! variables such as `ATTENDANCE__SYNC__INTERVAL_SECS`. Secrets (the SMTP password) are only read
//! from the environment, which may be populated from a `.env` file.

use crate::error::ConfigError;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub portal: PortalSettings,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub smtp: SmtpSettings,
    #[serde(default)]
    pub notify: NotifySettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: env::var("DATABASE_URL").unwrap_or_else(|_| "attendance.db".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub login_url: String,
    pub captcha_url: String,
    pub attendance_url: String,
    pub user_agent: String,
    /// How many captchas to try before giving up on a login.
    pub captcha_attempts: u32,
    /// Subject codes that are summary rows rather than subjects.
    pub subject_blacklist: Vec<String>,
    pub username_length: usize,
    pub request_timeout_secs: u64,
}

impl Default for PortalSettings {
    fn default() -> Self {
        const BASE: &str = "https://sp.srmist.edu.in/srmiststudentportal";

        Self {
            login_url: format!("{BASE}/students/loginManager/youLogin.jsp"),
            captcha_url: format!("{BASE}/captchas"),
            attendance_url: format!("{BASE}/students/report/studentAttendanceDetails.jsp"),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0".to_string(),
            captcha_attempts: 3,
            subject_blacklist: vec!["Total".to_string()],
            username_length: 6,
            request_timeout_secs: 30,
        }
    }
}

impl PortalSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            command: "tesseract".to_string(),
            args: vec![
                "stdin".to_string(),
                "stdout".to_string(),
                "--psm".to_string(),
                "7".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub sender: String,
    pub admins: Vec<String>,
    /// Never read from `config.toml`; filled in from `SMTP_PASSWORD`.
    #[serde(skip)]
    pub password: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            sender: String::new(),
            admins: Vec::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Total send attempts per email, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubled for every retry after that.
    pub backoff_ms: u64,
    /// Whether per-user sync failures are emailed to the admins.
    pub report_user_errors: bool,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_ms: 500,
            report_user_errors: true,
        }
    }
}

impl NotifySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: interval_or_default(env::var("UPDATE_INTERVAL").ok().as_deref()),
        }
    }
}

/// `UPDATE_INTERVAL` is the older name for `sync.interval_secs`, in seconds.
fn interval_or_default(update_interval: Option<&str>) -> u64 {
    update_interval
        .and_then(|secs| secs.trim().parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(900)
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Settings {
    /// Loads settings from `config.toml`, the environment and `.env`.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("ATTENDANCE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("smtp.admins")
                    .with_list_parse_key("portal.subject_blacklist")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.smtp.password = env::var("SMTP_PASSWORD").unwrap_or_default();
        settings.validate()?;

        Ok(settings)
    }

    /// Rejects settings that would make the service spin or never do anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.portal.captcha_attempts == 0 {
            return Err(ConfigError::Invalid(
                "portal.captcha_attempts must be at least 1".to_string(),
            ));
        }
        if self.notify.attempts == 0 {
            return Err(ConfigError::Invalid(
                "notify.attempts must be at least 1".to_string(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.portal.username_length == 0 {
            return Err(ConfigError::Invalid(
                "portal.username_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let settings = from_toml(
            r#"
            [smtp]
            host = "smtp.example.edu"
            username = "bot"
            sender = "bot@example.edu"
            "#,
        );

        assert_eq!(settings.smtp.port, 587);
        assert!(settings.smtp.admins.is_empty());
        assert_eq!(settings.portal.captcha_attempts, 3);
        assert_eq!(settings.portal.subject_blacklist, vec!["Total".to_string()]);
        assert_eq!(settings.portal.username_length, 6);
        assert_eq!(settings.notify.attempts, 5);
        assert!(settings.notify.report_user_errors);
        assert_eq!(settings.sync.interval(), Duration::from_secs(900));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_config_is_usable() {
        let settings = from_toml("");

        assert!(settings.smtp.host.is_empty());
        assert_eq!(settings.smtp.port, 587);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_overrides_and_validation() {
        let settings = from_toml(
            r#"
            [smtp]
            host = "smtp.example.edu"
            username = "bot"
            sender = "bot@example.edu"
            admins = ["ops@example.edu"]

            [portal]
            subject_blacklist = ["Total", "CL"]
            captcha_attempts = 0
            "#,
        );

        assert_eq!(settings.smtp.admins, vec!["ops@example.edu".to_string()]);
        assert_eq!(settings.portal.subject_blacklist.len(), 2);
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_update_interval_fallback() {
        assert_eq!(interval_or_default(Some("600")), 600);
        assert_eq!(interval_or_default(Some(" 60 ")), 60);
        assert_eq!(interval_or_default(Some("soon")), 900);
        assert_eq!(interval_or_default(Some("0")), 900);
        assert_eq!(interval_or_default(None), 900);
    }
}
