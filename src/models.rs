use crate::schema::{attendance, users};
use diesel::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tabled::Tabled;
use thiserror::Error;

/// Which attendance changes a user wants to be emailed about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPreference {
    #[default]
    All,
    PresentOnly,
    AbsentOnly,
}

impl NotificationPreference {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::PresentOnly => "present_only",
            Self::AbsentOnly => "absent_only",
        }
    }

    /// Whether an increase in present hours should be reported.
    pub const fn wants_present(self) -> bool {
        matches!(self, Self::All | Self::PresentOnly)
    }

    /// Whether an increase in absent hours should be reported.
    pub const fn wants_absent(self) -> bool {
        matches!(self, Self::All | Self::AbsentOnly)
    }
}

impl fmt::Display for NotificationPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationPreference {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "present_only" | "present" => Ok(Self::PresentOnly),
            "absent_only" | "absent" => Ok(Self::AbsentOnly),
            other => Err(ValidationError::Preference(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' is not a valid email address")]
    Email(String),

    #[error("portal username '{username}' must be exactly {expected} characters")]
    UsernameLength { username: String, expected: usize },

    #[error("name must not be empty")]
    EmptyName,

    #[error("unknown notification preference '{0}', expected all, present_only or absent_only")]
    Preference(String),
}

/// A student whose portal attendance is being tracked.
#[derive(Queryable, Selectable, Insertable, Clone, PartialEq, Eq)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub notification_level: String,
}

impl User {
    /// The stored preference. The column is constrained by the schema, so anything unreadable
    /// falls back to [`NotificationPreference::All`].
    pub fn preference(&self) -> NotificationPreference {
        self.notification_level.parse().unwrap_or_default()
    }
}

// Hand written so that passwords never end up in logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("notification_level", &self.notification_level)
            .finish_non_exhaustive()
    }
}

/// A user as it appears in a roster CSV, before it has been assigned an ID.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub notification_level: NotificationPreference,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid"))
}

impl NewUser {
    /// Checks the invariants the `users` table relies on.
    pub fn validate(&self, username_length: usize) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !email_regex().is_match(&self.email) {
            return Err(ValidationError::Email(self.email.clone()));
        }
        if self.username.chars().count() != username_length {
            return Err(ValidationError::UsernameLength {
                username: self.username.clone(),
                expected: username_length,
            });
        }
        Ok(())
    }

    /// Validates the user and assigns it a fresh ID.
    pub fn into_user(self, username_length: usize) -> Result<User, ValidationError> {
        self.validate(username_length)?;

        Ok(User {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name.trim().to_string(),
            email: self.email,
            username: self.username,
            password: self.password,
            notification_level: self.notification_level.as_str().to_string(),
        })
    }
}

/// One row of the portal's attendance table, as scraped.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub subject_code: String,
    pub subject_name: String,
    pub total_hours: i32,
    pub present_hours: i32,
    pub absent_hours: i32,
    pub percentage: f64,
}

/// The last known attendance of a user for one subject. There is exactly one row per
/// `(user_id, subject_code)`.
#[derive(Queryable, Selectable, Insertable, Tabled, Debug, Clone, PartialEq)]
#[diesel(table_name = attendance)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredAttendance {
    #[tabled(skip)]
    pub user_id: String,
    #[tabled(rename = "code")]
    pub subject_code: String,
    #[tabled(rename = "subject")]
    pub subject_name: String,
    #[tabled(rename = "max")]
    pub max_hours: i32,
    #[tabled(rename = "attended")]
    pub attended_hours: i32,
    #[tabled(rename = "absent")]
    pub absent_hours: i32,
    #[tabled(rename = "%")]
    pub total_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user() -> NewUser {
        NewUser {
            name: "Ferris".to_string(),
            email: "ferris@example.edu".to_string(),
            username: "RA2111".to_string(),
            password: "hunter2".to_string(),
            notification_level: NotificationPreference::All,
        }
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("all".parse(), Ok(NotificationPreference::All));
        assert_eq!(
            " PRESENT_ONLY ".parse(),
            Ok(NotificationPreference::PresentOnly)
        );
        assert_eq!("absent".parse(), Ok(NotificationPreference::AbsentOnly));
        assert!("sometimes".parse::<NotificationPreference>().is_err());
    }

    #[test]
    fn test_preference_gates() {
        use NotificationPreference::*;

        assert!(All.wants_present() && All.wants_absent());
        assert!(PresentOnly.wants_present() && !PresentOnly.wants_absent());
        assert!(!AbsentOnly.wants_present() && AbsentOnly.wants_absent());
    }

    #[test]
    fn test_validate_user() {
        assert_eq!(new_user().validate(6), Ok(()));

        let bad_email = NewUser {
            email: "ferris.example.edu".to_string(),
            ..new_user()
        };
        assert!(matches!(bad_email.validate(6), Err(ValidationError::Email(_))));

        assert!(matches!(
            new_user().validate(8),
            Err(ValidationError::UsernameLength { expected: 8, .. })
        ));

        let no_name = NewUser {
            name: "  ".to_string(),
            ..new_user()
        };
        assert_eq!(no_name.validate(6), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_into_user_assigns_id() {
        let a = new_user().into_user(6).unwrap();
        let b = new_user().into_user(6).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.preference(), NotificationPreference::All);
    }

    #[test]
    fn test_debug_hides_password() {
        let user = new_user().into_user(6).unwrap();
        assert!(!format!("{user:?}").contains("hunter2"));
    }
}
