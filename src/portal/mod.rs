//! Scraping attendance from the student portal.

mod captcha;
mod parse;
mod session;

pub use captcha::{CaptchaSolver, CommandSolver};
pub use parse::parse_attendance;
pub use session::{INVALID_CAPTCHA_MARKER, INVALID_CREDENTIALS_MARKER, PortalSession, SessionState};

use crate::config::PortalSettings;
use crate::error::PortalError;
use crate::models::{AttendanceRecord, User};
use async_trait::async_trait;
use std::sync::Arc;

/// Somewhere a user's current attendance can be read from.
#[async_trait]
pub trait AttendanceSource: Send + Sync {
    async fn scrape(&self, user: &User) -> Result<Vec<AttendanceRecord>, PortalError>;
}

/// Scrapes the live portal, opening a fresh session for every user.
#[derive(Clone)]
pub struct PortalClient {
    settings: Arc<PortalSettings>,
    solver: Arc<dyn CaptchaSolver>,
}

impl PortalClient {
    pub fn new(settings: Arc<PortalSettings>, solver: Arc<dyn CaptchaSolver>) -> Self {
        Self { settings, solver }
    }
}

#[async_trait]
impl AttendanceSource for PortalClient {
    async fn scrape(&self, user: &User) -> Result<Vec<AttendanceRecord>, PortalError> {
        let mut session = PortalSession::open(
            &self.settings,
            self.solver.as_ref(),
            &user.username,
            &user.password,
        )?;

        let result = match session.login().await {
            Ok(()) => session.fetch_attendance().await,
            Err(e) => Err(e),
        };
        session.close();

        result
    }
}
