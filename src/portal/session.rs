use super::captcha::CaptchaSolver;
use super::parse::parse_attendance;
use crate::config::PortalSettings;
use crate::error::PortalError;
use crate::models::AttendanceRecord;
use reqwest::{Client, StatusCode, redirect};
use std::fmt;
use tracing::{debug, info, warn};

/// Shown on the login page when the username or password is wrong.
pub const INVALID_CREDENTIALS_MARKER: &str = "Login Error : Invalid net id or password";
/// Shown on the login page when the captcha text was wrong.
pub const INVALID_CAPTCHA_MARKER: &str = "Invalid Captcha....";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotLoggedIn,
    LoggingIn,
    LoggedIn,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SessionState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NotLoggedIn => "not logged in",
            Self::LoggingIn => "logging in",
            Self::LoggedIn => "logged in",
            Self::Closed => "closed",
        }
    }
}

/// How the portal answered a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginOutcome {
    Success,
    InvalidCredentials,
    InvalidCaptcha,
    Unexpected(StatusCode),
}

fn classify_login(status: StatusCode, body: &str) -> LoginOutcome {
    if body.contains(INVALID_CREDENTIALS_MARKER) {
        LoginOutcome::InvalidCredentials
    } else if body.contains(INVALID_CAPTCHA_MARKER) {
        LoginOutcome::InvalidCaptcha
    } else if status.is_redirection() {
        LoginOutcome::Success
    } else {
        LoginOutcome::Unexpected(status)
    }
}

/// One authenticated HTTP session against the portal for a single user.
///
/// The session owns its own cookie jar. [`PortalSession::close`] releases it and is also run
/// when the session is dropped, so the connection pool is freed on every path out of a sync.
pub struct PortalSession<'a> {
    settings: &'a PortalSettings,
    solver: &'a dyn CaptchaSolver,
    username: &'a str,
    password: &'a str,
    client: Option<Client>,
    state: SessionState,
}

impl<'a> PortalSession<'a> {
    pub fn open(
        settings: &'a PortalSettings,
        solver: &'a dyn CaptchaSolver,
        username: &'a str,
        password: &'a str,
    ) -> Result<Self, PortalError> {
        let client = Client::builder()
            .cookie_store(true)
            // A successful login answers with a redirect, which has to be seen rather than followed.
            .redirect(redirect::Policy::none())
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            settings,
            solver,
            username,
            password,
            client: Some(client),
            state: SessionState::NotLoggedIn,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn client(&self) -> Result<Client, PortalError> {
        self.client
            .clone()
            .ok_or(PortalError::NotLoggedIn(SessionState::Closed.as_str()))
    }

    /// Logs in, solving and resubmitting the captcha up to `captcha_attempts` times.
    ///
    /// Wrong credentials fail immediately with [`PortalError::Auth`]. Running out of captcha
    /// attempts, or any answer that is neither a marker nor a redirect, fails with
    /// [`PortalError::Transient`].
    pub async fn login(&mut self) -> Result<(), PortalError> {
        match self.state {
            SessionState::LoggedIn => return Ok(()),
            SessionState::Closed | SessionState::LoggingIn => {
                return Err(PortalError::NotLoggedIn(self.state.as_str()));
            }
            SessionState::NotLoggedIn => {}
        }

        let client = self.client()?;
        self.state = SessionState::LoggingIn;

        let result = self.submit_login(&client).await;
        self.state = match result {
            Ok(()) => SessionState::LoggedIn,
            Err(_) => SessionState::NotLoggedIn,
        };

        result
    }

    async fn submit_login(&self, client: &Client) -> Result<(), PortalError> {
        let settings = self.settings;

        // Sets the session cookie that the captcha is bound to.
        client
            .get(&settings.login_url)
            .send()
            .await?
            .error_for_status()?;

        for attempt in 1..=settings.captcha_attempts {
            let image = client
                .get(&settings.captcha_url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            let captcha = self.solver.solve(&image).await?;

            let response = client
                .post(&settings.login_url)
                .form(&[
                    ("txtPageAction", "1"),
                    ("txtAN", self.username),
                    ("txtSK", self.password),
                    ("hdnCaptcha", captcha.as_str()),
                ])
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;

            match classify_login(status, &body) {
                LoginOutcome::Success => {
                    info!(user = %self.username, attempt, "logged in to portal");
                    return Ok(());
                }
                LoginOutcome::InvalidCredentials => {
                    warn!(user = %self.username, "portal rejected the credentials");
                    return Err(PortalError::Auth);
                }
                LoginOutcome::InvalidCaptcha => {
                    warn!(
                        user = %self.username,
                        attempt,
                        max_attempts = settings.captcha_attempts,
                        "portal rejected the captcha"
                    );
                }
                LoginOutcome::Unexpected(status) => {
                    return Err(PortalError::Transient(format!(
                        "login answered with status {status}"
                    )));
                }
            }
        }

        Err(PortalError::Transient(format!(
            "captcha rejected {} times",
            settings.captcha_attempts
        )))
    }

    /// Downloads and parses the attendance report. Only valid once logged in.
    pub async fn fetch_attendance(&self) -> Result<Vec<AttendanceRecord>, PortalError> {
        if self.state != SessionState::LoggedIn {
            return Err(PortalError::NotLoggedIn(self.state.as_str()));
        }

        let response = self
            .client()?
            .post(&self.settings.attendance_url)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortalError::Transient(format!(
                "attendance page answered with status {status}"
            )));
        }

        let html = response.text().await?;
        let records = parse_attendance(&html, &self.settings.subject_blacklist)?;
        debug!(user = %self.username, subjects = records.len(), "parsed attendance");

        Ok(records)
    }

    /// Releases the HTTP client. Calling this more than once does nothing.
    pub fn close(&mut self) {
        if self.client.take().is_some() {
            debug!(user = %self.username, "closed portal session");
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for PortalSession<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
