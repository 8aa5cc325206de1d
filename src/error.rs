//! Error types for each layer of the sync pipeline.
//!
//! Portal errors are split by what the caller should do about them: [`PortalError::Auth`] means
//! the stored credentials are wrong and retrying is pointless, [`PortalError::Transient`] covers
//! the portal or network misbehaving, and [`PortalError::Parse`] means the page no longer looks
//! the way the scraper expects.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    /// The portal rejected the username or password.
    #[error("portal rejected the credentials")]
    Auth,

    /// The portal is down, answered unexpectedly, or the captcha could not be solved.
    #[error("portal unavailable: {0}")]
    Transient(String),

    /// The attendance page did not have the expected layout.
    #[error("could not parse attendance page: {0}")]
    Parse(String),

    /// An operation was attempted in the wrong session state.
    #[error("session is {0}, expected it to be logged in")]
    NotLoggedIn(&'static str),
}

impl PortalError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("could not get a database connection: {0}")]
    Connection(#[from] diesel::r2d2::PoolError),

    #[error("database task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum MailError {
    /// Worth trying again, e.g. a dropped connection or a 4xx SMTP reply.
    #[error("transient mail failure: {0}")]
    Transient(String),

    /// Retrying will not help, e.g. a malformed address.
    #[error("permanent mail failure: {0}")]
    Permanent(String),
}

impl MailError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Why a single user's sync failed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Renders an error and all of its sources, one per line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str("\n  caused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
