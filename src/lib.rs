use anyhow::Result;
use std::sync::Arc;

pub mod cli;
pub mod config;
pub mod diff;
pub mod display;
pub mod error;
pub mod mailer;
pub mod manager;
pub mod models;
pub mod notifier;
pub mod portal;
pub mod roster;
pub mod scheduler;
pub mod schema;
pub mod sync;

use crate::config::Settings;
use crate::mailer::SmtpMailer;
use crate::manager::AttendanceManager;
use crate::notifier::Notifier;
use crate::portal::{CommandSolver, PortalClient};
use crate::sync::Synchronizer;

/// Connects to the database named in the settings, creating the tables if needed.
pub fn create_default_manager(settings: &Settings) -> Result<AttendanceManager> {
    let manager = AttendanceManager::connect(&settings.database.url)?;
    manager.init_schema()?;
    Ok(manager)
}

/// Wires the live portal, SMTP relay and database together.
pub fn create_synchronizer(settings: &Settings, manager: AttendanceManager) -> Result<Synchronizer> {
    let solver = Arc::new(CommandSolver::new(&settings.ocr));
    let portal = PortalClient::new(Arc::new(settings.portal.clone()), solver);

    let mailer = SmtpMailer::new(&settings.smtp)?;
    let notifier = Notifier::new(Arc::new(mailer), settings.smtp.admins.clone(), &settings.notify);

    Ok(Synchronizer::new(
        Arc::new(manager),
        Arc::new(portal),
        notifier,
        settings.notify.report_user_errors,
    ))
}
