//! Importing users from a roster CSV.
//!
//! The CSV has a header row with the columns `name,email,username,password,notification_level`.
//! The last column may be left out, in which case the user is notified about everything.

use crate::error::StoreError;
use crate::manager::AttendanceManager;
use crate::models::{NewUser, User, ValidationError};
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("could not read roster: {0}")]
    Csv(#[from] csv::Error),

    #[error("line {line}: {source}")]
    Invalid {
        line: u64,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reads and validates every user in a roster.
pub fn read_roster<R: io::Read>(reader: R, username_length: usize) -> Result<Vec<User>, RosterError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut users = Vec::new();

    for result in reader.deserialize::<NewUser>() {
        let new_user = result?;
        let line = users.len() as u64 + 2;
        let user = new_user
            .into_user(username_length)
            .map_err(|source| RosterError::Invalid { line, source })?;
        users.push(user);
    }

    Ok(users)
}

/// Reads a roster from a file.
pub fn load_roster(path: impl AsRef<Path>, username_length: usize) -> Result<Vec<User>, RosterError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    read_roster(file, username_length)
}

/// The result of reconciling the stored users against a roster.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RosterUpdate {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Makes the stored users match `roster`, matching users by portal username. Users missing from
/// the roster are removed along with their attendance; users missing from the database are added.
/// Either every change is applied or none is.
pub fn update_roster(manager: &AttendanceManager, roster: Vec<User>) -> Result<RosterUpdate, RosterError> {
    let current = manager.users()?;

    let removed: Vec<String> = current
        .iter()
        .filter(|user| !roster.iter().any(|u| u.username == user.username))
        .map(|user| user.username.clone())
        .collect();

    let added: Vec<User> = roster
        .into_iter()
        .filter(|user| !current.iter().any(|u| u.username == user.username))
        .collect();

    manager.reconcile_users(&removed, &added)?;

    Ok(RosterUpdate {
        added: added.into_iter().map(|u| u.username).collect(),
        removed,
    })
}
