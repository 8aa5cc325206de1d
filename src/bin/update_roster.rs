//! Updates the tracked users.
//!
//! This binary will look at the roster provided in [`ROSTER_PATH`] and look at the diff between the
//! users currently stored in the database. It will then add / delete users according to the CSV
//! roster. Deleted users lose their stored attendance.

use anyhow::Result;
use attendance::config::Settings;
use attendance::roster;

/// The path to the roster of users.
const ROSTER_PATH: &str = "roster.csv";

pub fn main() -> Result<()> {
    let settings = Settings::load()?;
    let manager = attendance::create_default_manager(&settings)?;

    let path = std::env::args().nth(1).unwrap_or_else(|| ROSTER_PATH.to_string());
    let new_roster = roster::load_roster(&path, settings.portal.username_length)?;

    let update = roster::update_roster(&manager, new_roster)?;
    println!("Users removed: {:#?}", update.removed);
    println!("Users added: {:#?}", update.added);

    Ok(())
}
