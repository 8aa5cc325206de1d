//! Creates the database and imports the initial roster of users.
//!
//! Usage: `setup [ROSTER_PATH]`, defaulting to [`ROSTER_PATH`].

use anyhow::Result;
use attendance::config::Settings;
use attendance::roster;

/// The path to the roster of users.
const ROSTER_PATH: &str = "roster.csv";

pub fn main() -> Result<()> {
    let settings = Settings::load()?;
    let manager = attendance::create_default_manager(&settings)?;

    let path = std::env::args().nth(1).unwrap_or_else(|| ROSTER_PATH.to_string());
    let users = roster::load_roster(&path, settings.portal.username_length)?;
    let inserted = manager.insert_users(&users)?;
    println!("Imported {inserted} user(s) from {path}");

    attendance::display::show_users(&manager)?;

    Ok(())
}
