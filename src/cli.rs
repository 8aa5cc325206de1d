//! This module contains the command-line interface [`Cli`] parser for running the attendance
//! monitor and managing the users it tracks.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::NotificationPreference;

/// The command line configuration struct, where the command-line interface parser is automatically
/// derived by [`clap::Parser`].
#[derive(Parser, Debug)]
#[command(name = "attendance-sync", version, about = "Emails students when their portal attendance changes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send the boot notification, then sync every interval until interrupted.
    Run,

    /// Run a single sync pass and print a summary.
    SyncOnce,

    /// Create the database tables.
    InitDb,

    /// Add a user to track.
    AddUser {
        /// Display name used in emails.
        #[arg(long)]
        name: String,

        /// Where notifications are sent.
        #[arg(long)]
        email: String,

        /// Portal login ID.
        #[arg(long)]
        username: String,

        /// Portal password.
        #[arg(long)]
        password: String,

        #[arg(long, default_value = "all", value_parser = parse_preference)]
        notify: NotificationPreference,
    },

    /// Stop tracking a user and delete their stored attendance.
    RemoveUser { username: String },

    /// Add every user in a roster CSV.
    ImportUsers { file_path: PathBuf },

    /// Change which attendance changes a user is emailed about.
    SetPreference {
        username: String,

        #[arg(value_parser = parse_preference)]
        preference: NotificationPreference,
    },

    /// List tracked users.
    ShowUsers,

    /// Show the stored attendance of a user.
    ShowAttendance { username: String },
}

fn parse_preference(value: &str) -> Result<NotificationPreference, String> {
    value.parse().map_err(|e| format!("{e}"))
}
