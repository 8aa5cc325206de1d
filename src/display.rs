use crate::error::StoreError;
use crate::manager::AttendanceManager;
use crate::sync::PassSummary;
use tabled::{Table, Tabled, settings::Style};

/// Pretty prints every tracked user.
pub fn show_users(manager: &AttendanceManager) -> Result<(), StoreError> {
    #[derive(Tabled)]
    struct UserRow {
        username: String,
        name: String,
        email: String,
        notifications: String,
    }

    let rows: Vec<UserRow> = manager
        .users()?
        .into_iter()
        .map(|user| UserRow {
            notifications: user.preference().to_string(),
            username: user.username,
            name: user.name,
            email: user.email,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("Users:\n{table}");

    Ok(())
}

/// Pretty prints the stored attendance of one user.
pub fn show_attendance(manager: &AttendanceManager, username: &str) -> Result<(), StoreError> {
    let Some(user) = manager.get_user_by_username(username)? else {
        eprintln!("User '{username}' not found.");
        return Ok(());
    };

    let attendance = manager.user_attendance(&user.id)?;
    if attendance.is_empty() {
        println!("No attendance stored for {} yet.", user.name);
        return Ok(());
    }

    let mut table = Table::new(attendance);
    table.with(Style::modern());
    println!("Attendance for {} ({}):\n{table}", user.name, user.username);

    Ok(())
}

/// Prints the outcome of a sync pass.
pub fn show_summary(summary: &PassSummary) {
    println!(
        "Synced {} user(s), {} subject(s), {} email(s) sent.",
        summary.synced.len(),
        summary.subjects,
        summary.emails_sent
    );

    if !summary.failed.is_empty() {
        #[derive(Tabled)]
        struct Failure<'a> {
            username: &'a str,
            error: &'a str,
        }

        let mut table = Table::new(summary.failed.iter().map(|(username, error)| Failure {
            username,
            error,
        }));
        table.with(Style::modern());
        println!("Failures:\n{table}");
    }
}
