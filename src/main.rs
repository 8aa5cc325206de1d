use anyhow::{Context, Result, bail};
use attendance::cli::{Cli, Command};
use attendance::config::Settings;
use attendance::models::NewUser;
use attendance::{display, roster, scheduler};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load().context("loading configuration")?;
    let manager = attendance::create_default_manager(&settings)?;

    match cli.command {
        Command::Run => {
            let sync = attendance::create_synchronizer(&settings, manager)?;
            sync.notifier().send_boot_notification().await;

            info!(interval_secs = settings.sync.interval_secs, "starting attendance monitor");
            scheduler::run(sync, settings.sync.interval(), async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("could not listen for ctrl-c: {e}");
                }
            })
            .await;
        }
        Command::SyncOnce => {
            let sync = attendance::create_synchronizer(&settings, manager)?;
            let summary = sync.run_pass().await;
            display::show_summary(&summary);
        }
        Command::InitDb => {
            // `create_default_manager` already created the tables.
            println!("Database ready at {}", settings.database.url);
        }
        Command::AddUser {
            name,
            email,
            username,
            password,
            notify,
        } => {
            let user = NewUser {
                name,
                email,
                username,
                password,
                notification_level: notify,
            }
            .into_user(settings.portal.username_length)?;
            manager.insert_users(std::slice::from_ref(&user))?;
            println!("Added {} ({})", user.name, user.username);
        }
        Command::RemoveUser { username } => match manager.delete_user(&username)? {
            Some(user) => println!("Removed {} ({})", user.name, user.username),
            None => bail!("no user with username '{username}'"),
        },
        Command::ImportUsers { file_path } => {
            let users = roster::load_roster(&file_path, settings.portal.username_length)
                .with_context(|| format!("importing {}", file_path.display()))?;
            let inserted = manager.insert_users(&users)?;
            println!("Imported {inserted} user(s)");
        }
        Command::SetPreference {
            username,
            preference,
        } => {
            if !manager.set_preference(&username, preference)? {
                bail!("no user with username '{username}'");
            }
            println!("{username} will now be notified about: {preference}");
        }
        Command::ShowUsers => display::show_users(&manager)?,
        Command::ShowAttendance { username } => display::show_attendance(&manager, &username)?,
    }

    Ok(())
}
