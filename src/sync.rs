//! One pass of the scrape, diff, persist and notify pipeline over every user.

use crate::diff::diff;
use crate::error::{SyncError, error_chain};
use crate::manager::AttendanceStore;
use crate::models::User;
use crate::notifier::{Notifier, SubjectChange};
use crate::portal::AttendanceSource;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// What happened to one user during a pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserReport {
    pub subjects: usize,
    pub new_subjects: usize,
    pub changed_subjects: usize,
    pub emails_sent: usize,
}

/// What happened during a pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub synced: Vec<String>,
    /// Usernames that failed, with the reason.
    pub failed: Vec<(String, String)>,
    pub subjects: usize,
    pub emails_sent: usize,
}

/// Runs sync passes. Clones share the same pass guard, so at most one pass runs at a time.
#[derive(Clone)]
pub struct Synchronizer {
    store: Arc<dyn AttendanceStore>,
    source: Arc<dyn AttendanceSource>,
    notifier: Notifier,
    report_user_errors: bool,
    pass_guard: Arc<Mutex<()>>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        source: Arc<dyn AttendanceSource>,
        notifier: Notifier,
        report_user_errors: bool,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            report_user_errors,
            pass_guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Runs a pass unless one is already in progress, in which case `None` is returned.
    pub async fn try_run_pass(&self) -> Option<PassSummary> {
        let guard = self.try_claim_pass()?;
        Some(self.run_claimed_pass(guard).await)
    }

    /// Claims the right to run the next pass, or `None` if a pass is already in progress. The
    /// claim is held until the returned guard is dropped, so it can be taken before a pass is
    /// spawned onto another task.
    pub fn try_claim_pass(&self) -> Option<OwnedMutexGuard<()>> {
        match Arc::clone(&self.pass_guard).try_lock_owned() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("previous sync pass is still running, skipping this one");
                None
            }
        }
    }

    /// Runs a pass under a claim taken with [`Synchronizer::try_claim_pass`].
    pub async fn run_claimed_pass(&self, guard: OwnedMutexGuard<()>) -> PassSummary {
        let summary = self.run_pass_unguarded().await;
        drop(guard);
        summary
    }

    /// Runs a pass, waiting for any pass already in progress to finish first.
    pub async fn run_pass(&self) -> PassSummary {
        let _guard = self.pass_guard.lock().await;
        self.run_pass_unguarded().await
    }

    /// Waits until no pass is running.
    pub async fn wait_idle(&self) {
        drop(self.pass_guard.lock().await);
    }

    async fn run_pass_unguarded(&self) -> PassSummary {
        info!("updating attendance for all users");
        let start = Instant::now();

        let users = match self.store.list_users().await {
            Ok(users) => users,
            Err(e) => {
                error!("could not list users: {e}");
                self.notifier
                    .send_error_notification(
                        "Error updating attendance for all users",
                        &error_chain(&e),
                    )
                    .await;
                return PassSummary::default();
            }
        };

        let summary = self.sync_all(&users).await;
        info!(
            synced = summary.synced.len(),
            failed = summary.failed.len(),
            emails = summary.emails_sent,
            elapsed = ?start.elapsed(),
            "sync pass finished"
        );

        summary
    }

    /// Syncs every user concurrently. A failure for one user is logged, optionally reported, and
    /// never stops the others.
    pub async fn sync_all(&self, users: &[User]) -> PassSummary {
        debug!(users = users.len(), "starting per-user syncs");

        let results = join_all(users.iter().map(|user| self.sync_user(user))).await;

        let mut summary = PassSummary::default();
        for (user, result) in users.iter().zip(results) {
            match result {
                Ok(report) => {
                    summary.subjects += report.subjects;
                    summary.emails_sent += report.emails_sent;
                    summary.synced.push(user.username.clone());
                }
                Err(e) => {
                    summary.failed.push((user.username.clone(), e.to_string()));
                }
            }
        }

        summary
    }

    async fn sync_user(&self, user: &User) -> Result<UserReport, SyncError> {
        match self.update_user(user).await {
            Ok(report) => {
                info!(
                    user = %user.username,
                    subjects = report.subjects,
                    new = report.new_subjects,
                    changed = report.changed_subjects,
                    "updated attendance"
                );
                Ok(report)
            }
            Err(e) => {
                error!(user = %user.username, "error updating attendance: {e}");
                if self.report_user_errors {
                    self.notifier
                        .send_error_notification(
                            &format!("Error updating attendance for user: {}", user.username),
                            &error_chain(&e),
                        )
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Scrapes a user's attendance, then diffs, stores and notifies one subject at a time.
    async fn update_user(&self, user: &User) -> Result<UserReport, SyncError> {
        let records = self.source.scrape(user).await?;
        let mut report = UserReport {
            subjects: records.len(),
            ..UserReport::default()
        };

        for record in records {
            let stored = self
                .store
                .get_attendance(&user.id, &record.subject_code)
                .await?;
            let result = diff(&user.id, stored.as_ref(), &record);

            if result.is_unchanged() && stored.as_ref() == Some(&result.row) {
                continue;
            }
            self.store.upsert_attendance(&result.row).await?;

            if stored.is_none() {
                report.new_subjects += 1;
            } else {
                report.changed_subjects += 1;
            }

            let change = SubjectChange::new(record, &result);
            report.emails_sent += self.notifier.notify(user, &change).await;
        }

        Ok(report)
    }
}
