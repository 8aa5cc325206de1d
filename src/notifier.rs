//! Emails students about attendance changes and operators about the service itself.
//!
//! Nothing here returns an error to the caller. Sends are retried with exponential backoff while
//! the failure looks transient; once the attempts run out the failure is logged and dropped so
//! that one bad mailbox cannot stall the sync of everyone else.

use crate::config::NotifySettings;
use crate::diff::DiffResult;
use crate::mailer::Mailer;
use crate::models::{AttendanceRecord, User};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Present,
    Absent,
}

impl ChangeType {
    const fn verb(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}

/// A change in one subject's attendance for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectChange {
    pub record: AttendanceRecord,
    pub present_delta: i32,
    pub absent_delta: i32,
}

impl SubjectChange {
    pub fn new(record: AttendanceRecord, diff: &DiffResult) -> Self {
        Self {
            record,
            present_delta: diff.present_delta,
            absent_delta: diff.absent_delta,
        }
    }

    /// The emails this change should produce for a user, in the order they are sent.
    pub fn notifications_for(&self, user: &User) -> Vec<ChangeType> {
        let preference = user.preference();
        let mut out = Vec::with_capacity(2);

        if self.present_delta > 0 && preference.wants_present() {
            out.push(ChangeType::Present);
        }
        if self.absent_delta > 0 && preference.wants_absent() {
            out.push(ChangeType::Absent);
        }

        out
    }

    fn delta(&self, kind: ChangeType) -> i32 {
        match kind {
            ChangeType::Present => self.present_delta,
            ChangeType::Absent => self.absent_delta,
        }
    }
}

/// Builds the subject line and body of an attendance email.
pub fn render_attendance_email(
    name: &str,
    kind: ChangeType,
    change: &SubjectChange,
) -> (String, String) {
    let record = &change.record;
    let subject = format!("Attendance Notification: {}", record.subject_name);
    let body = format!(
        "Hello, {name}\n\n\
         You have been marked {verb} for {subject_name}.\n\
         Total Hours: {total}\n\
         Present Hours: {present}\n\
         Absent Hours: {absent}\n\
         Percentage: {percentage:.2}\n\n\
         Change: +{delta} {verb} hours",
        verb = kind.verb(),
        subject_name = record.subject_name,
        total = record.total_hours,
        present = record.present_hours,
        absent = record.absent_hours,
        percentage = record.percentage,
        delta = change.delta(kind),
    );

    (subject, body)
}

/// Sends attendance and operator emails through a [`Mailer`].
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    admins: Vec<String>,
    attempts: u32,
    backoff: Duration,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, admins: Vec<String>, settings: &NotifySettings) -> Self {
        Self {
            mailer,
            admins,
            attempts: settings.attempts.max(1),
            backoff: settings.backoff(),
        }
    }

    /// Emails `user` about `change` if their preference asks for it. Returns how many emails
    /// were delivered.
    pub async fn notify(&self, user: &User, change: &SubjectChange) -> usize {
        let mut delivered = 0;

        for kind in change.notifications_for(user) {
            info!(
                user = %user.username,
                subject = %change.record.subject_code,
                kind = kind.verb(),
                delta = change.delta(kind),
                "sending attendance notification"
            );
            let (subject, body) = render_attendance_email(&user.name, kind, change);
            if self.send_email(&user.email, &subject, &body).await {
                delivered += 1;
            }
        }

        delivered
    }

    /// Tells the operators that the service has started.
    pub async fn send_boot_notification(&self) {
        let subject = "Attendance Monitoring Service Started";
        let body = format!(
            "Hello, Admin\n\n\
             This is to notify you that the Attendance Monitoring Service has started successfully at {}.",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );

        self.send_to_admins(subject, &body).await;
    }

    /// Tells the operators that something went wrong, with the error chain as diagnostics.
    pub async fn send_error_notification(&self, message: &str, trace: &str) {
        let subject = "Attendance Monitoring Service Error";
        let body = format!(
            "Hello, Admin\n\n\
             {message}\n\n\
             Time: {}\n\n\
             Trace:\n{trace}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );

        self.send_to_admins(subject, &body).await;
    }

    async fn send_to_admins(&self, subject: &str, body: &str) {
        if self.admins.is_empty() {
            warn!(subject, "no admin addresses configured, dropping operator email");
            return;
        }

        for admin in &self.admins {
            self.send_email(admin, subject, body).await;
        }
    }

    /// Sends one email, retrying transient failures. Returns whether it was delivered.
    pub async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool {
        let mut delay = self.backoff;

        for attempt in 1..=self.attempts {
            match self.mailer.send(to, subject, body).await {
                Ok(()) => return true,
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(to, attempt, max_attempts = self.attempts, "email failed, retrying: {e}");
                    sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    error!(to, attempt, "giving up on email: {e}");
                    return false;
                }
            }
        }

        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::error::MailError;
    use crate::models::{NewUser, NotificationPreference};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every email and fails the first `failures` sends.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub calls: Mutex<usize>,
        pub failures: usize,
        pub permanent: bool,
    }

    impl RecordingMailer {
        pub(crate) fn sent_to(&self, to: &str) -> Vec<(String, String)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _, _)| t == to)
                .map(|(_, s, b)| (s.clone(), b.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call <= self.failures {
                return Err(if self.permanent {
                    MailError::Permanent("rejected".into())
                } else {
                    MailError::Transient("try later".into())
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn quick() -> NotifySettings {
        NotifySettings {
            attempts: 5,
            backoff_ms: 0,
            report_user_errors: true,
        }
    }

    fn user(preference: NotificationPreference) -> User {
        NewUser {
            name: "Ferris".to_string(),
            email: "ferris@example.edu".to_string(),
            username: "RA0001".to_string(),
            password: "pw".to_string(),
            notification_level: preference,
        }
        .into_user(6)
        .unwrap()
    }

    fn change(present_delta: i32, absent_delta: i32) -> SubjectChange {
        SubjectChange {
            record: AttendanceRecord {
                subject_code: "MA101".to_string(),
                subject_name: "Calculus".to_string(),
                total_hours: 20,
                present_hours: 15,
                absent_hours: 5,
                percentage: 75.0,
            },
            present_delta,
            absent_delta,
        }
    }

    #[test]
    fn test_gating_matrix() {
        use ChangeType::*;
        use NotificationPreference::*;

        // (preference, present_delta, absent_delta, expected)
        let cases = [
            (All, 1, 1, vec![Present, Absent]),
            (All, 1, 0, vec![Present]),
            (All, 0, 2, vec![Absent]),
            (All, -1, 0, vec![]),
            (PresentOnly, 1, 1, vec![Present]),
            (PresentOnly, 1, 0, vec![Present]),
            (PresentOnly, 0, 2, vec![]),
            (PresentOnly, -1, 0, vec![]),
            (AbsentOnly, 1, 1, vec![Absent]),
            (AbsentOnly, 1, 0, vec![]),
            (AbsentOnly, 0, 2, vec![Absent]),
            (AbsentOnly, -1, 0, vec![]),
        ];

        for (preference, present, absent, expected) in cases {
            assert_eq!(
                change(present, absent).notifications_for(&user(preference)),
                expected,
                "{preference} with deltas ({present}, {absent})"
            );
        }
    }

    #[test]
    fn test_negative_deltas_are_silent() {
        let c = change(-3, -1);
        assert!(c.notifications_for(&user(NotificationPreference::All)).is_empty());
    }

    #[test]
    fn test_render_templates() {
        let c = change(2, 1);
        let (subject, present) = render_attendance_email("Ferris", ChangeType::Present, &c);
        let (_, absent) = render_attendance_email("Ferris", ChangeType::Absent, &c);

        assert_eq!(subject, "Attendance Notification: Calculus");
        assert!(present.starts_with("Hello, Ferris"));
        assert!(present.contains("marked present for Calculus"));
        assert!(present.contains("Change: +2 present hours"));
        assert!(absent.contains("marked absent for Calculus"));
        assert!(absent.contains("Change: +1 absent hours"));
        for body in [&present, &absent] {
            assert!(body.contains("Total Hours: 20"));
            assert!(body.contains("Present Hours: 15"));
            assert!(body.contains("Absent Hours: 5"));
            assert!(body.contains("Percentage: 75.00"));
        }
    }

    #[test]
    fn test_change_from_diff() {
        let c = change(0, 0);
        let result = diff("u1", None, &c.record);
        let from_diff = SubjectChange::new(c.record.clone(), &result);

        assert_eq!(from_diff.present_delta, 15);
        assert_eq!(from_diff.absent_delta, 5);
    }

    #[tokio::test]
    async fn test_notify_sends_both() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone(), vec![], &quick());

        let sent = notifier
            .notify(&user(NotificationPreference::All), &change(2, 1))
            .await;

        assert_eq!(sent, 2);
        let mails = mailer.sent_to("ferris@example.edu");
        assert!(mails[0].1.contains("marked present"));
        assert!(mails[1].1.contains("marked absent"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mailer = Arc::new(RecordingMailer {
            failures: 4,
            ..Default::default()
        });
        let notifier = Notifier::new(mailer.clone(), vec![], &quick());

        assert!(notifier.send_email("a@example.edu", "s", "b").await);
        assert_eq!(*mailer.calls.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_retries_are_bounded_and_swallowed() {
        let mailer = Arc::new(RecordingMailer {
            failures: usize::MAX,
            ..Default::default()
        });
        let notifier = Notifier::new(mailer.clone(), vec![], &quick());

        assert_eq!(
            notifier
                .notify(&user(NotificationPreference::All), &change(1, 0))
                .await,
            0
        );
        assert_eq!(*mailer.calls.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let mailer = Arc::new(RecordingMailer {
            failures: usize::MAX,
            permanent: true,
            ..Default::default()
        });
        let notifier = Notifier::new(mailer.clone(), vec![], &quick());

        assert!(!notifier.send_email("a@example.edu", "s", "b").await);
        assert_eq!(*mailer.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_operator_emails_go_to_every_admin() {
        let mailer = Arc::new(RecordingMailer::default());
        let admins = vec!["ops@example.edu".to_string(), "dev@example.edu".to_string()];
        let notifier = Notifier::new(mailer.clone(), admins, &quick());

        notifier.send_boot_notification().await;
        notifier
            .send_error_notification("Error updating attendance for user: RA0001", "boom")
            .await;

        for admin in ["ops@example.edu", "dev@example.edu"] {
            let mails = mailer.sent_to(admin);
            assert_eq!(mails.len(), 2);
            assert_eq!(mails[0].0, "Attendance Monitoring Service Started");
            assert_eq!(mails[1].0, "Attendance Monitoring Service Error");
            assert!(mails[1].1.contains("RA0001"));
            assert!(mails[1].1.contains("Trace:\nboom"));
        }
    }
}
