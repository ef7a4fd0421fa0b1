//! Attendance workflows on top of the store, matcher and notifier.
//!
//! Check-in order: load candidates, match, append the attendance entry,
//! then notify the guardian in the background.

use chrono::{DateTime, Local, Utc};
use rollcall_core::{Embedding, EuclideanMatcher, MatchError, MatchOutcome, Matcher};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::notify::{Notification, Notifier};
use crate::store::{AttendanceEntry, Store, StoreError, Student};

const CHECK_IN_NOTE: &str = "check-in";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// True for errors caused by the caller's input rather than the daemon.
    ///
    /// A rejected threshold comes from the daemon's own settings, so it is
    /// not one of them.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidRequest(_) | ServiceError::Match(MatchError::InvalidInput(_))
        )
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub match_threshold: f32,
    /// Required embedding length at enrollment; 0 accepts any length.
    pub embedding_dim: usize,
    /// A matched student is not logged again within this window.
    pub checkin_cooldown: Duration,
}

/// What happened to a check-in attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckIn {
    /// Matched and logged.
    Recorded {
        student: Student,
        distance: f32,
        entry: AttendanceEntry,
    },
    /// Matched, but the student was already logged inside the cooldown window.
    CoolingDown {
        student: Student,
        distance: f32,
        last_logged_at: DateTime<Utc>,
    },
    Unrecognized {
        closest_distance: Option<f32>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckInReport {
    #[serde(flatten)]
    pub outcome: CheckIn,
    /// Enrollments excluded from matching (wrong dimensionality).
    pub skipped: usize,
}

pub struct AttendanceService<N> {
    store: Store,
    notifier: Arc<N>,
    settings: ServiceSettings,
}

impl<N: Notifier> AttendanceService<N> {
    pub fn new(store: Store, notifier: N, settings: ServiceSettings) -> Self {
        Self {
            store,
            notifier: Arc::new(notifier),
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn notifier_kind(&self) -> &'static str {
        self.notifier.kind()
    }

    /// Enroll a student and tell their guardian.
    pub async fn register(
        &self,
        name: &str,
        guardian_contact: &str,
        embedding: Embedding,
    ) -> Result<Student, ServiceError> {
        let name = name.trim();
        let guardian_contact = guardian_contact.trim();
        if name.is_empty() || guardian_contact.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "name and guardian contact are required".into(),
            ));
        }
        embedding.validate()?;
        let dim = self.settings.embedding_dim;
        if dim != 0 && embedding.len() != dim {
            return Err(ServiceError::InvalidRequest(format!(
                "expected {dim}-dimensional embedding, got {}",
                embedding.len()
            )));
        }

        let student = self
            .store
            .insert_student(name, guardian_contact, &embedding)
            .await?;
        tracing::info!(id = %student.id, name = %student.name, "student enrolled");

        self.dispatch(
            &student.guardian_contact,
            Notification::Registered {
                name: student.name.clone(),
            },
        );
        Ok(student)
    }

    /// Identify a face and record attendance on a match.
    pub async fn check_in(&self, embedding: Embedding) -> Result<CheckInReport, ServiceError> {
        embedding.validate()?;

        let records = self.store.list_records().await?;
        if records.is_empty() {
            tracing::warn!("check-in attempted with no enrolled students");
        }

        let result = EuclideanMatcher.compare(&embedding, &records, self.settings.match_threshold)?;
        let skipped = result.skipped;
        if skipped > 0 {
            tracing::warn!(
                skipped,
                query_dim = embedding.len(),
                "enrollments with mismatched embedding size were ignored"
            );
        }

        let (identity, distance) = match result.outcome {
            MatchOutcome::Matched { identity, distance } => (identity, distance),
            MatchOutcome::NoMatch { closest_distance } => {
                tracing::info!(closest = ?closest_distance, "face not recognized");
                return Ok(CheckInReport {
                    outcome: CheckIn::Unrecognized { closest_distance },
                    skipped,
                });
            }
        };

        // The student may have been removed after the candidates were loaded.
        let Some(student) = self.store.get_student(&identity).await? else {
            tracing::warn!(id = %identity, "matched student no longer enrolled");
            return Ok(CheckInReport {
                outcome: CheckIn::Unrecognized {
                    closest_distance: Some(distance),
                },
                skipped,
            });
        };

        let now = Utc::now();
        if let Some(last) = self.store.last_attendance(&student.id).await? {
            if self.within_cooldown(last, now) {
                tracing::info!(
                    id = %student.id,
                    name = %student.name,
                    "repeat check-in inside cooldown; not logged"
                );
                return Ok(CheckInReport {
                    outcome: CheckIn::CoolingDown {
                        student,
                        distance,
                        last_logged_at: last,
                    },
                    skipped,
                });
            }
        }

        let entry = self
            .store
            .append_attendance(&student, CHECK_IN_NOTE, now)
            .await?;
        tracing::info!(id = %student.id, name = %student.name, distance, "attendance recorded");

        self.dispatch(
            &student.guardian_contact,
            Notification::CheckedIn {
                name: student.name.clone(),
                at: now.with_timezone(&Local),
            },
        );

        Ok(CheckInReport {
            outcome: CheckIn::Recorded {
                student,
                distance,
                entry,
            },
            skipped,
        })
    }

    /// Attendance log, newest first.
    pub async fn history(&self) -> Result<Vec<AttendanceEntry>, ServiceError> {
        Ok(self.store.list_attendance().await?)
    }

    pub async fn delete_log(&self, id: &str) -> Result<bool, ServiceError> {
        let removed = self.store.delete_attendance(id).await?;
        if removed {
            tracing::info!(id, "attendance entry deleted");
        }
        Ok(removed)
    }

    pub async fn clear_logs(&self) -> Result<u64, ServiceError> {
        let removed = self.store.clear_attendance().await?;
        tracing::info!(removed, "attendance log cleared");
        Ok(removed)
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, ServiceError> {
        Ok(self.store.list_students().await?)
    }

    pub async fn remove_student(&self, id: &str) -> Result<bool, ServiceError> {
        let removed = self.store.remove_student(id).await?;
        if removed {
            tracing::info!(id, "student removed");
        }
        Ok(removed)
    }

    pub async fn student_count(&self) -> Result<usize, ServiceError> {
        Ok(self.store.count_students().await?)
    }

    fn within_cooldown(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A last entry in the future (clock step) does not block logging.
        (now - last)
            .to_std()
            .map_or(false, |elapsed| elapsed < self.settings.checkin_cooldown)
    }

    /// Send a notification without waiting for it. Failures are only logged.
    fn dispatch(&self, destination: &str, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        let destination = destination.to_string();
        tokio::spawn(async move {
            let message = notification.message();
            match notifier.notify(&destination, &message).await {
                Ok(()) => tracing::debug!(kind = notification.kind(), "guardian notified"),
                Err(err) => tracing::warn!(
                    kind = notification.kind(),
                    error = %err,
                    "guardian notification failed"
                ),
            }
        });
    }
}
