use rollcall_core::Embedding;
use serde::Serialize;
use zbus::interface;

use crate::notify::NotifyChannel;
use crate::service::{AttendanceService, ServiceError};

pub const BUS_NAME: &str = "org.freedesktop.Rollcall1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Rollcall1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.freedesktop.Rollcall1
/// Object path: /org/freedesktop/Rollcall1
///
/// Structured replies are JSON strings.
pub struct RollcallService {
    service: AttendanceService<NotifyChannel>,
}

impl RollcallService {
    pub fn new(service: AttendanceService<NotifyChannel>) -> Self {
        Self { service }
    }
}

#[interface(name = "org.freedesktop.Rollcall1")]
impl RollcallService {
    /// Enroll a student with their guardian's contact number and reference embedding.
    async fn register(
        &self,
        name: &str,
        guardian_contact: &str,
        embedding: Vec<f64>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, dim = embedding.len(), "register requested");
        let student = self
            .service
            .register(name, guardian_contact, to_embedding(embedding))
            .await
            .map_err(to_fdo)?;
        to_json(&student)
    }

    /// Match a face embedding and record attendance for the recognized student.
    async fn check_in(&self, embedding: Vec<f64>) -> zbus::fdo::Result<String> {
        tracing::debug!(dim = embedding.len(), "check_in requested");
        let report = self
            .service
            .check_in(to_embedding(embedding))
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Attendance log, newest first.
    async fn history(&self) -> zbus::fdo::Result<String> {
        let entries = self.service.history().await.map_err(to_fdo)?;
        to_json(&entries)
    }

    /// Delete one attendance entry. Returns false if it does not exist.
    async fn delete_log(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "delete_log requested");
        self.service.delete_log(id).await.map_err(to_fdo)
    }

    /// Delete the whole attendance log. Returns the number of entries removed.
    async fn clear_logs(&self) -> zbus::fdo::Result<u64> {
        tracing::info!("clear_logs requested");
        self.service.clear_logs().await.map_err(to_fdo)
    }

    async fn list_students(&self) -> zbus::fdo::Result<String> {
        let students = self.service.list_students().await.map_err(to_fdo)?;
        to_json(&students)
    }

    async fn remove_student(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "remove_student requested");
        self.service.remove_student(id).await.map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let students = self.service.student_count().await.map_err(to_fdo)?;
        let settings = self.service.settings();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "students": students,
            "match_threshold": settings.match_threshold,
            "embedding_dim": settings.embedding_dim,
            "checkin_cooldown_secs": settings.checkin_cooldown.as_secs(),
            "notifier": self.service.notifier_kind(),
        })
        .to_string())
    }
}

/// D-Bus carries doubles; embeddings are f32.
fn to_embedding(values: Vec<f64>) -> Embedding {
    Embedding::new(values.into_iter().map(|v| v as f32).collect())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| zbus::fdo::Error::Failed(format!("encoding reply: {e}")))
}

/// Caller mistakes become InvalidArgs; internal failures are logged and
/// reported generically.
fn to_fdo(err: ServiceError) -> zbus::fdo::Error {
    if err.is_client_error() {
        zbus::fdo::Error::InvalidArgs(err.to_string())
    } else {
        tracing::error!(error = %err, "request failed");
        zbus::fdo::Error::Failed("internal error; see daemon log".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::MatchError;

    #[test]
    fn test_to_embedding_narrows() {
        let e = to_embedding(vec![0.5, -1.25]);
        assert_eq!(e.values, vec![0.5f32, -1.25f32]);
        assert!(!to_embedding(vec![f64::MAX]).is_finite());
    }

    #[test]
    fn test_client_errors_are_invalid_args() {
        let err = MatchError::InvalidInput("query embedding is empty");
        let err = to_fdo(ServiceError::Match(err));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(msg) if msg.contains("empty")));

        let err = ServiceError::InvalidRequest("name and guardian contact are required".into());
        assert!(matches!(to_fdo(err), zbus::fdo::Error::InvalidArgs(_)));
    }

    #[test]
    fn test_bad_threshold_is_internal_failure() {
        let err = to_fdo(ServiceError::Match(MatchError::InvalidThreshold(-1.0)));
        assert!(matches!(err, zbus::fdo::Error::Failed(msg) if !msg.contains("-1")));
    }
}
