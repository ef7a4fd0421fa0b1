//! SQLite persistence for enrolled students and the attendance log.
//!
//! All access goes through a `tokio_rusqlite::Connection`, which runs the
//! blocking rusqlite calls on its own background thread.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rollcall_core::{Embedding, EnrollmentRecord};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    guardian_contact TEXT NOT NULL,
    embedding        BLOB NOT NULL,
    enrolled_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id         TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    name       TEXT NOT NULL,
    note       TEXT NOT NULL,
    logged_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_student_time ON attendance (student_id, logged_at);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("cannot create data directory {0}: {1}")]
    DataDir(String, std::io::Error),
}

/// An enrolled student, without the reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub guardian_contact: String,
    pub enrolled_at: DateTime<Utc>,
}

/// One row of the attendance log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEntry {
    pub id: String,
    pub student_id: String,
    pub name: String,
    pub note: String,
    pub logged_at: DateTime<Utc>,
}

/// Handle to the attendance database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file, creating its parent directory.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::DataDir(parent.display().to_string(), e))?;
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Open a private in-memory database.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn insert_student(
        &self,
        name: &str,
        guardian_contact: &str,
        embedding: &Embedding,
    ) -> Result<Student, StoreError> {
        let student = Student {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            guardian_contact: guardian_contact.to_string(),
            enrolled_at: Utc::now().trunc_subsecs(6),
        };
        let blob = encode_embedding(embedding);
        let row = student.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO students (id, name, guardian_contact, embedding, enrolled_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.id,
                        row.name,
                        row.guardian_contact,
                        blob,
                        format_time(&row.enrolled_at)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(student)
    }

    /// All enrollments as match candidates, in insertion order.
    ///
    /// The identity of each record is the student id.
    pub async fn list_records(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let records = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, embedding FROM students ORDER BY rowid")?;
                let rows = stmt.query_map([], |row| {
                    let blob: Vec<u8> = row.get(1)?;
                    Ok(EnrollmentRecord {
                        identity: row.get(0)?,
                        embedding: decode_embedding(&blob, 1)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(records)
    }

    pub async fn get_student(&self, id: &str) -> Result<Option<Student>, StoreError> {
        let id = id.to_string();
        let student = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, guardian_contact, enrolled_at FROM students
                         WHERE id = ?1",
                        params![id],
                        student_from_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(student)
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let students = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, guardian_contact, enrolled_at FROM students ORDER BY rowid",
                )?;
                let rows = stmt.query_map([], student_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(students)
    }

    /// Remove a student. Their past attendance entries are kept.
    pub async fn remove_student(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM students WHERE id = ?1", params![id])?)
            })
            .await?;
        Ok(removed > 0)
    }

    pub async fn count_students(&self) -> Result<usize, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get::<_, i64>(0))?)
            })
            .await?;
        Ok(count as usize)
    }

    pub async fn append_attendance(
        &self,
        student: &Student,
        note: &str,
        logged_at: DateTime<Utc>,
    ) -> Result<AttendanceEntry, StoreError> {
        let entry = AttendanceEntry {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student.id.clone(),
            name: student.name.clone(),
            note: note.to_string(),
            logged_at: logged_at.trunc_subsecs(6),
        };
        let row = entry.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (id, student_id, name, note, logged_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.id,
                        row.student_id,
                        row.name,
                        row.note,
                        format_time(&row.logged_at)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(entry)
    }

    /// Time of the most recent attendance entry for a student.
    pub async fn last_attendance(
        &self,
        student_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let student_id = student_id.to_string();
        let last = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT logged_at FROM attendance WHERE student_id = ?1
                         ORDER BY logged_at DESC LIMIT 1",
                        params![student_id],
                        |row| parse_time(row, 0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(last)
    }

    /// The whole attendance log, newest first.
    pub async fn list_attendance(&self) -> Result<Vec<AttendanceEntry>, StoreError> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_id, name, note, logged_at FROM attendance
                     ORDER BY logged_at DESC, rowid DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(AttendanceEntry {
                        id: row.get(0)?,
                        student_id: row.get(1)?,
                        name: row.get(2)?,
                        note: row.get(3)?,
                        logged_at: parse_time(row, 4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(entries)
    }

    pub async fn delete_attendance(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM attendance WHERE id = ?1", params![id])?)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Delete every attendance entry, returning how many were removed.
    pub async fn clear_attendance(&self) -> Result<u64, StoreError> {
        let removed = self
            .conn
            .call(|conn| Ok(conn.execute("DELETE FROM attendance", [])?))
            .await?;
        Ok(removed as u64)
    }
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        guardian_contact: row.get(2)?,
        enrolled_at: parse_time(row, 3)?,
    })
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
/// Stored precision is microseconds.
fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Embeddings are stored as packed little-endian f32 values.
fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_embedding(blob: &[u8], idx: usize) -> rusqlite::Result<Embedding> {
    if blob.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Blob,
            format!("embedding blob length {} is not a multiple of 4", blob.len()).into(),
        ));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding::new(values))
}
