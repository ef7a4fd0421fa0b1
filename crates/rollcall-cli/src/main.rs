use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    nearest_match, Embedding, EnrollmentRecord, MatchResult, DEFAULT_MATCH_THRESHOLD,
};
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates the async `RollcallProxy`; no blocking variant.
#[zbus::proxy(
    gen_blocking = false,
    interface = "org.freedesktop.Rollcall1",
    default_service = "org.freedesktop.Rollcall1",
    default_path = "/org/freedesktop/Rollcall1"
)]
trait Rollcall {
    async fn register(
        &self,
        name: &str,
        guardian_contact: &str,
        embedding: Vec<f64>,
    ) -> zbus::Result<String>;
    async fn check_in(&self, embedding: Vec<f64>) -> zbus::Result<String>;
    async fn history(&self) -> zbus::Result<String>;
    async fn delete_log(&self, id: &str) -> zbus::Result<bool>;
    async fn clear_logs(&self) -> zbus::Result<u64>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn remove_student(&self, id: &str) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student
    Register {
        /// Student name
        #[arg(short, long)]
        name: String,
        /// Guardian's phone number for notifications
        #[arg(short, long)]
        guardian: String,
        /// JSON file holding the face embedding (array of numbers)
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Check in with a face embedding
    CheckIn {
        /// JSON file holding the face embedding (array of numbers)
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Show the attendance log, newest first
    History,
    /// Delete one attendance entry
    Delete {
        /// Attendance entry ID
        id: String,
    },
    /// Delete the whole attendance log
    Clear,
    /// List enrolled students
    Students,
    /// Remove an enrolled student
    Remove {
        /// Student ID
        id: String,
    },
    /// Show daemon status
    Status,
    /// Match an embedding against a gallery file locally, without the daemon
    Match {
        /// JSON file holding the query embedding
        #[arg(short, long)]
        query: PathBuf,
        /// JSON file holding an array of {"identity", "embedding"} records
        #[arg(short, long)]
        gallery: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let session = cli.session;

    match cli.command {
        Commands::Register {
            name,
            guardian,
            embedding,
        } => {
            let values = to_wire(&read_embedding(&embedding)?);
            let reply = connect(session).await?.register(&name, &guardian, values).await?;
            print_json(&reply)?;
        }
        Commands::CheckIn { embedding } => {
            let values = to_wire(&read_embedding(&embedding)?);
            let reply = connect(session).await?.check_in(values).await?;
            print_json(&reply)?;
        }
        Commands::History => print_json(&connect(session).await?.history().await?)?,
        Commands::Delete { id } => {
            if connect(session).await?.delete_log(&id).await? {
                println!("Deleted attendance entry {id}");
            } else {
                bail!("no attendance entry with id {id}");
            }
        }
        Commands::Clear => {
            let removed = connect(session).await?.clear_logs().await?;
            println!("Cleared {removed} attendance entries");
        }
        Commands::Students => print_json(&connect(session).await?.list_students().await?)?,
        Commands::Remove { id } => {
            if connect(session).await?.remove_student(&id).await? {
                println!("Removed student {id}");
            } else {
                bail!("no student with id {id}");
            }
        }
        Commands::Status => print_json(&connect(session).await?.status().await?)?,
        Commands::Match {
            query,
            gallery,
            threshold,
        } => {
            let result = local_match(&query, &gallery, threshold)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

/// Connect to the daemon on the chosen bus.
async fn connect(session: bool) -> Result<RollcallProxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    tracing::debug!(session, "connected to D-Bus");

    RollcallProxy::new(&conn)
        .await
        .context("is rollcalld running?")
}

/// Match a query embedding file against a gallery file without the daemon.
fn local_match(query: &Path, gallery: &Path, threshold: f32) -> Result<MatchResult> {
    let query = read_embedding(query)?;
    let text = std::fs::read_to_string(gallery)
        .with_context(|| format!("reading {}", gallery.display()))?;
    let records: Vec<EnrollmentRecord> = serde_json::from_str(&text)
        .with_context(|| format!("parsing gallery {}", gallery.display()))?;
    tracing::debug!(
        candidates = records.len(),
        dim = query.len(),
        threshold,
        "matching locally"
    );

    Ok(nearest_match(&query, &records, threshold)?)
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let embedding: Embedding = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    Ok(embedding)
}

fn to_wire(embedding: &Embedding) -> Vec<f64> {
    embedding.values.iter().map(|&v| f64::from(v)).collect()
}

/// Pretty-print a JSON reply from the daemon.
fn print_json(reply: &str) -> Result<()> {
    tracing::debug!(reply, "daemon reply");
    let value: serde_json::Value =
        serde_json::from_str(reply).context("daemon sent invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_match_threshold_defaults() {
        let cli = Cli::parse_from(["rollcall", "match", "-q", "q.json", "-g", "g.json"]);
        match cli.command {
            Commands::Match { threshold, .. } => assert_eq!(threshold, 0.6),
            _ => panic!("expected match subcommand"),
        }
    }

    #[test]
    fn test_session_flag_is_global() {
        let cli = Cli::parse_from(["rollcall", "status", "--session"]);
        assert!(cli.session);
    }

    fn write_json(dir: &tempfile::TempDir, name: &str, json: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_local_match_picks_nearest() {
        let dir = tempfile::tempdir().unwrap();
        let query = write_json(&dir, "query.json", "[0.0, 0.1]");
        let gallery = write_json(
            &dir,
            "gallery.json",
            r#"[
                {"identity": "ani", "embedding": [0.0, 0.0]},
                {"identity": "budi", "embedding": [1.0, 1.0]},
                {"identity": "citra", "embedding": [0.0, 0.0, 0.0]}
            ]"#,
        );

        let result = local_match(&query, &gallery, 0.6).unwrap();
        assert_eq!(result.identity(), Some("ani"));
        assert_eq!(result.skipped, 1);

        let strict = local_match(&query, &gallery, 0.05).unwrap();
        assert!(!strict.is_match());
    }

    #[test]
    fn test_local_match_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = r#"[{"identity": "ani", "embedding": [0.0]}]"#;
        let gallery = write_json(&dir, "gallery.json", gallery);

        let not_numbers = write_json(&dir, "query.json", r#"{"values": "face"}"#);
        let err = local_match(&not_numbers, &gallery, 0.6).unwrap_err();
        assert!(err.to_string().contains("not a JSON array of numbers"));

        let missing = dir.path().join("missing.json");
        assert!(local_match(&missing, &gallery, 0.6).is_err());

        let empty = write_json(&dir, "empty.json", "[]");
        assert!(local_match(&empty, &gallery, 0.6).is_err());
    }

    #[test]
    fn test_to_wire_widens() {
        assert_eq!(to_wire(&Embedding::new(vec![0.5, -2.0])), vec![0.5, -2.0]);
    }
}
