use rollcall_core::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::service::ServiceSettings;

const DEFAULT_CONFIG_PATH: &str = "/etc/rollcall/rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid match threshold {0}: must be a finite, non-negative number")]
    InvalidThreshold(f32),
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown bus '{other}', expected 'system' or 'session'")),
        }
    }
}

/// Daemon configuration.
///
/// Built-in defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a check-in matches an enrolled student.
    pub match_threshold: f32,
    /// Required embedding length at enrollment (0 accepts any length).
    pub embedding_dim: usize,
    /// Seconds during which a repeat check-in of the same student is not logged again.
    pub checkin_cooldown_secs: u64,
    /// Messaging gateway endpoint; when unset notifications only go to the log.
    pub notify_webhook_url: Option<String>,
    /// Timeout in seconds for a gateway request.
    pub notify_timeout_secs: u64,
    pub bus: BusKind,
}

/// On-disk shape of the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    embedding_dim: Option<usize>,
    checkin_cooldown_secs: Option<u64>,
    notify_webhook_url: Option<String>,
    notify_timeout_secs: Option<u64>,
    bus: Option<BusKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("attendance.db"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            embedding_dim: 128,
            checkin_cooldown_secs: 5,
            notify_webhook_url: None,
            notify_timeout_secs: 10,
            bus: BusKind::System,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the config file, then the environment.
    ///
    /// A missing file at the default location is fine; a missing file named
    /// explicitly via `ROLLCALL_CONFIG` is an error. So is a threshold that
    /// is negative or not a finite number.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(Path::new(DEFAULT_CONFIG_PATH), |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with the default file location and variable lookup supplied.
    fn load_with(
        default_path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let explicit = env("ROLLCALL_CONFIG").map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| default_path.to_path_buf());

        let mut config = Self::default();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                config.apply_file(parse_file(&path, &text)?);
                tracing::info!(path = %path.display(), "loaded config file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {}
            Err(source) => return Err(ConfigError::Read { path, source }),
        }
        config.apply_env(&env);

        if !config.match_threshold.is_finite() || config.match_threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(config.match_threshold));
        }
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.embedding_dim {
            self.embedding_dim = v;
        }
        if let Some(v) = file.checkin_cooldown_secs {
            self.checkin_cooldown_secs = v;
        }
        if file.notify_webhook_url.is_some() {
            self.notify_webhook_url = file.notify_webhook_url;
        }
        if let Some(v) = file.notify_timeout_secs {
            self.notify_timeout_secs = v;
        }
        if let Some(v) = file.bus {
            self.bus = v;
        }
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.match_threshold =
            env_parse(env, "ROLLCALL_MATCH_THRESHOLD").unwrap_or(self.match_threshold);
        self.embedding_dim = env_parse(env, "ROLLCALL_EMBEDDING_DIM").unwrap_or(self.embedding_dim);
        self.checkin_cooldown_secs =
            env_parse(env, "ROLLCALL_CHECKIN_COOLDOWN_SECS").unwrap_or(self.checkin_cooldown_secs);
        if let Some(v) = env("ROLLCALL_NOTIFY_WEBHOOK_URL") {
            self.notify_webhook_url = Some(v).filter(|url| !url.is_empty());
        }
        self.notify_timeout_secs =
            env_parse(env, "ROLLCALL_NOTIFY_TIMEOUT_SECS").unwrap_or(self.notify_timeout_secs);
        self.bus = env_parse(env, "ROLLCALL_BUS").unwrap_or(self.bus);
    }

    /// Settings consumed by the attendance service.
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            match_threshold: self.match_threshold,
            embedding_dim: self.embedding_dim,
            checkin_cooldown: Duration::from_secs(self.checkin_cooldown_secs),
        }
    }
}

fn parse_file(path: &Path, text: &str) -> Result<FileConfig, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Parse an environment variable, ignoring it when unset or malformed.
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Variable lookup backed by a fixed map instead of the process environment.
    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn missing_default(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("absent.toml")
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(&missing_default(&dir), vars(&[])).unwrap();
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let named = dir.path().join("named.toml");
        let env = vars(&[("ROLLCALL_CONFIG", named.to_str().unwrap())]);
        let err = Config::load_with(&missing_default(&dir), env).unwrap_err();
        assert!(matches!(err, ConfigError::Read { path, .. } if path == named));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rollcall.toml");
        std::fs::write(&file, "match_threshold = 0.5\ncheckin_cooldown_secs = 30\n").unwrap();

        let env = vars(&[
            ("ROLLCALL_CONFIG", file.to_str().unwrap()),
            ("ROLLCALL_DB_PATH", "/srv/rollcall.db"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.45"),
            ("ROLLCALL_EMBEDDING_DIM", "512"),
            ("ROLLCALL_NOTIFY_WEBHOOK_URL", "http://gateway/send"),
            ("ROLLCALL_NOTIFY_TIMEOUT_SECS", "3"),
            ("ROLLCALL_BUS", "session"),
        ]);
        let config = Config::load_with(&missing_default(&dir), env).unwrap();

        assert_eq!(config.db_path, PathBuf::from("/srv/rollcall.db"));
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.embedding_dim, 512);
        // From the file, not overridden.
        assert_eq!(config.checkin_cooldown_secs, 30);
        assert_eq!(config.notify_webhook_url.as_deref(), Some("http://gateway/send"));
        assert_eq!(config.notify_timeout_secs, 3);
        assert_eq!(config.bus, BusKind::Session);
    }

    #[test]
    fn test_malformed_env_values_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let env = vars(&[
            ("ROLLCALL_EMBEDDING_DIM", "many"),
            ("ROLLCALL_CHECKIN_COOLDOWN_SECS", "-5"),
            ("ROLLCALL_BUS", "user"),
        ]);
        let config = Config::load_with(&missing_default(&dir), env).unwrap();
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.checkin_cooldown_secs, 5);
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_empty_webhook_env_disables_webhook() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rollcall.toml");
        std::fs::write(&file, "notify_webhook_url = \"http://gateway/send\"\n").unwrap();
        let env = vars(&[
            ("ROLLCALL_CONFIG", file.to_str().unwrap()),
            ("ROLLCALL_NOTIFY_WEBHOOK_URL", ""),
        ]);
        let config = Config::load_with(&missing_default(&dir), env).unwrap();
        assert!(config.notify_webhook_url.is_none());
    }

    #[test]
    fn test_unusable_threshold_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["-1", "NaN", "inf"] {
            let env = vars(&[("ROLLCALL_MATCH_THRESHOLD", bad)]);
            let err = Config::load_with(&missing_default(&dir), env).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidThreshold(_)), "{bad} accepted");
        }

        let file = dir.path().join("negative.toml");
        std::fs::write(&file, "match_threshold = -0.2\n").unwrap();
        let env = vars(&[("ROLLCALL_CONFIG", file.to_str().unwrap())]);
        assert!(matches!(
            Config::load_with(&missing_default(&dir), env),
            Err(ConfigError::InvalidThreshold(_))
        ));

        let env = vars(&[("ROLLCALL_MATCH_THRESHOLD", "0")]);
        let config = Config::load_with(&missing_default(&dir), env).unwrap();
        assert_eq!(config.match_threshold, 0.0);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.checkin_cooldown_secs, 5);
        assert_eq!(config.bus, BusKind::System);
        assert!(config.notify_webhook_url.is_none());
        assert!(config.db_path.ends_with("rollcall/attendance.db"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let text = r#"
            db_path = "/var/lib/rollcall/school.db"
            match_threshold = 0.45
            checkin_cooldown_secs = 60
            notify_webhook_url = "http://localhost:8080/send"
            bus = "session"
        "#;
        let mut config = Config::default();
        config.apply_file(parse_file(Path::new("test.toml"), text).unwrap());

        assert_eq!(config.db_path, PathBuf::from("/var/lib/rollcall/school.db"));
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.checkin_cooldown_secs, 60);
        assert_eq!(config.notify_webhook_url.as_deref(), Some("http://localhost:8080/send"));
        assert_eq!(config.bus, BusKind::Session);
        // Untouched keys keep their defaults.
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.notify_timeout_secs, 10);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_file(Path::new("bad.toml"), "threshold = 0.5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_bus_kind_from_str() {
        assert_eq!("system".parse::<BusKind>(), Ok(BusKind::System));
        assert_eq!("session".parse::<BusKind>(), Ok(BusKind::Session));
        assert!("user".parse::<BusKind>().is_err());
    }

    #[test]
    fn test_service_settings() {
        let config = Config {
            checkin_cooldown_secs: 30,
            embedding_dim: 0,
            ..Config::default()
        };
        let settings = config.service_settings();
        assert_eq!(settings.checkin_cooldown, Duration::from_secs(30));
        assert_eq!(settings.embedding_dim, 0);
        assert_eq!(settings.match_threshold, 0.6);
    }
}
