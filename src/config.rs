//! Configuration for voxroute.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VOXROUTE_HOME, VOXROUTE_DATABASE, DATABASE_URL)
//! 2. Config file (.voxroute/config.yaml)
//! 3. Defaults (~/.voxroute, ~/.voxroute/voxroute.db)
//!
//! Config file discovery:
//! - Searches current directory and parents for .voxroute/config.yaml
//! - Paths in the file are relative to the project root holding .voxroute/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::Tag;
use crate::store::{PoolSettings, StoreSettings};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".voxroute";
const DATABASE_FILE: &str = "voxroute.db";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub version: Option<String>,
    /// State directory, relative to the project root
    pub home: Option<String>,
    /// Name of the model that produced the responses, recorded per transcript
    pub model: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub structuring: Option<StructuringSettings>,
    #[serde(default)]
    pub calendar: CalendarSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// File path or `sqlite://` URL
    pub path: Option<String>,
    pub min_connections: Option<u32>,
    pub max_connections: Option<u32>,
    pub acquire_timeout_seconds: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub busy_timeout_ms: u64,
}

impl DatabaseSettings {
    fn new(url: String) -> Self {
        Self {
            url,
            min_connections: 1,
            max_connections: 10,
            acquire_timeout_seconds: 5,
            busy_timeout_ms: 5000,
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings::new(self.url.clone())
            .with_pool(PoolSettings {
                min_connections: self.min_connections as usize,
                max_connections: self.max_connections as usize,
                acquire_timeout: Duration::from_secs(self.acquire_timeout_seconds),
            })
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

/// External structuring command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuringSettings {
    pub program: String,
    /// Argument template; `{action}` is replaced per call
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_structuring_timeout")]
    pub timeout_seconds: u64,
    /// Tag name → action name
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

fn default_structuring_timeout() -> u64 {
    120
}

impl StructuringSettings {
    /// Action configured for `tag`; keys accept the same aliases as tags
    pub fn action_for(&self, tag: Tag) -> Option<&str> {
        self.actions
            .iter()
            .find(|(key, _)| Tag::parse(key) == tag)
            .map(|(_, action)| action.as_str())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Remote calendar sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub enabled: bool,
    pub calendar_id: String,
    pub base_url: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            calendar_id: "primary".to_string(),
            base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            token_env: "GOOGLE_CALENDAR_TOKEN".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub model: String,
    pub database: DatabaseSettings,
    pub structuring: Option<StructuringSettings>,
    pub calendar: CalendarSettings,
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Database paths resolve like any other path; URLs are left alone
fn resolve_database(base: &Path, raw: &str) -> String {
    if raw.contains("://") || raw == ":memory:" {
        raw.to_string()
    } else {
        resolve_path(base, raw).display().to_string()
    }
}

/// Load configuration starting the file search at `cwd`, reading the
/// environment through `env`
fn load_config_from(cwd: &Path, env: &dyn Fn(&str) -> Option<String>) -> Result<ResolvedConfig> {
    let config_file = find_config_file(cwd);
    let (file, base_dir) = match &config_file {
        Some(path) => {
            // Project root is the parent of .voxroute/
            let base = path
                .parent()
                .and_then(|p| p.parent())
                .unwrap_or(Path::new("."))
                .to_path_buf();
            (load_config_file(path)?, base)
        }
        None => (ConfigFile::default(), cwd.to_path_buf()),
    };

    let home = match (env("VOXROUTE_HOME"), &file.home) {
        (Some(env_home), _) => PathBuf::from(env_home),
        (None, Some(home)) => resolve_path(&base_dir, home),
        (None, None) => dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR),
    };

    let url = env("VOXROUTE_DATABASE")
        .or_else(|| env("DATABASE_URL"))
        .or_else(|| file.database.path.as_deref().map(|p| resolve_database(&base_dir, p)))
        .unwrap_or_else(|| home.join(DATABASE_FILE).display().to_string());

    let mut database = DatabaseSettings::new(url);
    let db = &file.database;
    database.min_connections = db.min_connections.unwrap_or(database.min_connections);
    database.max_connections = db.max_connections.unwrap_or(database.max_connections);
    database.acquire_timeout_seconds =
        db.acquire_timeout_seconds.unwrap_or(database.acquire_timeout_seconds);
    database.busy_timeout_ms = db.busy_timeout_ms.unwrap_or(database.busy_timeout_ms);

    Ok(ResolvedConfig {
        home,
        config_file,
        model: file.model.unwrap_or_else(|| "unknown".to_string()),
        database,
        structuring: file.structuring,
        calendar: file.calendar,
    })
}

fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd, &|key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the voxroute home directory (state)
pub fn voxroute_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(root: &Path, yaml: &str) -> PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let config = load_config_from(temp.path(), &no_env).unwrap();

        let expected_home = dirs::home_dir().unwrap().join(".voxroute");
        assert_eq!(config.home, expected_home);
        assert_eq!(
            config.database.url,
            expected_home.join("voxroute.db").display().to_string()
        );
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.database.max_connections, 10);
        assert!(config.structuring.is_none());
        assert!(!config.calendar.enabled);
    }

    #[test]
    fn test_config_file_is_found_from_subdirectory() {
        let temp = TempDir::new().unwrap();
        write_config(
            temp.path(),
            r#"
version: "1"
home: state
model: gpt-4o
database:
  path: data/voice.db
  max_connections: 4
  busy_timeout_ms: 250
structuring:
  program: llm
  args: ["-t", "{action}"]
  actions:
    calendar: calendar_event
    contact: contact_card
calendar:
  enabled: true
"#,
        );
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = load_config_from(&nested, &no_env).unwrap();
        assert!(config.config_file.is_some());
        assert_eq!(config.home, temp.path().join("state"));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(
            config.database.url,
            temp.path().join("data/voice.db").display().to_string()
        );
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.busy_timeout_ms, 250);

        let structuring = config.structuring.unwrap();
        assert_eq!(structuring.timeout_seconds, 120);
        assert_eq!(structuring.action_for(Tag::Calendar), Some("calendar_event"));
        assert_eq!(structuring.action_for(Tag::Contacts), Some("contact_card"));
        assert_eq!(structuring.action_for(Tag::Entities), None);

        assert!(config.calendar.enabled);
        assert_eq!(config.calendar.calendar_id, "primary");
    }

    #[test]
    fn test_env_overrides_file() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "database:\n  path: file.db\n");

        let env: HashMap<&str, &str> = [
            ("VOXROUTE_HOME", "/srv/voxroute"),
            ("DATABASE_URL", "sqlite:///tmp/from-url.db"),
        ]
        .into_iter()
        .collect();
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config = load_config_from(temp.path(), &lookup).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/voxroute"));
        assert_eq!(config.database.url, "sqlite:///tmp/from-url.db");
    }

    #[test]
    fn test_voxroute_database_wins_over_database_url() {
        let temp = TempDir::new().unwrap();
        let lookup = |key: &str| match key {
            "VOXROUTE_DATABASE" => Some("/a.db".to_string()),
            "DATABASE_URL" => Some("/b.db".to_string()),
            _ => None,
        };
        let config = load_config_from(temp.path(), &lookup).unwrap();
        assert_eq!(config.database.url, "/a.db");
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "database: [not, a, map");
        assert!(load_config_from(temp.path(), &no_env).is_err());
    }

    #[test]
    fn test_store_settings() {
        let mut db = DatabaseSettings::new("sqlite://x.db".into());
        db.acquire_timeout_seconds = 2;
        let settings = db.store_settings();
        assert_eq!(settings.database, "sqlite://x.db");
        assert_eq!(settings.pool.acquire_timeout, Duration::from_secs(2));
        assert_eq!(settings.busy_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");
        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(resolve_database(&base, "sqlite://db"), "sqlite://db");
    }
}
