use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;

use photobackup_core::BackupOptions;

/// Default config file, resolved relative to the working directory.
const DEFAULT_FILE: &str = "config/photobackup";
const ENV_PREFIX: &str = "PHOTOBACKUP";

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// Defaults to `<root>/../config/master.db`.
    pub database: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub idle_timeout_secs: u64,
    /// Largest single WebSocket message accepted.
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Expected `Sec-WebSocket-Protocol` value on `/upload` and bearer token
    /// on `/photo/update` and `/photo/delete`. Auth is off when unset.
    pub upload_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub queue: QueueConfig,
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Defaults, then the config file, then `PHOTOBACKUP__*` variables, then
    /// the `--root` override.
    ///
    /// An explicit `file` must exist; the default one is optional.
    pub fn load(file: Option<&Path>, root: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(file, root, None)
    }

    /// Like [`AppConfig::load`], reading environment variables from `env`
    /// instead of the process when given.
    pub fn build(
        file: Option<&Path>,
        root: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("storage.root", "./upload")?
            .set_default("upload.idle_timeout_secs", 300)?
            .set_default("upload.max_frame_bytes", 150 * 1024 * 1024)?
            .set_default("queue.capacity", photobackup_core::queue::DEFAULT_CAPACITY as u64)?
            .set_default("reconcile.interval_secs", 300)?
            .add_source(file_source)
            // e.g. PHOTOBACKUP__STORAGE__ROOT=/srv/photos/upload
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            );
        if let Some(root) = root {
            builder = builder.set_override("storage.root", root.to_string_lossy().into_owned())?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn upload_token(&self) -> Option<&str> {
        self.auth
            .upload_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_secs.max(1))
    }

    pub fn backup_options(&self) -> BackupOptions {
        let mut options = BackupOptions::new(self.storage.root.clone());
        options.database = self.storage.database.clone();
        options.queue_capacity = self.queue.capacity;
        options.idle_timeout = Duration::from_secs(self.upload.idle_timeout_secs);
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::build(None, None, env(&[])).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.storage.root, PathBuf::from("./upload"));
        assert!(config.storage.database.is_none());
        assert_eq!(config.upload.idle_timeout_secs, 300);
        assert_eq!(config.upload.max_frame_bytes, 150 * 1024 * 1024);
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
        assert_eq!(config.upload_token(), None);
    }

    #[test]
    fn test_file_then_env_then_root_override() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("photobackup.toml");
        std::fs::write(
            &file,
            "[server]\nport = 9000\n\n[storage]\nroot = \"/from/file\"\n\n[auth]\nupload_token = \"secret\"\n",
        )
        .unwrap();

        let config = AppConfig::build(
            Some(&file),
            None,
            env(&[("PHOTOBACKUP__SERVER__PORT", "9100"), ("PHOTOBACKUP__QUEUE__CAPACITY", "8")]),
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.storage.root, PathBuf::from("/from/file"));
        assert_eq!(config.upload_token(), Some("secret"));

        let config = AppConfig::build(Some(&file), Some(Path::new("/from/cli")), env(&[])).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.toml");
        assert!(AppConfig::build(Some(&missing), None, env(&[])).is_err());
    }

    #[test]
    fn test_blank_token_disables_auth() {
        let config =
            AppConfig::build(None, None, env(&[("PHOTOBACKUP__AUTH__UPLOAD_TOKEN", "  ")])).unwrap();
        assert_eq!(config.upload_token(), None);
    }

    #[test]
    fn test_backup_options() {
        let config = AppConfig::build(
            None,
            Some(Path::new("/srv/upload")),
            env(&[
                ("PHOTOBACKUP__STORAGE__DATABASE", "/srv/db/master.db"),
                ("PHOTOBACKUP__UPLOAD__IDLE_TIMEOUT_SECS", "30"),
            ]),
        )
        .unwrap();

        let options = config.backup_options();
        assert_eq!(options.root, PathBuf::from("/srv/upload"));
        assert_eq!(options.database_path(), PathBuf::from("/srv/db/master.db"));
        assert_eq!(options.idle_timeout, Duration::from_secs(30));
    }
}
