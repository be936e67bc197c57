//! Runtime settings, layered from built-in defaults, an optional TOML file
//! and `DIGITD_*` environment variables (later layers win)

use crate::config::{CONFIG_FILE, DEFAULT_MODEL_FILE, ENV_PREFIX};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Number of HTTP worker threads, 0 for one per core
    pub workers: usize,

    /// Largest accepted request body in bytes
    pub json_limit: usize,

    /// Built front end: `index.html` plus a `static/` directory
    pub static_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// `.ot`/`.safetensors` weights for the built-in network, or a `.pt`
    /// TorchScript module
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainSettings {
    /// Directory with the four MNIST IDX files
    pub data_dir: PathBuf,
    pub output: PathBuf,
    pub epochs: i64,
    pub batch_size: i64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub train: TrainSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load settings. With `file` set that file must exist; otherwise
    /// `digitd.toml` in the working directory is used if present
    pub fn load(file: Option<&str>) -> Result<Self, ConfigError> {
        let file = match file {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(CONFIG_FILE).required(false),
        };

        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.workers", 0)?
            .set_default("server.json_limit", 4 * 1024 * 1024)?
            .set_default("server.static_dir", "static")?
            .set_default("model.path", DEFAULT_MODEL_FILE)?
            .set_default("train.data_dir", "data")?
            .set_default("train.output", DEFAULT_MODEL_FILE)?
            .set_default("train.epochs", 5)?
            .set_default("train.batch_size", 64)?
            .set_default("train.learning_rate", 1e-3)?
            .set_default("log.filter", "info")?
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// Every test here reads the process environment, and one writes it
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("digitd.toml");
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn explicit_file_is_required_and_defaults_fill_gaps() {
        let _env = lock_env();
        let settings = Settings::load(Some("no-such-dir/none.toml"));
        assert!(settings.is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();
        let settings = Settings::load(path.to_str()).unwrap();

        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.model.path, PathBuf::from(DEFAULT_MODEL_FILE));
        assert_eq!(settings.train.epochs, 5);
        assert_eq!(settings.train.batch_size, 64);
        assert_eq!(settings.log.filter, "info");
    }

    #[test]
    fn file_overrides_defaults() {
        let _env = lock_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
port = 9100
static_dir = "frontend/build"

[model]
path = "model/exported.pt"

[train]
epochs = 2
"#,
        );

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.static_dir, PathBuf::from("frontend/build"));
        assert_eq!(settings.model.path, PathBuf::from("model/exported.pt"));
        assert_eq!(settings.train.epochs, 2);
        assert_eq!(settings.train.learning_rate, 1e-3);
    }

    #[test]
    fn environment_overrides_file() {
        let _env = lock_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
port = 7000

[train]
epochs = 9
batch_size = 32
"#,
        );

        std::env::set_var("DIGITD_SERVER__PORT", "9100");
        std::env::set_var("DIGITD_TRAIN__EPOCHS", "2");
        let settings = Settings::load(Some(&path));
        std::env::remove_var("DIGITD_SERVER__PORT");
        std::env::remove_var("DIGITD_TRAIN__EPOCHS");

        let settings = settings.unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.train.epochs, 2);
        // Keys without an override still come from the file
        assert_eq!(settings.train.batch_size, 32);
    }
}
