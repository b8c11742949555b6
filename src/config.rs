use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{binary} was not found on PATH; set {key} explicitly")]
    MissingBinary {
        binary: &'static str,
        key: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Objects are PUT to `<upload_url>/<key>`.
    pub upload_url: String,
    /// Links handed back to clients are `<public_url>/<key>`.
    pub public_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub scratch_root: PathBuf,
    pub jobs_dir: Option<PathBuf>,
    pub manifests_dir: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub storage: StorageConfig,
    pub caption_font: PathBuf,
    pub expire_finished_jobs_after: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match get("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value })?,
            None => 3600,
        };

        let expire_secs = match get("EXPIRE_FINISHED_JOBS_AFTER_SECS") {
            Some(value) => value.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: "EXPIRE_FINISHED_JOBS_AFTER_SECS",
                value,
            })?,
            None => 60 * 60,
        };

        let upload_url = get("STORAGE_UPLOAD_URL")
            .ok_or(ConfigError::Missing("STORAGE_UPLOAD_URL"))?
            .trim_end_matches('/')
            .to_owned();
        let public_url = get("STORAGE_PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_owned())
            .unwrap_or_else(|| upload_url.clone());

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port,
            scratch_root: get("SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("adreel")),
            jobs_dir: get("JOBS_DIR").map(PathBuf::from),
            manifests_dir: get("MANIFESTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("manifests")),
            ffmpeg_path: get("FFMPEG_PATH").map(PathBuf::from),
            ffprobe_path: get("FFPROBE_PATH").map(PathBuf::from),
            storage: StorageConfig {
                upload_url,
                public_url,
                token: get("STORAGE_TOKEN"),
            },
            caption_font: get("CAPTION_FONT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("assets/fonts/caption.ttf")),
            expire_finished_jobs_after: Duration::from_secs(expire_secs),
        })
    }
}
