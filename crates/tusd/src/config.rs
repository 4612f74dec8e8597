use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Backend {
    Filesystem,
    S3,
    Gcs,
    Azure,
}

/// Process configuration. Fields are grouped the way the handler consumes
/// them: transport, storage backend selection, and protocol limits.
#[derive(Parser, Debug, Clone)]
#[command(name = "tusd", about = "tus resumable upload server")]
pub struct Config {
    #[arg(long, env = "TUSD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "TUSD_PORT", default_value_t = 1080)]
    pub port: u16,

    #[arg(long, env = "TUSD_BASE_PATH", default_value = "/files")]
    pub base_path: String,

    #[arg(long, env = "TUSD_BACKEND", value_enum, default_value_t = Backend::Filesystem)]
    pub backend: Backend,

    #[arg(long, env = "TUSD_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    #[arg(long, env = "TUSD_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "TUSD_GCS_BUCKET")]
    pub gcs_bucket: Option<String>,

    #[arg(long, env = "TUSD_AZURE_CONTAINER")]
    pub azure_container: Option<String>,

    /// Maximum accepted upload size in bytes. `None` means unbounded.
    #[arg(long, env = "TUSD_MAX_SIZE")]
    pub max_size: Option<i64>,

    /// Request read timeout in seconds, covering the PATCH body stream.
    #[arg(long, env = "TUSD_TIMEOUT_SECS", default_value_t = 6)]
    pub timeout_secs: u64,

    /// Grace period for in-flight requests during shutdown.
    #[arg(long, env = "TUSD_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Interval between coalesced upload-progress hook notifications.
    #[arg(long, env = "TUSD_PROGRESS_HOOKS_INTERVAL_MS", default_value_t = 1000)]
    pub progress_hooks_interval_ms: u64,

    /// Whether to serve GET on upload ids (outside the tus spec proper).
    #[arg(long, env = "TUSD_ENABLE_GET", default_value_t = true)]
    pub enable_get: bool,

    /// Honor X-Forwarded-* headers when computing the Location header.
    #[arg(long, env = "TUSD_BEHIND_PROXY", default_value_t = false)]
    pub behind_proxy: bool,

    #[arg(long, env = "TUSD_CORS_ENABLED", default_value_t = true)]
    pub cors_enabled: bool,
}
