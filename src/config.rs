use crate::services::image_service::{ProxySettings, VersionMode};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which object store holds originals and derived images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Plain directory tree under `storage_dir`.
    Local,
    /// S3-compatible bucket (AWS, R2, MinIO).
    S3,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "s3" => Ok(Backend::S3),
            other => bail!("unknown backend `{}` (expected `local` or `s3`)", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VersionModeArg {
    Metadata,
    ContentHash,
}

impl FromStr for VersionModeArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "metadata" => Ok(VersionModeArg::Metadata),
            "content-hash" => Ok(VersionModeArg::ContentHash),
            other => bail!(
                "unknown version mode `{}` (expected `metadata` or `content-hash`)",
                other
            ),
        }
    }
}

impl From<VersionModeArg> for VersionMode {
    fn from(arg: VersionModeArg) -> Self {
        match arg {
            VersionModeArg::Metadata => VersionMode::Metadata,
            VersionModeArg::ContentHash => VersionMode::ContentHash,
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub s3_bucket: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub cache_prefix: String,
    pub io_timeout_secs: u64,
    pub coalesce: bool,
    pub version_mode: VersionModeArg,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "On-demand image resizing proxy with a shared object store cache")]
pub struct Args {
    /// Host to bind to (overrides IMG_PROXY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMG_PROXY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store backend (overrides IMG_PROXY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Root directory of the local backend (overrides IMG_PROXY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Bucket of the s3 backend (overrides IMG_PROXY_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Custom endpoint for S3-compatible services (overrides IMG_PROXY_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Region of the s3 backend (overrides IMG_PROXY_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Key prefix for derived images (overrides IMG_PROXY_CACHE_PREFIX)
    #[arg(long)]
    pub cache_prefix: Option<String>,

    /// Timeout for every object store call (overrides IMG_PROXY_IO_TIMEOUT_SECS)
    #[arg(long)]
    pub io_timeout_secs: Option<u64>,

    /// Coalesce concurrent renders of the same image (overrides IMG_PROXY_COALESCE)
    #[arg(long)]
    pub coalesce: Option<bool>,

    /// How source versions are derived (overrides IMG_PROXY_VERSION_MODE)
    #[arg(long, value_enum)]
    pub version_mode: Option<VersionModeArg>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge CLI args over environment values over defaults.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            host: args
                .host
                .or(env("IMG_PROXY_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &env, "IMG_PROXY_PORT", 3000)?,
            backend: pick(args.backend, &env, "IMG_PROXY_BACKEND", Backend::Local)?,
            storage_dir: args
                .storage_dir
                .or(env("IMG_PROXY_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            s3_bucket: args.s3_bucket.or(env("IMG_PROXY_S3_BUCKET")),
            s3_endpoint: args.s3_endpoint.or(env("IMG_PROXY_S3_ENDPOINT")),
            s3_region: args
                .s3_region
                .or(env("IMG_PROXY_S3_REGION"))
                .unwrap_or_else(|| "auto".into()),
            cache_prefix: args
                .cache_prefix
                .or(env("IMG_PROXY_CACHE_PREFIX"))
                .unwrap_or_else(|| "cache/img".into()),
            io_timeout_secs: pick(args.io_timeout_secs, &env, "IMG_PROXY_IO_TIMEOUT_SECS", 5)?,
            coalesce: pick(args.coalesce, &env, "IMG_PROXY_COALESCE", true)?,
            version_mode: pick(
                args.version_mode,
                &env,
                "IMG_PROXY_VERSION_MODE",
                VersionModeArg::Metadata,
            )?,
        };

        if cfg.io_timeout_secs == 0 {
            bail!("io timeout must be at least one second");
        }
        if cfg.backend == Backend::S3 && cfg.s3_bucket.is_none() {
            bail!("the s3 backend needs --s3-bucket or IMG_PROXY_S3_BUCKET");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            cache_prefix: self.cache_prefix.clone(),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            version_mode: self.version_mode.into(),
            coalesce: self.coalesce,
        }
    }
}

/// CLI value, else parsed env value, else `default`. A malformed env value
/// is an error rather than a silent fallback.
fn pick<T>(
    cli: Option<T>,
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match env(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("parsing {} value `{}`", name, raw)),
        None => Ok(default),
    }
}
