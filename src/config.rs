use crate::models::image_config::{ImageConfig, ImageConfigOverrides};
use anyhow::{Context, Result};
use clap::Parser;
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub temp_dir: String,
    pub public_base_url: String,
    pub event_timeout: Duration,
    pub download_timeout: Duration,
    pub overwrite_archives: bool,
    pub font_dir: Option<String>,
    pub image_defaults: ImageConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "QR image generation stage")]
pub struct Args {
    /// Host to bind to (overrides DIALCODE_QR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DIALCODE_QR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded archives are stored (overrides DIALCODE_QR_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DIALCODE_QR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Root of per-event scratch directories (overrides DIALCODE_QR_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<String>,

    /// Prefix of returned archive URLs (overrides DIALCODE_QR_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Deadline for processing one event, in seconds (overrides DIALCODE_QR_EVENT_TIMEOUT_SECS)
    #[arg(long)]
    pub event_timeout_secs: Option<u64>,

    /// Timeout of one image download, in seconds (overrides DIALCODE_QR_DOWNLOAD_TIMEOUT_SECS)
    #[arg(long)]
    pub download_timeout_secs: Option<u64>,

    /// Replace archives whose content changed (overrides DIALCODE_QR_OVERWRITE_ARCHIVES)
    #[arg(long)]
    pub overwrite_archives: Option<bool>,

    /// Directory holding `<fontName>.ttf` label fonts (overrides DIALCODE_QR_FONT_DIR)
    #[arg(long)]
    pub font_dir: Option<String>,

    /// JSON file with default image settings (overrides DIALCODE_QR_IMAGE_DEFAULTS)
    #[arg(long)]
    pub image_defaults: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already-parsed CLI args over environment fallbacks.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("DIALCODE_QR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("DIALCODE_QR_PORT", 3000u16)?;
        let env_storage =
            env::var("DIALCODE_QR_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("DIALCODE_QR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/dialcode_qr.db".into());
        let env_temp = env::var("DIALCODE_QR_TEMP_DIR").unwrap_or_else(|_| {
            env::temp_dir()
                .join("dialcode-qr")
                .to_string_lossy()
                .into_owned()
        });
        let env_event_timeout = env_parse("DIALCODE_QR_EVENT_TIMEOUT_SECS", 300u64)?;
        let env_download_timeout = env_parse("DIALCODE_QR_DOWNLOAD_TIMEOUT_SECS", 30u64)?;
        let env_overwrite = env_parse("DIALCODE_QR_OVERWRITE_ARCHIVES", false)?;

        let port = args.port.unwrap_or(env_port);
        let public_base_url = args
            .public_base_url
            .or_else(|| env::var("DIALCODE_QR_PUBLIC_BASE_URL").ok())
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        let font_dir = args
            .font_dir
            .or_else(|| env::var("DIALCODE_QR_FONT_DIR").ok());
        let image_defaults = match args
            .image_defaults
            .or_else(|| env::var_os("DIALCODE_QR_IMAGE_DEFAULTS").map(PathBuf::from))
        {
            Some(path) => load_image_defaults(&path)?,
            None => ImageConfig::default(),
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            temp_dir: args.temp_dir.unwrap_or(env_temp),
            public_base_url,
            event_timeout: Duration::from_secs(
                args.event_timeout_secs.unwrap_or(env_event_timeout),
            ),
            download_timeout: Duration::from_secs(
                args.download_timeout_secs.unwrap_or(env_download_timeout),
            ),
            overwrite_archives: args.overwrite_archives.unwrap_or(env_overwrite),
            font_dir,
            image_defaults,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `name` and parse it, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Built-in defaults overlaid with the fields present in a JSON file.
fn load_image_defaults(path: &Path) -> Result<ImageConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading image defaults {}", path.display()))?;
    let overrides: ImageConfigOverrides = serde_json::from_str(&raw)
        .with_context(|| format!("parsing image defaults {}", path.display()))?;
    Ok(ImageConfig::default().resolve(&overrides, None))
}
