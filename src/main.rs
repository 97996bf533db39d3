use anyhow::Result;
use axum::Router;
use dialcode_qr::{
    config, db, routes,
    services::{
        archiver::ZipArchiver,
        downloader::HttpDownloader,
        pipeline::{Pipeline, PipelineSettings},
        renderer::QrRenderer,
        status_recorder::{DIALCODE_BATCH_TABLE, SqliteStatusStore},
        storage_service::StorageService,
    },
    state::AppState,
};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting dialcode-qr with config: {:?}", cfg);

    // --- Ensure storage and scratch directories exist ---
    for dir in [&cfg.storage_dir, &cfg.temp_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    let db_path_obj = Path::new(db_path);

    // Create parent directory if needed
    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the database file on its own
    match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        Ok(_) => tracing::debug!("Database file {} can be opened.", db_path),
        Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
    }

    let db = Arc::new(db::connect(db_url, 5).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let storage = StorageService::new(
        db.clone(),
        cfg.storage_dir.clone(),
        cfg.public_base_url.clone(),
    );
    let batches = SqliteStatusStore::new(db.clone());
    let pipeline = Pipeline::new(
        Arc::new(HttpDownloader::new(cfg.download_timeout)?),
        Arc::new(QrRenderer::new(cfg.font_dir.as_ref().map(PathBuf::from))),
        Arc::new(ZipArchiver),
        Arc::new(storage.clone()),
        Arc::new(batches.clone()),
        PipelineSettings {
            temp_root: PathBuf::from(&cfg.temp_dir),
            image_defaults: cfg.image_defaults.clone(),
            overwrite_archives: cfg.overwrite_archives,
            status_table: DIALCODE_BATCH_TABLE.to_string(),
        },
    );

    let state = AppState {
        storage,
        batches,
        pipeline: Arc::new(pipeline),
        event_timeout: cfg.event_timeout,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
