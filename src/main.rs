//! CLI entry point for the bookshelf downloader.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bookshelf_downloader::model::ServerConnection;
use bookshelf_downloader::{
    AddItemOutcome, Database, DownloadQueueManager, HttpClient, LifecycleFlag, ManagerConfig,
    ManagerError, SqliteDownloadStore, TimedHold,
};
use tracing::{debug, info, warn};

mod cli;
mod manifest;
mod progress_ui;

use manifest::Manifest;
use progress_ui::ProgressEventSink;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, sources) = cli::parse_cli_with_sources();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let file_config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            let config = ManagerConfig::from_json(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            Some(config)
        }
        None => None,
    };
    let config = cli::apply_cli_overrides(&args, &sources, file_config);
    config.validate()?;
    debug!(?config, "effective configuration");

    let client = HttpClient::new(config.client_options())?;
    let lifecycle = Arc::new(LifecycleFlag::new());
    let events = Arc::new(ProgressEventSink::new(args.quiet));

    let mut builder = DownloadQueueManager::builder(config.clone(), Arc::new(client))
        .events(events.clone())
        .hold(Arc::new(TimedHold::new()))
        .lifecycle(lifecycle.clone());
    if let Some(db_path) = &args.db {
        let db = Database::new(db_path)
            .await
            .with_context(|| format!("cannot open queue database {}", db_path.display()))?;
        builder = builder.store(Arc::new(SqliteDownloadStore::new(db)));
    }
    let manager = builder.build()?;

    let restored = manager
        .restore_incomplete_downloads(args.token.clone())
        .await?;
    if restored > 0 {
        info!(restored, "resuming downloads from a previous run");
    }

    if let Some(manifest_path) = &args.manifest {
        let Some(server) = &args.server else {
            bail!("--server is required with --manifest");
        };
        let text = std::fs::read_to_string(manifest_path)
            .with_context(|| format!("cannot read manifest {}", manifest_path.display()))?;
        let manifest = Manifest::from_json(&text)
            .with_context(|| format!("invalid manifest {}", manifest_path.display()))?;

        let mut connection = ServerConnection::new(server.as_str(), "bookshelf-dl", "local");
        if let Some(token) = &args.token {
            connection = connection.with_token(token.as_str());
        }
        let item = manifest.into_item(
            connection,
            args.output_dir.clone(),
            config.temp_dir_for(&args.output_dir),
        )?;

        match manager.add_download_item(item) {
            Ok(AddItemOutcome::Queued) => {}
            Ok(AddItemOutcome::AlreadyQueued) => info!("item was already queued from a previous run"),
            Ok(AddItemOutcome::Dropped) => warn!("download request dropped"),
            Err(ManagerError::InsufficientStorage { .. }) => return Ok(ExitCode::FAILURE),
            Err(error) => return Err(error.into()),
        }
    }

    if !manager.has_active_downloads() {
        info!("Nothing to download");
        return Ok(ExitCode::SUCCESS);
    }

    tokio::select! {
        () = manager.wait_until_drained() => {
            info!("All downloads settled");
        }
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                warn!("Interrupted, cancelling downloads");
                lifecycle.begin_teardown();
                manager.cleanup();
            }
            Err(error) => {
                warn!(error = %error, "cannot listen for ctrl-c");
                manager.wait_until_drained().await;
            }
        },
    }
    manager.sync_store().await;

    if events.failures() > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
