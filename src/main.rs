use anyhow::{Context, Result};
use clap::Parser;
use resumable_upload::{
    app,
    client::{
        FileSource, HttpBlobTransport, HttpUploadApi, SqliteSessionStore, UploadOrchestrator,
        UploadProgress,
    },
    config::{Args, ClientConfig, Command, ServerConfig, StoreKind, TargetArgs},
    models::upload::UploadTarget,
    services::{
        blob_store::BlobStore, local_store::LocalBlobStore, s3_store::S3BlobStore,
        upload_service::UploadService,
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Serve(serve) => run_server(ServerConfig::from_env_and_args(serve)?).await,
        Command::Upload(upload) => {
            let cfg = ClientConfig::from_env_and_args(upload.client)?;
            run_upload(cfg, upload.target, upload.content_type, upload.file).await
        }
        Command::Abort(abort) => {
            let cfg = ClientConfig::from_env_and_args(abort.client)?;
            run_abort(cfg, abort.target).await
        }
        Command::Migrate(client) => {
            let cfg = ClientConfig::from_env_and_args(client)?;
            SqliteSessionStore::connect(&cfg.session_db)
                .await
                .with_context(|| format!("opening session database {}", cfg.session_db))?;
            tracing::info!("Session database migration complete.");
            Ok(())
        }
    }
}

async fn run_server(cfg: ServerConfig) -> Result<()> {
    tracing::info!("Starting upload API with config: {:?}", redacted(&cfg));

    let mut local = None;
    let store: Arc<dyn BlobStore> = match cfg.store {
        StoreKind::S3 => Arc::new(S3BlobStore::connect(&cfg.s3).await?),
        StoreKind::Local => {
            let store = LocalBlobStore::new(cfg.local_base_url());
            tracing::warn!("Using the in-memory local store; uploads are lost on restart");
            local = Some(store.clone());
            Arc::new(store)
        }
    };

    let mut state = AppState::new(UploadService::new(store, cfg.policy()))
        .with_cors_origins(cfg.cors_origins.clone());
    if let Some(local) = local {
        state = state.with_local_store(local);
    }
    let app = app(state);

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
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

/// Config for logging, with credentials masked.
fn redacted(cfg: &ServerConfig) -> ServerConfig {
    let mut cfg = cfg.clone();
    if cfg.s3.secret_key.is_some() {
        cfg.s3.secret_key = Some("***".into());
    }
    cfg
}

async fn orchestrator(cfg: &ClientConfig) -> Result<UploadOrchestrator> {
    let sessions = SqliteSessionStore::connect(&cfg.session_db)
        .await
        .with_context(|| format!("opening session database {}", cfg.session_db))?;
    let client = reqwest::Client::new();

    Ok(UploadOrchestrator::new(
        Arc::new(HttpUploadApi::with_client(client.clone(), cfg.api_url.clone())),
        Arc::new(HttpBlobTransport::new(client)),
        Arc::new(sessions),
    )
    .with_max_session_age(cfg.max_session_age))
}

fn upload_target(target: TargetArgs) -> UploadTarget {
    UploadTarget::new(target.owner, target.context_id, target.kind)
}

async fn run_upload(
    cfg: ClientConfig,
    target: TargetArgs,
    content_type: Option<String>,
    file: std::path::PathBuf,
) -> Result<()> {
    let target = upload_target(target);
    let source = FileSource::open(&file, content_type, target.kind)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let orchestrator = orchestrator(&cfg).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current part");
            on_signal.cancel();
        }
    });

    let mut last_logged = -1i64;
    let on_progress = move |progress: UploadProgress| {
        let step = (progress.percent() / 5.0).floor() as i64;
        if step != last_logged {
            last_logged = step;
            tracing::info!(
                uploaded_bytes = progress.uploaded_bytes,
                total_bytes = progress.total_bytes,
                "upload {:.0}%",
                progress.percent()
            );
        }
    };

    let outcome = orchestrator
        .upload_file(&target, &source, on_progress, &cancel)
        .await?;
    tracing::info!(key = %outcome.key, "Upload complete");
    println!("{}", outcome.url);
    Ok(())
}

async fn run_abort(cfg: ClientConfig, target: TargetArgs) -> Result<()> {
    let target = upload_target(target);
    let orchestrator = orchestrator(&cfg).await?;
    if orchestrator.abort(&target).await? {
        tracing::info!(target_id = %target.storage_id(), "Upload aborted");
    } else {
        tracing::info!(target_id = %target.storage_id(), "No upload in progress");
    }
    Ok(())
}
