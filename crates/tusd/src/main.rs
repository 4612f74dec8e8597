use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tus_hooks::{HookDispatcher, NoopHookHandler};
use tus_locker::InMemoryLocker;
use tus_storage::StoreComposer;
use tusd::config::{Backend, Config};
use tusd::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    let composer = build_composer(&config).await?;
    info!(capabilities = %composer.capabilities(), "store composer ready");

    let hooks = Arc::new(HookDispatcher::new(Arc::new(NoopHookHandler)));
    hooks.setup().await?;

    let state = Arc::new(AppState {
        composer,
        hooks,
        config: config.clone(),
    });
    let router = tusd::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "tusd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_grace_secs))
        .await?;
    Ok(())
}

async fn shutdown_signal(grace_secs: u64) {
    let _ = tokio::signal::ctrl_c().await;
    info!(grace_secs, "shutdown signal received, draining in-flight requests");
    tokio::time::sleep(Duration::from_secs(grace_secs)).await;
}

async fn build_composer(config: &Config) -> anyhow::Result<StoreComposer> {
    match config.backend {
        Backend::Filesystem => {
            let store = Arc::new(tus_fs_store::LocalDirStore::new(&config.data_dir).await?);
            Ok(StoreComposer::new(store.clone())
                .with_terminater(store.clone())
                .with_concater(store.clone())
                .with_length_deferrer(store.clone())
                .with_serve_content(store.clone())
                .with_locker(Arc::new(InMemoryLocker::new())))
        },
        Backend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--s3-bucket is required for the s3 backend"))?;
            let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let client = aws_sdk_s3::Client::new(&aws_config);
            let store = Arc::new(tus_s3_store::S3Store::new(client, bucket));
            Ok(StoreComposer::new(store.clone())
                .with_terminater(store.clone())
                .with_concater(store.clone())
                .with_length_deferrer(store.clone())
                .with_finisher(store.clone())
                .with_serve_content(store.clone())
                .with_locker(Arc::new(InMemoryLocker::new())))
        },
        Backend::Gcs => {
            let bucket = config
                .gcs_bucket
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--gcs-bucket is required for the gcs backend"))?;
            let gcs_config = google_cloud_storage::client::ClientConfig::default()
                .with_auth()
                .await?;
            let client = google_cloud_storage::client::Client::new(gcs_config);
            let store = Arc::new(tus_cloud_store::GcsStore::new(client, bucket));
            Ok(StoreComposer::new(store.clone())
                .with_terminater(store.clone())
                .with_length_deferrer(store.clone())
                .with_serve_content(store.clone())
                .with_locker(Arc::new(InMemoryLocker::new())))
        },
        Backend::Azure => {
            let container_name = config
                .azure_container
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--azure-container is required for the azure backend"))?;
            let account = std::env::var("AZURE_STORAGE_ACCOUNT")
                .map_err(|_| anyhow::anyhow!("AZURE_STORAGE_ACCOUNT must be set"))?;
            let key = std::env::var("AZURE_STORAGE_KEY")
                .map_err(|_| anyhow::anyhow!("AZURE_STORAGE_KEY must be set"))?;
            let credentials = azure_storage::StorageCredentials::access_key(account.clone(), key);
            let service = azure_storage_blobs::prelude::ClientBuilder::new(account, credentials);
            let container = service.container_client(container_name);
            let store = Arc::new(tus_cloud_store::AzureStore::new(container));
            Ok(StoreComposer::new(store.clone())
                .with_terminater(store.clone())
                .with_length_deferrer(store.clone())
                .with_serve_content(store.clone())
                .with_locker(Arc::new(InMemoryLocker::new())))
        },
    }
}
