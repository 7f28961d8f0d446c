//! Subcommand implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use cloudport_download::{
    DirectorySink, DownloadQueue, QueueConfig, SmartDownload, TransferStatus,
};
use cloudport_protocol::FileEntry;
use cloudport_store::{HttpStoreClient, ObjectStoreClient, TokenAuth};
use cloudport_transfer::{
    ContentAddresser, DigestBackend, FingerprintConfig, format_bytes, split_remote_path,
};
use cloudport_upload::{UploadCoordinator, UploadEvent, UploadOptions};
use tracing::{debug, info, warn};

use crate::config::Config;

fn connect(config: &Config) -> anyhow::Result<Arc<dyn ObjectStoreClient>> {
    let auth = Arc::new(TokenAuth::new(config.access_token.clone()));
    let client = HttpStoreClient::new(&config.api_base_url, auth)
        .with_context(|| format!("invalid api_base_url {}", config.api_base_url))?;
    Ok(Arc::new(client))
}

/// Uploads `files` one at a time into `parent`.
pub async fn put(config: &Config, files: &[PathBuf], parent: &str) -> anyhow::Result<()> {
    let store = connect(config)?;
    let options = UploadOptions {
        device_id: config.device_id.clone(),
        ..UploadOptions::default()
    };
    let backend = if config.strong_fingerprint {
        DigestBackend::Sha256
    } else {
        DigestBackend::Rolling
    };
    let mut coordinator = UploadCoordinator::new(store, options).with_addresser(
        ContentAddresser::new(FingerprintConfig {
            backend,
            ..FingerprintConfig::default()
        }),
    );

    if let Some(mut events) = coordinator.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    UploadEvent::Phase(phase) => debug!(?phase, "upload phase"),
                    UploadEvent::Progress {
                        percent,
                        bytes_per_second,
                        ..
                    } => info!(
                        percent = %format!("{percent:.0}"),
                        speed = %format!("{}/s", format_bytes(bytes_per_second as u64)),
                        "uploading"
                    ),
                }
            }
        });
    }

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling upload");
            cancel.cancel();
        }
    });

    for file in files {
        let outcome = coordinator
            .upload_file(file, parent)
            .await
            .with_context(|| format!("uploading {}", file.display()))?;
        if outcome.deduplicated {
            info!(file = %file.display(), file_id = outcome.file_id, "already stored, skipped transfer");
        } else {
            info!(
                file = %file.display(),
                file_id = outcome.file_id,
                parts = outcome.uploaded_parts,
                resumed_parts = outcome.skipped_parts,
                "uploaded"
            );
        }
    }
    Ok(())
}

/// Finds the listing entry for a remote path.
async fn resolve(store: &dyn ObjectStoreClient, path: &str) -> anyhow::Result<FileEntry> {
    let (parent, name) = split_remote_path(path);
    let listing = store
        .list_folder(&parent)
        .await
        .with_context(|| format!("listing {parent}"))?;
    listing
        .contents
        .into_iter()
        .find(|e| e.name == name)
        .with_context(|| format!("{path} not found"))
}

/// Downloads remote paths into `out`, waiting for the queue to drain.
pub async fn get(config: &Config, paths: &[String], out: &Path) -> anyhow::Result<()> {
    let store = connect(config)?;
    let mut selection = Vec::with_capacity(paths.len());
    for path in paths {
        selection.push(resolve(store.as_ref(), path).await?);
    }

    let queue = DownloadQueue::new(
        store,
        Arc::new(DirectorySink::new(out)),
        QueueConfig {
            max_concurrent: config.max_concurrent_downloads,
            ..QueueConfig::default()
        },
    );
    let mut snapshots = queue.snapshots();

    match queue.smart_download(&selection).await? {
        SmartDownload::SingleSmall { artifact } => {
            info!(
                name = %artifact.name,
                size = %format_bytes(artifact.size),
                path = ?artifact.path,
                "downloaded"
            );
            return Ok(());
        }
        SmartDownload::MultiZip { bundle } => {
            info!(
                files = bundle.files.len(),
                size = %format_bytes(bundle.total_size),
                archive = ?bundle.zip_name,
                link = ?bundle.dlink,
                "archive prepared by the store"
            );
            return Ok(());
        }
        queued => info!(items = queued.queued_ids().len(), "downloads queued"),
    }

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut last_status: HashMap<u64, TransferStatus> = HashMap::new();
    loop {
        let state = snapshots.borrow_and_update().clone();
        for item in &state.items {
            if last_status.insert(item.id, item.status) != Some(item.status) {
                match &item.error {
                    Some(error) => warn!(item = item.id, %error, "{}", item.describe()),
                    None => info!(item = item.id, "{}", item.describe()),
                }
            } else if item.status == TransferStatus::Downloading {
                debug!(item = item.id, "{}", item.describe());
            }
        }
        if state.is_idle() {
            break;
        }

        tokio::select! {
            _ = &mut interrupt => {
                let parked = queue.pause_all();
                warn!(parked, "interrupt received, queue paused");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    let state = queue.snapshot();
    let failed = state.count(TransferStatus::Failed);
    if failed > 0 {
        bail!("{failed} download(s) failed");
    }
    info!(
        completed = state.count(TransferStatus::Completed),
        dir = %out.display(),
        "downloads finished"
    );
    Ok(())
}

/// Prints the direct children of a remote folder.
pub async fn ls(config: &Config, path: &str) -> anyhow::Result<()> {
    let store = connect(config)?;
    let listing = store
        .list_folder(path)
        .await
        .with_context(|| format!("listing {path}"))?;
    for entry in &listing.contents {
        if entry.is_dir {
            println!("{:>10}  {}/", "-", entry.name);
        } else {
            println!("{:>10}  {}", format_bytes(entry.size), entry.name);
        }
    }
    info!(path = %listing.path, total = listing.total, "listed");
    Ok(())
}
