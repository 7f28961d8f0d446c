//! Transfer strategy selection.
//!
//! A selection of files and folders is first flattened into files, then
//! routed by count and size:
//!
//! | files | total size | largest file | strategy |
//! |---|---|---|---|
//! | 1 | below threshold | | [`Strategy::SingleSmall`] |
//! | 1 | at/above threshold | | [`Strategy::SingleLargeQueued`] |
//! | many | below threshold | below threshold | [`Strategy::MultiZip`] |
//! | many | otherwise | | [`Strategy::MultiQueued`] |

use cloudport_protocol::FileEntry;
use cloudport_store::ObjectStoreClient;
use tracing::debug;

use crate::error::DownloadError;

/// Limits for folder expansion.
#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    /// Deepest folder nesting followed below a selected folder.
    pub max_depth: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

/// How a selection will be transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One direct transfer, bypassing the queue.
    SingleSmall,
    /// One file, fetched through the queue.
    SingleLargeQueued,
    /// The store bundles everything into one archive.
    MultiZip,
    /// Every file queued individually.
    MultiQueued,
}

/// Picks a strategy for an already expanded file list.
///
/// Returns `None` for an empty list.
pub fn select_strategy(files: &[FileEntry], large_threshold: u64) -> Option<Strategy> {
    let total: u64 = files.iter().map(|f| f.size).sum();
    let any_large = files.iter().any(|f| f.size >= large_threshold);

    let strategy = match files.len() {
        0 => return None,
        1 if total < large_threshold => Strategy::SingleSmall,
        1 => Strategy::SingleLargeQueued,
        _ if total < large_threshold && !any_large => Strategy::MultiZip,
        _ => Strategy::MultiQueued,
    };
    Some(strategy)
}

/// Flattens a selection into files, depth-first in selection order.
///
/// Folders are listed through the store. Selected folders sit at depth 0;
/// descending past `config.max_depth` fails with
/// [`DownloadError::ExpansionTooDeep`].
pub async fn expand_selection(
    store: &dyn ObjectStoreClient,
    selection: &[FileEntry],
    config: &ExpansionConfig,
) -> Result<Vec<FileEntry>, DownloadError> {
    let mut files = Vec::new();
    let mut stack: Vec<(FileEntry, usize)> =
        selection.iter().rev().cloned().map(|e| (e, 0)).collect();

    while let Some((entry, depth)) = stack.pop() {
        if !entry.is_dir {
            files.push(entry);
            continue;
        }
        if depth >= config.max_depth {
            return Err(DownloadError::ExpansionTooDeep {
                path: entry.path,
                depth: config.max_depth,
            });
        }

        let listing = store.list_folder(&entry.path).await?;
        debug!(path = %entry.path, depth, entries = listing.contents.len(), "folder expanded");
        stack.extend(
            listing
                .contents
                .into_iter()
                .rev()
                .map(|child| (child, depth + 1)),
        );
    }

    Ok(files)
}
