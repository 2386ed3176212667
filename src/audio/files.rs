use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info, warn};

/// Deletes audio files in `dir` that are not listed in `keep`.
///
/// Only files whose extension is in `extensions` are considered. A missing
/// directory counts as already clean, and files that vanish between listing
/// and removal are ignored, so repeated passes are harmless.
pub async fn cleanup_orphans(
    dir: &Path,
    keep: &[PathBuf],
    extensions: &[&str],
) -> io::Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_audio_file(&path, extensions) || keep.contains(&path) {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("🗑️ Deleted orphaned file {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️ Could not delete {}: {}", path.display(), e),
        }
    }

    if removed > 0 {
        info!("🧹 Removed {} orphaned audio files from {}", removed, dir.display());
    }
    Ok(removed)
}

/// Removes one file, treating "already gone" as success
pub async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("🗑️ Deleted {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️ Could not delete {}: {}", path.display(), e),
    }
}

fn is_audio_file(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
