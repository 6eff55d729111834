//! Lazy in-memory mirror of another filesystem.

use std::sync::Arc;

use futures::FutureExt;

use super::{FileSystem, FsError, LazyOpener, MemFs};
use crate::path::join;

/// Build a [`MemFs`] mirroring `source`.
///
/// Directories are created eagerly. Files are registered with an opener that
/// reads from `source` only when a session first reads them, so building the
/// mirror costs one listing per directory and no file reads. Writes to the
/// mirror never reach `source`.
pub async fn snapshot(source: Arc<dyn FileSystem>) -> Result<MemFs, FsError> {
    let mirror = MemFs::new();
    let mut pending = vec![String::new()];
    let mut files = 0usize;

    while let Some(dir) = pending.pop() {
        for entry in source.read_dir(&dir).await? {
            let path = join(&dir, &entry.name);
            if entry.is_dir {
                mirror.mkdir_all(&path, entry.mode).await?;
                pending.push(path);
                continue;
            }
            let src = Arc::clone(&source);
            let target = path.clone();
            let opener: LazyOpener = Arc::new(move || {
                let src = Arc::clone(&src);
                let target = target.clone();
                async move { src.read_file(&target).await }.boxed()
            });
            mirror
                .write_lazy_file(&path, opener, entry.mode, entry.size)
                .await?;
            files += 1;
        }
    }

    tracing::debug!(files, "built filesystem snapshot");
    Ok(mirror)
}
