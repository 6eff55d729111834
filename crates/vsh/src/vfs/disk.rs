//! Filesystem backed by a host directory.

use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{FileHandle, FileSystem, FsError, Metadata, OpenFlags};
use crate::path::normalize;

/// [`FileSystem`] rooted at a host directory.
///
/// Every path is normalized as if it were absolute before being joined to
/// the root, so `..` can never reach outside of it.
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    /// Serve the directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The host directory this filesystem is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn join(&self, name: &str) -> (String, PathBuf) {
        let rel = normalize(&format!("/{name}"));
        let host = if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&rel)
        };
        (rel, host)
    }
}

fn map_err(op: &'static str, path: &str, err: io::Error) -> FsError {
    match err.kind() {
        ErrorKind::NotFound => FsError::not_exist(op, path),
        ErrorKind::AlreadyExists => FsError::exist(op, path),
        ErrorKind::IsADirectory | ErrorKind::NotADirectory | ErrorKind::DirectoryNotEmpty => {
            FsError::invalid(op, path)
        }
        _ => FsError::Io {
            op,
            path: path.to_string(),
            source: err,
        },
    }
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

fn to_metadata(name: String, meta: &std::fs::Metadata) -> Metadata {
    Metadata {
        name,
        is_dir: meta.is_dir(),
        mode: mode_of(meta),
        size: meta.len(),
        modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

fn base_name(rel: &str) -> String {
    match rel.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None if rel.is_empty() => ".".to_string(),
        None => rel.to_string(),
    }
}

#[async_trait]
impl FileSystem for DiskFs {
    async fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let (rel, host) = self.join(path);
        let meta = fs::metadata(&host)
            .await
            .map_err(|e| map_err("stat", &rel, e))?;
        Ok(to_metadata(base_name(&rel), &meta))
    }

    async fn lstat(&self, path: &str) -> Result<Metadata, FsError> {
        let (rel, host) = self.join(path);
        let meta = fs::symlink_metadata(&host)
            .await
            .map_err(|e| map_err("lstat", &rel, e))?;
        Ok(to_metadata(base_name(&rel), &meta))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Metadata>, FsError> {
        let (rel, host) = self.join(path);
        let mut dir = fs::read_dir(&host)
            .await
            .map_err(|e| map_err("readdir", &rel, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| map_err("readdir", &rel, e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| map_err("readdir", &rel, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(to_metadata(name, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &str) -> Result<Box<dyn FileHandle>, FsError> {
        let (rel, host) = self.join(path);
        let meta = fs::metadata(&host)
            .await
            .map_err(|e| map_err("open", &rel, e))?;
        if meta.is_dir() {
            return Ok(Box::new(DiskDir {
                meta: to_metadata(base_name(&rel), &meta),
                path: rel,
            }));
        }
        let file = fs::File::open(&host)
            .await
            .map_err(|e| map_err("open", &rel, e))?;
        Ok(Box::new(DiskFile { file, path: rel }))
    }

    async fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        let (rel, host) = self.join(path);
        let mut options = fs::OpenOptions::new();
        options
            .read(true)
            .write(true)
            .create(flags.create)
            .truncate(flags.truncate)
            .append(flags.append);
        #[cfg(unix)]
        options.mode(perm);
        #[cfg(not(unix))]
        let _ = perm;
        let file = options
            .open(&host)
            .await
            .map_err(|e| map_err("open", &rel, e))?;
        Ok(Box::new(DiskFile { file, path: rel }))
    }

    async fn write_file(&self, path: &str, data: &[u8], perm: u32) -> Result<(), FsError> {
        let mut file = self
            .open_file(path, OpenFlags::new().create(true).truncate(true), perm)
            .await?;
        file.write_all(data).await
    }

    async fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), FsError> {
        let (rel, host) = self.join(path);
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(perm);
        #[cfg(not(unix))]
        let _ = perm;
        match builder.create(&host).await {
            Ok(()) => Ok(()),
            // A file occupies one of the segments.
            Err(e) if matches!(e.kind(), ErrorKind::AlreadyExists | ErrorKind::NotADirectory) => {
                Err(FsError::exist("mkdir", rel))
            }
            Err(e) => Err(map_err("mkdir", &rel, e)),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        let (rel, host) = self.join(path);
        if rel.is_empty() {
            return Ok(());
        }
        let meta = fs::symlink_metadata(&host)
            .await
            .map_err(|e| map_err("remove", &rel, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir(&host).await
        } else {
            fs::remove_file(&host).await
        };
        result.map_err(|e| match e.kind() {
            ErrorKind::NotFound => FsError::not_exist("remove", rel.as_str()),
            ErrorKind::Other | ErrorKind::DirectoryNotEmpty => {
                FsError::invalid("remove", rel.as_str())
            }
            _ => map_err("remove", &rel, e),
        })
    }

    async fn remove_all(&self, path: &str) -> Result<(), FsError> {
        let (rel, host) = self.join(path);
        if rel.is_empty() {
            return Ok(());
        }
        let meta = fs::symlink_metadata(&host)
            .await
            .map_err(|e| map_err("removeall", &rel, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir_all(&host).await
        } else {
            fs::remove_file(&host).await
        };
        result.map_err(|e| map_err("removeall", &rel, e))
    }
}

/// Session on a host file.
#[derive(Debug)]
struct DiskFile {
    file: fs::File,
    path: String,
}

#[async_trait]
impl FileHandle for DiskFile {
    async fn stat(&self) -> Result<Metadata, FsError> {
        let meta = self
            .file
            .metadata()
            .await
            .map_err(|e| map_err("stat", &self.path, e))?;
        Ok(to_metadata(base_name(&self.path), &meta))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        self.file
            .read(buf)
            .await
            .map_err(|e| map_err("read", &self.path, e))
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        let n = self
            .file
            .write(buf)
            .await
            .map_err(|e| map_err("write", &self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| map_err("write", &self.path, e))?;
        Ok(n)
    }

    async fn rewind(&mut self) -> Result<(), FsError> {
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| map_err("seek", &self.path, e))?;
        Ok(())
    }
}

#[derive(Debug)]
struct DiskDir {
    meta: Metadata,
    path: String,
}

#[async_trait]
impl FileHandle for DiskDir {
    async fn stat(&self) -> Result<Metadata, FsError> {
        Ok(self.meta.clone())
    }

    async fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::invalid("read", self.path.as_str()))
    }

    async fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::invalid("write", self.path.as_str()))
    }

    async fn rewind(&mut self) -> Result<(), FsError> {
        Ok(())
    }
}
