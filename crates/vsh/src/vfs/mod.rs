//! Virtual filesystem.
//!
//! This module provides:
//! - [`FileSystem`] - the capability surface every file-related builtin uses
//! - [`MemFs`] - a concurrent, in-memory tree with per-node locks
//! - [`DiskFs`] - the same surface over a host directory root
//! - [`snapshot`] - a lazily-materialized in-memory mirror of any source tree

mod disk;
mod mem;
mod snapshot;

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use disk::DiskFs;
pub use mem::{LazyOpener, MemFs};
pub use snapshot::snapshot;

/// Errors that can occur during filesystem operations.
///
/// Every variant carries the failing operation and the path it was applied
/// to, so callers can surface them verbatim.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not name an entry.
    #[error("{op} {path}: file does not exist")]
    NotExist {
        /// Failing operation.
        op: &'static str,
        /// Path the operation was applied to.
        path: String,
    },
    /// An entry already occupies the path.
    #[error("{op} {path}: file already exists")]
    Exist {
        /// Failing operation.
        op: &'static str,
        /// Path the operation was applied to.
        path: String,
    },
    /// The operation is not valid for this kind of entry.
    #[error("{op} {path}: invalid argument")]
    Invalid {
        /// Failing operation.
        op: &'static str,
        /// Path the operation was applied to.
        path: String,
    },
    /// Host IO error from a disk-backed filesystem.
    #[error("{op} {path}: {source}")]
    Io {
        /// Failing operation.
        op: &'static str,
        /// Path the operation was applied to.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification of an [`FsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    /// See [`FsError::NotExist`].
    NotExist,
    /// See [`FsError::Exist`].
    Exist,
    /// See [`FsError::Invalid`].
    Invalid,
    /// See [`FsError::Io`].
    Io,
}

impl FsError {
    pub(crate) fn not_exist(op: &'static str, path: impl Into<String>) -> Self {
        Self::NotExist {
            op,
            path: path.into(),
        }
    }

    pub(crate) fn exist(op: &'static str, path: impl Into<String>) -> Self {
        Self::Exist {
            op,
            path: path.into(),
        }
    }

    pub(crate) fn invalid(op: &'static str, path: impl Into<String>) -> Self {
        Self::Invalid {
            op,
            path: path.into(),
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> FsErrorKind {
        match self {
            Self::NotExist { .. } => FsErrorKind::NotExist,
            Self::Exist { .. } => FsErrorKind::Exist,
            Self::Invalid { .. } => FsErrorKind::Invalid,
            Self::Io { .. } => FsErrorKind::Io,
        }
    }

    /// The operation that failed.
    pub fn op(&self) -> &'static str {
        match self {
            Self::NotExist { op, .. }
            | Self::Exist { op, .. }
            | Self::Invalid { op, .. }
            | Self::Io { op, .. } => op,
        }
    }

    /// The path the failing operation was applied to.
    pub fn path(&self) -> &str {
        match self {
            Self::NotExist { path, .. }
            | Self::Exist { path, .. }
            | Self::Invalid { path, .. }
            | Self::Io { path, .. } => path,
        }
    }
}

/// File/directory metadata, also used for directory listing entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Base name of the entry.
    pub name: String,
    /// Whether this is a directory.
    pub is_dir: bool,
    /// Permission bits, e.g. `0o755`.
    pub mode: u32,
    /// Size in bytes. Not reliable for lazily loaded files before first read.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl Metadata {
    /// Whether this is a regular file.
    pub fn is_file(&self) -> bool {
        !self.is_dir
    }

    /// Whether any execute bit is set.
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }
}

/// Flags for [`FileSystem::open_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Truncate the file to zero length on open.
    pub truncate: bool,
    /// Start writing at the end of the file.
    pub append: bool,
}

impl OpenFlags {
    /// No flags: the file must already exist and keeps its content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the create flag.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Set the truncate flag.
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Set the append flag.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

/// An open session on a file or directory.
///
/// Each session tracks its own cursor; content is never duplicated per
/// session except for lazily loaded files, whose bytes are fetched once per
/// session.
#[async_trait]
pub trait FileHandle: Send + fmt::Debug {
    /// Metadata of the underlying node.
    async fn stat(&self) -> Result<Metadata, FsError>;

    /// Read into `buf` from the cursor, returning 0 at end of file.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Write `buf` at the cursor.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, FsError>;

    /// Move the cursor back to the start.
    async fn rewind(&mut self) -> Result<(), FsError>;

    /// Read from the cursor to the end of the file.
    async fn read_to_end(&mut self) -> Result<Vec<u8>, FsError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Write the whole of `data`.
    async fn write_all(&mut self, mut data: &[u8]) -> Result<(), FsError> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            if n == 0 {
                let meta = self.stat().await?;
                return Err(FsError::Io {
                    op: "write",
                    path: meta.name,
                    source: std::io::ErrorKind::WriteZero.into(),
                });
            }
            data = &data[n..];
        }
        Ok(())
    }
}

/// Filesystem capability interface consumed by the interpreter.
///
/// Implementations normalize every path before use; callers may pass
/// absolute or relative paths interchangeably.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Metadata for the entry at `path`.
    async fn stat(&self, path: &str) -> Result<Metadata, FsError>;

    /// Metadata for the entry at `path` without following links.
    async fn lstat(&self, path: &str) -> Result<Metadata, FsError>;

    /// Entries of the directory at `path`, sorted ascending by name.
    async fn read_dir(&self, path: &str) -> Result<Vec<Metadata>, FsError>;

    /// Open `path` for reading. Directories open as handles that stat but do
    /// not read as byte streams.
    async fn open(&self, path: &str) -> Result<Box<dyn FileHandle>, FsError>;

    /// Open `path` as a readable and writable session.
    async fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn FileHandle>, FsError>;

    /// Read the whole file at `path`.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let mut file = self.open(path).await?;
        file.read_to_end().await
    }

    /// Replace or create the file at `path` with `data`.
    async fn write_file(&self, path: &str, data: &[u8], perm: u32) -> Result<(), FsError>;

    /// Create a directory and any missing parents.
    async fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), FsError>;

    /// Remove a file or an empty directory.
    async fn remove(&self, path: &str) -> Result<(), FsError>;

    /// Remove a file or a directory with everything below it.
    async fn remove_all(&self, path: &str) -> Result<(), FsError>;
}
