//! In-memory filesystem.
//!
//! The tree is made of directory and file nodes, each behind its own
//! [`RwLock`]. There is no global lock: lookups descend parent to child and
//! release the parent before locking the child, so unrelated subtrees never
//! contend and no lock-ordering cycle can form.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use super::{FileHandle, FileSystem, FsError, Metadata, OpenFlags};
use crate::path::{normalize, split_parent};

/// Minimum capacity of a resident file buffer, so repeated small writes
/// don't reallocate.
const BUFFER_SIZE: usize = 0x100;

/// Size reported for directories.
const DIR_SIZE: u64 = 0x100;

/// Produces the bytes of a lazily loaded file on demand.
pub type LazyOpener = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<u8>, FsError>> + Send + Sync>;

enum Content {
    Resident(Vec<u8>),
    Lazy(LazyOpener),
}

struct FileNode {
    name: String,
    state: RwLock<FileState>,
}

struct FileState {
    mode: u32,
    size: u64,
    modified: SystemTime,
    content: Content,
}

struct DirNode {
    name: String,
    state: RwLock<DirState>,
}

struct DirState {
    mode: u32,
    modified: SystemTime,
    dirs: HashMap<String, Arc<DirNode>>,
    files: HashMap<String, Arc<FileNode>>,
}

enum Entry {
    File(Arc<FileNode>),
    Dir(Arc<DirNode>),
}

impl FileNode {
    fn new(name: &str, mode: u32, size: u64, content: Content) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: RwLock::new(FileState {
                mode,
                size,
                modified: SystemTime::now(),
                content,
            }),
        })
    }

    async fn metadata(&self) -> Metadata {
        let state = self.state.read().await;
        Metadata {
            name: self.name.clone(),
            is_dir: false,
            mode: state.mode,
            size: state.size,
            modified: state.modified,
        }
    }

    async fn replace(&self, content: Content, size: u64, mode: u32) {
        let mut state = self.state.write().await;
        state.content = content;
        state.size = size;
        state.mode = mode;
        state.modified = SystemTime::now();
    }

    async fn truncate(&self) {
        let mut state = self.state.write().await;
        state.content = Content::Resident(Vec::with_capacity(BUFFER_SIZE));
        state.size = 0;
        state.modified = SystemTime::now();
    }
}

impl DirNode {
    fn new(name: &str, mode: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: RwLock::new(DirState {
                mode,
                modified: SystemTime::now(),
                dirs: HashMap::new(),
                files: HashMap::new(),
            }),
        })
    }

    async fn metadata(&self) -> Metadata {
        let state = self.state.read().await;
        Metadata {
            name: self.name.clone(),
            is_dir: true,
            mode: state.mode,
            size: DIR_SIZE,
            modified: state.modified,
        }
    }
}

/// In-memory filesystem.
///
/// Cloning a `MemFs` yields another handle onto the same tree.
#[derive(Clone)]
pub struct MemFs {
    root: Arc<DirNode>,
}

impl fmt::Debug for MemFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemFs").finish_non_exhaustive()
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Create an empty filesystem whose root is world-writable.
    pub fn new() -> Self {
        Self {
            root: DirNode::new(".", 0o777),
        }
    }

    /// Descend to the directory at a normalized path.
    async fn walk_dir(&self, path: &str) -> Option<Arc<DirNode>> {
        let mut current = Arc::clone(&self.root);
        if path.is_empty() {
            return Some(current);
        }
        for segment in path.split('/') {
            let next = current.state.read().await.dirs.get(segment).cloned();
            current = next?;
        }
        Some(current)
    }

    async fn entry(&self, path: &str) -> Option<Entry> {
        if path.is_empty() {
            return Some(Entry::Dir(Arc::clone(&self.root)));
        }
        let (parent, name) = split_parent(path);
        let dir = self.walk_dir(parent).await?;
        let state = dir.state.read().await;
        if let Some(file) = state.files.get(name) {
            return Some(Entry::File(Arc::clone(file)));
        }
        state.dirs.get(name).cloned().map(Entry::Dir)
    }

    /// Return the file at `path`, creating an empty one if absent.
    async fn create_file(&self, path: &str, perm: u32) -> Result<Arc<FileNode>, FsError> {
        let (parent, name) = split_parent(path);
        let dir = self
            .walk_dir(parent)
            .await
            .ok_or_else(|| FsError::not_exist("open", path))?;
        let mut state = dir.state.write().await;
        if state.dirs.contains_key(name) {
            return Err(FsError::invalid("open", path));
        }
        if let Some(file) = state.files.get(name) {
            return Ok(Arc::clone(file));
        }
        let file = FileNode::new(
            name,
            perm,
            0,
            Content::Resident(Vec::with_capacity(BUFFER_SIZE)),
        );
        state.files.insert(name.to_string(), Arc::clone(&file));
        state.modified = SystemTime::now();
        Ok(file)
    }

    /// Create or overwrite the file at `path` with content that is only read
    /// from `opener` when a session first reads it.
    pub async fn write_lazy_file(
        &self,
        path: &str,
        opener: LazyOpener,
        perm: u32,
        size: u64,
    ) -> Result<(), FsError> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(FsError::invalid("write", path));
        }
        let (parent, name) = split_parent(&path);
        let dir = self
            .walk_dir(parent)
            .await
            .ok_or_else(|| FsError::not_exist("write", path.as_str()))?;
        let mut state = dir.state.write().await;
        if state.dirs.contains_key(name) {
            return Err(FsError::invalid("write", path.as_str()));
        }
        state.files.insert(
            name.to_string(),
            FileNode::new(name, perm, size, Content::Lazy(opener)),
        );
        Ok(())
    }

    async fn remove_path(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let path = normalize(path);
        if path.is_empty() {
            return Ok(());
        }
        let op = if recursive { "removeall" } else { "remove" };
        let (parent, name) = split_parent(&path);
        let dir = self
            .walk_dir(parent)
            .await
            .ok_or_else(|| FsError::not_exist(op, path.as_str()))?;
        let mut state = dir.state.write().await;
        if state.files.remove(name).is_some() {
            state.modified = SystemTime::now();
            return Ok(());
        }
        let sub = state
            .dirs
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::not_exist(op, path.as_str()))?;
        if !recursive {
            let sub_state = sub.state.read().await;
            if !sub_state.dirs.is_empty() || !sub_state.files.is_empty() {
                return Err(FsError::invalid(op, path.as_str()));
            }
        }
        // Detaching the subtree drops every node below it.
        state.dirs.remove(name);
        state.modified = SystemTime::now();
        Ok(())
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let path = normalize(path);
        match self.entry(&path).await {
            Some(Entry::File(file)) => Ok(file.metadata().await),
            Some(Entry::Dir(dir)) => Ok(dir.metadata().await),
            None => Err(FsError::not_exist("stat", path)),
        }
    }

    async fn lstat(&self, path: &str) -> Result<Metadata, FsError> {
        Err(FsError::invalid("lstat", normalize(path)))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Metadata>, FsError> {
        let path = normalize(path);
        let dir = match self.entry(&path).await {
            Some(Entry::Dir(dir)) => dir,
            Some(Entry::File(_)) => return Err(FsError::invalid("readdir", path)),
            None => return Err(FsError::not_exist("readdir", path)),
        };
        let (dirs, files): (Vec<_>, Vec<_>) = {
            let state = dir.state.read().await;
            (
                state.dirs.values().cloned().collect(),
                state.files.values().cloned().collect(),
            )
        };
        let mut entries = Vec::with_capacity(dirs.len() + files.len());
        for sub in dirs {
            entries.push(sub.metadata().await);
        }
        for file in files {
            entries.push(file.metadata().await);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &str) -> Result<Box<dyn FileHandle>, FsError> {
        let path = normalize(path);
        match self.entry(&path).await {
            Some(Entry::File(file)) => Ok(Box::new(MemFile::new(file, path, false, false))),
            Some(Entry::Dir(dir)) => Ok(Box::new(MemDir { dir, path })),
            None => Err(FsError::not_exist("open", path)),
        }
    }

    async fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(FsError::invalid("open", path));
        }
        let file = match self.entry(&path).await {
            Some(Entry::File(file)) => file,
            Some(Entry::Dir(_)) => return Err(FsError::invalid("open", path)),
            None if flags.create => self.create_file(&path, perm).await?,
            None => return Err(FsError::not_exist("open", path)),
        };
        if flags.truncate {
            file.truncate().await;
        }
        Ok(Box::new(MemFile::new(file, path, true, flags.append)))
    }

    async fn write_file(&self, path: &str, data: &[u8], perm: u32) -> Result<(), FsError> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(FsError::invalid("write", path));
        }
        let (parent, name) = split_parent(&path);
        let dir = self
            .walk_dir(parent)
            .await
            .ok_or_else(|| FsError::not_exist("write", path.as_str()))?;

        let mut buffer = Vec::with_capacity(data.len().max(BUFFER_SIZE));
        buffer.extend_from_slice(data);
        let size = buffer.len() as u64;

        let existing = {
            let mut state = dir.state.write().await;
            if state.dirs.contains_key(name) {
                return Err(FsError::invalid("write", path.as_str()));
            }
            match state.files.get(name) {
                Some(file) => Arc::clone(file),
                None => {
                    let file = FileNode::new(name, perm, size, Content::Resident(buffer));
                    state.files.insert(name.to_string(), file);
                    state.modified = SystemTime::now();
                    return Ok(());
                }
            }
        };
        existing
            .replace(Content::Resident(buffer), size, perm)
            .await;
        Ok(())
    }

    async fn mkdir_all(&self, path: &str, perm: u32) -> Result<(), FsError> {
        let path = normalize(path);
        if path.is_empty() {
            return Ok(());
        }
        let mut current = Arc::clone(&self.root);
        for segment in path.split('/') {
            let found = {
                let state = current.state.read().await;
                if state.files.contains_key(segment) {
                    return Err(FsError::exist("mkdir", path.as_str()));
                }
                state.dirs.get(segment).cloned()
            };
            let next = match found {
                Some(dir) => dir,
                None => {
                    let mut state = current.state.write().await;
                    if state.files.contains_key(segment) {
                        return Err(FsError::exist("mkdir", path.as_str()));
                    }
                    match state.dirs.get(segment) {
                        Some(dir) => Arc::clone(dir),
                        None => {
                            let dir = DirNode::new(segment, perm);
                            state.dirs.insert(segment.to_string(), Arc::clone(&dir));
                            state.modified = SystemTime::now();
                            dir
                        }
                    }
                }
            };
            current = next;
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        self.remove_path(path, false).await
    }

    async fn remove_all(&self, path: &str) -> Result<(), FsError> {
        self.remove_path(path, true).await
    }
}

/// Session on a file node.
struct MemFile {
    file: Arc<FileNode>,
    path: String,
    pos: usize,
    writable: bool,
    append: bool,
    /// Bytes fetched from a lazy opener for this session.
    lazy: Option<Vec<u8>>,
}

impl fmt::Debug for MemFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemFile")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

impl MemFile {
    fn new(file: Arc<FileNode>, path: String, writable: bool, append: bool) -> Self {
        Self {
            file,
            path,
            pos: 0,
            writable,
            append,
            lazy: None,
        }
    }
}

fn copy_at(data: &[u8], pos: &mut usize, buf: &mut [u8]) -> usize {
    if *pos >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - *pos);
    buf[..n].copy_from_slice(&data[*pos..*pos + n]);
    *pos += n;
    n
}

#[async_trait]
impl FileHandle for MemFile {
    async fn stat(&self) -> Result<Metadata, FsError> {
        Ok(self.file.metadata().await)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        loop {
            let opener = {
                let state = self.file.state.read().await;
                match &state.content {
                    Content::Resident(bytes) => return Ok(copy_at(bytes, &mut self.pos, buf)),
                    Content::Lazy(opener) => match &self.lazy {
                        Some(cached) => return Ok(copy_at(cached, &mut self.pos, buf)),
                        None => Arc::clone(opener),
                    },
                }
            };
            self.lazy = Some(opener().await?);
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if !self.writable {
            return Err(FsError::invalid("write", self.path.as_str()));
        }
        let mut state = self.file.state.write().await;
        if let Content::Lazy(opener) = &state.content {
            let bytes = opener().await?;
            state.content = Content::Resident(bytes);
            self.lazy = None;
        }
        let Content::Resident(bytes) = &mut state.content else {
            return Err(FsError::invalid("write", self.path.as_str()));
        };
        if self.append {
            self.pos = bytes.len();
        }
        if bytes.capacity() < BUFFER_SIZE {
            bytes.reserve(BUFFER_SIZE - bytes.len());
        }
        let end = self.pos + buf.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[self.pos..end].copy_from_slice(buf);
        let size = bytes.len() as u64;
        self.pos = end;
        state.size = size;
        state.modified = SystemTime::now();
        Ok(buf.len())
    }

    async fn rewind(&mut self) -> Result<(), FsError> {
        self.pos = 0;
        Ok(())
    }
}

/// Handle on a directory node: stats, but never reads as bytes.
struct MemDir {
    dir: Arc<DirNode>,
    path: String,
}

impl fmt::Debug for MemDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemDir")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FileHandle for MemDir {
    async fn stat(&self) -> Result<Metadata, FsError> {
        Ok(self.dir.metadata().await)
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::vfs::FsErrorKind;

    async fn names(fs: &MemFs, path: &str) -> Vec<String> {
        fs.read_dir(path)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    #[tokio::test]
    async fn test_write_and_read_small() {
        let fs = MemFs::new();
        fs.write_file("/hello.txt", b"hello", 0o644).await.unwrap();
        assert_eq!(fs.read_file("hello.txt").await.unwrap(), b"hello");
        let meta = fs.stat("/hello.txt").await.unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.mode, 0o644);
        assert!(meta.is_file());
    }

    #[tokio::test]
    async fn test_write_and_read_above_buffer_size() {
        let fs = MemFs::new();
        let payload: Vec<u8> = (0..BUFFER_SIZE * 5 + 7).map(|i| (i % 251) as u8).collect();
        fs.write_file("big.bin", &payload, 0o644).await.unwrap();
        assert_eq!(fs.read_file("big.bin").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_session_write_round_trip() {
        let fs = MemFs::new();
        for len in [3, BUFFER_SIZE * 3 + 1] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 7) as u8 + b'a').collect();
            let mut file = fs
                .open_file("out", OpenFlags::new().create(true).truncate(true), 0o644)
                .await
                .unwrap();
            for chunk in payload.chunks(10) {
                file.write_all(chunk).await.unwrap();
            }
            assert_eq!(fs.read_file("out").await.unwrap(), payload);

            file.rewind().await.unwrap();
            assert_eq!(file.read_to_end().await.unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn test_open_file_requires_create() {
        let fs = MemFs::new();
        let err = fs
            .open_file("missing", OpenFlags::new(), 0o644)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotExist);
        assert_eq!(err.to_string(), "open missing: file does not exist");
    }

    #[tokio::test]
    async fn test_open_file_truncate_and_append() {
        let fs = MemFs::new();
        fs.write_file("log", b"one\n", 0o644).await.unwrap();

        let mut file = fs
            .open_file("log", OpenFlags::new().append(true), 0o644)
            .await
            .unwrap();
        file.write_all(b"two\n").await.unwrap();
        assert_eq!(fs.read_file("log").await.unwrap(), b"one\ntwo\n");

        fs.open_file("log", OpenFlags::new().truncate(true), 0o644)
            .await
            .unwrap();
        assert_eq!(fs.read_file("log").await.unwrap(), b"");
        assert_eq!(fs.stat("log").await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_open_root_is_directory_handle() {
        let fs = MemFs::new();
        for path in ["", ".", "/"] {
            let mut handle = fs.open(path).await.unwrap();
            assert!(handle.stat().await.unwrap().is_dir);
            let err = handle.read(&mut [0u8; 4]).await.unwrap_err();
            assert_eq!(err.kind(), FsErrorKind::Invalid);
        }
    }

    #[tokio::test]
    async fn test_read_only_handle_rejects_writes() {
        let fs = MemFs::new();
        fs.write_file("a", b"x", 0o644).await.unwrap();
        let mut handle = fs.open("a").await.unwrap();
        let err = handle.write(b"y").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_mkdir_all_idempotent() {
        let fs = MemFs::new();
        fs.mkdir_all("/a/b/c", 0o755).await.unwrap();
        fs.write_file("/a/b/file", b"x", 0o644).await.unwrap();
        let before = names(&fs, "/a/b").await;
        fs.mkdir_all("/a/b/c", 0o755).await.unwrap();
        assert_eq!(names(&fs, "/a/b").await, before);
        assert!(fs.stat("a/b/c").await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_mkdir_all_over_file_conflicts() {
        let fs = MemFs::new();
        fs.mkdir_all("a", 0o755).await.unwrap();
        fs.write_file("a/f", b"x", 0o644).await.unwrap();
        let err = fs.mkdir_all("a/f/g", 0o755).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Exist);
        assert_eq!(err.op(), "mkdir");
    }

    #[tokio::test]
    async fn test_write_file_needs_parent() {
        let fs = MemFs::new();
        let err = fs.write_file("no/such/file", b"x", 0o644).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotExist);
    }

    #[tokio::test]
    async fn test_read_dir_sorted() {
        let fs = MemFs::new();
        for name in ["zeta", "alpha", "mid"] {
            fs.write_file(name, b"", 0o644).await.unwrap();
        }
        for name in ["beta", "omega"] {
            fs.mkdir_all(name, 0o755).await.unwrap();
        }
        assert_eq!(
            names(&fs, "/").await,
            ["alpha", "beta", "mid", "omega", "zeta"]
        );
    }

    #[tokio::test]
    async fn test_read_dir_missing_and_file() {
        let fs = MemFs::new();
        fs.write_file("f", b"", 0o644).await.unwrap();
        assert_eq!(
            fs.read_dir("nope").await.unwrap_err().kind(),
            FsErrorKind::NotExist
        );
        assert_eq!(
            fs.read_dir("f").await.unwrap_err().kind(),
            FsErrorKind::Invalid
        );
    }

    #[tokio::test]
    async fn test_remove_non_empty_dir_is_invalid() {
        let fs = MemFs::new();
        fs.mkdir_all("d/sub", 0o755).await.unwrap();
        fs.write_file("d/file", b"data", 0o644).await.unwrap();

        let err = fs.remove("d").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Invalid);
        assert_eq!(names(&fs, "d").await, ["file", "sub"]);
        assert_eq!(fs.read_file("d/file").await.unwrap(), b"data");

        fs.remove_all("d").await.unwrap();
        assert_eq!(
            fs.stat("d").await.unwrap_err().kind(),
            FsErrorKind::NotExist
        );
        assert_eq!(
            fs.stat("d/sub").await.unwrap_err().kind(),
            FsErrorKind::NotExist
        );
    }

    #[tokio::test]
    async fn test_remove_single_entries() {
        let fs = MemFs::new();
        fs.mkdir_all("empty", 0o755).await.unwrap();
        fs.write_file("f", b"x", 0o644).await.unwrap();
        fs.remove("empty").await.unwrap();
        fs.remove("f").await.unwrap();
        assert!(names(&fs, "").await.is_empty());
        assert_eq!(
            fs.remove("f").await.unwrap_err().kind(),
            FsErrorKind::NotExist
        );
    }

    #[tokio::test]
    async fn test_lstat_is_invalid() {
        let fs = MemFs::new();
        fs.write_file("f", b"x", 0o644).await.unwrap();
        assert_eq!(
            fs.lstat("f").await.unwrap_err().kind(),
            FsErrorKind::Invalid
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_distinct_files() {
        let fs = MemFs::new();
        fs.mkdir_all("shared", 0o755).await.unwrap();

        let mut tasks = Vec::new();
        for name in ["left", "right"] {
            let fs = fs.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    let body = format!("{name}-{i}");
                    fs.write_file(&format!("shared/{name}"), body.as_bytes(), 0o644)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(fs.read_file("shared/left").await.unwrap(), b"left-199");
        assert_eq!(fs.read_file("shared/right").await.unwrap(), b"right-199");
    }

    #[tokio::test]
    async fn test_locked_file_does_not_block_sibling() {
        use std::time::Duration;

        let fs = MemFs::new();
        fs.mkdir_all("shared", 0o755).await.unwrap();
        fs.write_file("shared/left", b"left", 0o644).await.unwrap();
        fs.write_file("shared/right", b"right", 0o644).await.unwrap();

        let Some(Entry::File(left)) = fs.entry("shared/left").await else {
            panic!("shared/left is not a file");
        };
        let held = left.state.write().await;

        let wait = Duration::from_millis(200);
        tokio::time::timeout(wait, fs.write_file("shared/right", b"updated", 0o644))
            .await
            .expect("write to an unlocked sibling stalled")
            .unwrap();
        assert!(
            tokio::time::timeout(wait, fs.write_file("shared/left", b"x", 0o644))
                .await
                .is_err()
        );

        drop(held);
        assert_eq!(fs.read_file("shared/right").await.unwrap(), b"updated");
        assert_eq!(fs.read_file("shared/left").await.unwrap(), b"left");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overwrites_never_interleave() {
        let fs = MemFs::new();
        let payloads: Vec<Vec<u8>> = (0..8u8)
            .map(|i| vec![b'a' + i; BUFFER_SIZE * 4 + i as usize])
            .collect();

        let mut tasks = Vec::new();
        for payload in payloads.clone() {
            let fs = fs.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    fs.write_file("same", &payload, 0o644).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let content = fs.read_file("same").await.unwrap();
        assert!(payloads.contains(&content));
        assert_eq!(fs.stat("same").await.unwrap().size, content.len() as u64);
    }
}
