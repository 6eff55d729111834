//! Standard stream handles shared between the runner and commands.
//!
//! Streams are cheap to clone; every clone writes to (or reads from) the same
//! underlying sink. Writes from concurrent background jobs are serialized
//! per call by the stream's mutex, not per line.

use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// A shared output sink.
#[derive(Clone)]
pub struct OutputStream(Arc<Mutex<Box<dyn Write + Send>>>);

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream").finish_non_exhaustive()
    }
}

impl OutputStream {
    /// Wrap a writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// The host's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// The host's standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// A stream writing into memory, and the handle to read it back.
    pub fn buffer() -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Write all of `data`.
    pub fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut sink = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        sink.write_all(data)?;
        sink.flush()
    }

    /// Write formatted output; this makes `write!`/`writeln!` work on a
    /// shared reference.
    pub fn write_fmt(&self, args: fmt::Arguments<'_>) -> io::Result<()> {
        let mut sink = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        sink.write_fmt(args)?;
        sink.flush()
    }
}

/// In-memory byte sink readable from another handle.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Everything written so far, as lossy UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Take the contents, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A shared input source.
#[derive(Clone)]
pub struct InputStream(Arc<Mutex<Box<dyn Read + Send>>>);

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream").finish_non_exhaustive()
    }
}

impl InputStream {
    /// Wrap a reader.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(reader))))
    }

    /// Input that yields `data` and then end of file.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(data.into()))
    }

    /// Read until end of file.
    pub fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_to_end(&mut out)?;
        Ok(out)
    }

    /// Read until end of file on the blocking pool, giving up with
    /// [`io::ErrorKind::Interrupted`] once `cancel` fires.
    pub async fn read_all(&self, cancel: &CancellationToken) -> io::Result<Vec<u8>> {
        let input = self.clone();
        let read = tokio::task::spawn_blocking(move || input.read_to_end());
        tokio::select! {
            joined = read => joined.map_err(io::Error::other)?,
            _ = cancel.cancelled() => {
                Err(io::Error::new(io::ErrorKind::Interrupted, "read canceled"))
            }
        }
    }
}
