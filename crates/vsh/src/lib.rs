//! vsh: an embeddable shell interpreter over a virtual filesystem.
//!
//! A [`Runner`] holds everything a shell session needs (variables,
//! functions, aliases, options, positional parameters, the directory stack,
//! background jobs and traps) and interprets statement trees against a
//! pluggable [`FileSystem`]. Commands are either registered by the host
//! through a [`CommandRegistry`] or found as script files on `PATH` inside
//! the filesystem; nothing ever reaches the host's processes.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use tokio_util::sync::CancellationToken;
//! use vsh::{LineExecutor, MemFs, OutputStream, Runner};
//!
//! let (stdout, out) = OutputStream::buffer();
//! let mut runner = Runner::builder()
//!     .filesystem(MemFs::new())
//!     .stdout(stdout)
//!     .build()
//!     .await?;
//! let node = LineExecutor::stmt("greeting=hi; echo $greeting")?;
//! runner.run(&CancellationToken::new(), &node).await?;
//! assert_eq!(out.to_string_lossy(), "hi\n");
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod dispatch;
pub mod env;
pub mod interp;
pub mod io;
pub mod options;
pub mod path;
pub mod runner;
pub mod vfs;

pub use command::{Command, CommandContext, CommandError};
pub use dispatch::{CommandRegistry, DispatchError};
pub use env::{EnvError, Environ, MapEnviron, Overlay, Variable};
pub use interp::{LineExecutor, ParseError, Program, parse};
pub use io::{InputStream, OutputStream, SharedBuffer};
pub use options::{ParamsError, ShellOpt, ShellOpts};
pub use runner::{
    Body, ConfigError, Executor, ExitStatus, JobId, Node, RunError, Runner, RunnerBuilder, Trap,
    TrapKind,
};
pub use vfs::{DiskFs, FileHandle, FileSystem, FsError, FsErrorKind, Metadata, MemFs, OpenFlags};
