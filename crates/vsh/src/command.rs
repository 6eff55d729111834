//! The contract between the interpreter and host-registered commands.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::dispatch::CommandRegistry;
use crate::env::Environ;
use crate::io::{InputStream, OutputStream};
use crate::path;
use crate::vfs::FileSystem;

/// Outcome of a command other than plain success.
///
/// User-facing failures (a missing file, a bad flag) should be written to
/// stderr and reported as [`CommandError::Exit`]. [`CommandError::Fatal`]
/// halts the whole interpreter and is reserved for failures such as a broken
/// output stream.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command finished with a non-zero status.
    #[error("exit status {0}")]
    Exit(u8),
    /// The command failed with a status and an error the runner's caller
    /// should see, without halting interpretation.
    #[error("{error}")]
    Status {
        /// Exit status to record.
        code: u8,
        /// The error surfaced by the runner.
        error: anyhow::Error,
    },
    /// Interpretation must stop.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::Fatal(err.into())
    }
}

/// Everything a command may observe or touch.
#[derive(Clone)]
pub struct CommandContext {
    /// Cancelled when the host stops the current run.
    pub cancel: CancellationToken,
    /// Read-only view of the shell's variables.
    pub env: Arc<dyn Environ>,
    /// The filesystem scripts operate on.
    pub fs: Arc<dyn FileSystem>,
    /// The registered commands, for commands that run other commands.
    pub commands: Arc<CommandRegistry>,
    /// Whether the shell is attached to a terminal.
    pub tty: bool,
    /// Current directory, absolute.
    pub dir: String,
    /// Standard input; `None` reads as empty.
    pub stdin: Option<InputStream>,
    /// Standard output.
    pub stdout: OutputStream,
    /// Standard error.
    pub stderr: OutputStream,
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("dir", &self.dir)
            .field("tty", &self.tty)
            .finish_non_exhaustive()
    }
}

impl CommandContext {
    /// Resolve `path` against the current directory.
    pub fn abs(&self, path: &str) -> String {
        path::abs(&self.dir, path)
    }

    /// Read all of standard input without blocking the runtime. Fails if
    /// the run is cancelled first.
    pub async fn read_stdin(&self) -> std::io::Result<Vec<u8>> {
        match &self.stdin {
            Some(stdin) => stdin.read_all(&self.cancel).await,
            None => Ok(Vec::new()),
        }
    }

    /// Run another registered command with this context.
    pub async fn call(&self, args: Vec<String>) -> Result<(), CommandError> {
        let Some(name) = args.first() else {
            return Ok(());
        };
        match self.commands.get(name) {
            Some(command) => command.run(self.clone(), args).await,
            None => {
                writeln!(self.stderr, "{name}: command not found")?;
                Err(CommandError::Exit(127))
            }
        }
    }
}

/// A host-registered command.
///
/// `args[0]` is the name the command was invoked as.
#[async_trait]
pub trait Command: Send + Sync {
    /// Run the command.
    async fn run(&self, ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError>;
}

#[async_trait]
impl<F, Fut> Command for F
where
    F: Fn(CommandContext, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CommandError>> + Send,
{
    async fn run(&self, ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
        (self)(ctx, args).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::env::MapEnviron;
    use crate::vfs::MemFs;

    fn context(commands: CommandRegistry) -> (CommandContext, crate::io::SharedBuffer) {
        let (stdout, out) = OutputStream::buffer();
        let ctx = CommandContext {
            cancel: CancellationToken::new(),
            env: Arc::new(MapEnviron::default()),
            fs: Arc::new(MemFs::new()),
            commands: Arc::new(commands),
            tty: false,
            dir: "/home".into(),
            stdin: Some(InputStream::from_bytes("in")),
            stdout: stdout.clone(),
            stderr: stdout,
        };
        (ctx, out)
    }

    async fn greet(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
        writeln!(ctx.stdout, "hello {}", args[1..].join(" "))?;
        Ok(())
    }

    #[tokio::test]
    async fn test_call_registered_command() {
        let mut commands = CommandRegistry::new();
        commands.insert("greet", greet);
        let (ctx, out) = context(commands);
        ctx.call(vec!["greet".into(), "world".into()]).await.unwrap();
        assert_eq!(out.to_string_lossy(), "hello world\n");
    }

    #[tokio::test]
    async fn test_call_missing_command() {
        let (ctx, out) = context(CommandRegistry::new());
        let err = ctx.call(vec!["nope".into()]).await.unwrap_err();
        assert!(matches!(err, CommandError::Exit(127)));
        assert_eq!(out.to_string_lossy(), "nope: command not found\n");
    }

    #[tokio::test]
    async fn test_abs_and_stdin() {
        let (ctx, _) = context(CommandRegistry::new());
        assert_eq!(ctx.abs("a/../b"), "/home/b");
        assert_eq!(ctx.read_stdin().await.unwrap(), b"in");
    }
}
