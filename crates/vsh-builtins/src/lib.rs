//! File and utility commands for the vsh interpreter.
//!
//! Every command here talks only to the [`vsh::CommandContext`] it is given:
//! files go through the virtual filesystem, relative paths resolve against
//! the context directory, and user-facing failures are written to stderr
//! while the command itself still succeeds, so `set -e` scripts carry on.
//! Errors are returned only when a stream breaks.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! let runner = vsh_builtins::install(vsh::Runner::builder())
//!     .build()
//!     .await?;
//! # let _ = runner;
//! # Ok(())
//! # }
//! ```

mod builtins;

pub use builtins::{
    cat, date, head, install, ls, mkdir, register_builtins, registry, rm, sleep, touch, wc,
};
