//! Command name resolution.
//!
//! A name resolves to a registered command if one exists; otherwise `PATH`
//! is searched through the virtual filesystem.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::command::Command;
use crate::env::Environ;
use crate::path;
use crate::vfs::FileSystem;

/// Errors from resolving a command name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No registered command or executable file matches the name.
    #[error("{0:?}: executable file not found in $PATH")]
    NotFound(String),
}

/// Commands registered by the host, by name.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, command: impl Command + 'static) {
        self.commands.insert(name.into(), Arc::new(command));
    }

    /// Register an already shared command.
    pub fn insert_arc(&mut self, name: impl Into<String>, command: Arc<dyn Command>) {
        self.commands.insert(name.into(), command);
    }

    /// Copy every entry of `other` into this registry.
    pub fn extend(&mut self, other: &CommandRegistry) {
        for (name, command) in &other.commands {
            self.commands.insert(name.clone(), Arc::clone(command));
        }
    }

    /// Look up a command by exact name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }
}

/// What a command name resolved to.
#[derive(Clone)]
pub enum Resolved {
    /// A registered command.
    Builtin(Arc<dyn Command>),
    /// An absolute path to an executable file in the filesystem.
    Executable(String),
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(_) => f.write_str("Builtin"),
            Self::Executable(path) => f.debug_tuple("Executable").field(path).finish(),
        }
    }
}

/// Resolve `name`: registered commands first, then `PATH`.
pub async fn resolve(
    commands: &CommandRegistry,
    fs: &dyn FileSystem,
    env: &dyn Environ,
    dir: &str,
    name: &str,
) -> Result<Resolved, DispatchError> {
    if let Some(command) = commands.get(name) {
        return Ok(Resolved::Builtin(command));
    }
    look_path(fs, env, dir, name).await.map(Resolved::Executable)
}

/// Search `PATH` for an executable regular file called `name`.
///
/// Empty entries and `.` mean the current directory. Candidates that are
/// directories, lack an execute bit, or fail to stat are skipped and the
/// search moves on to the next entry. A name containing `/` is checked
/// directly without consulting `PATH`.
pub async fn look_path(
    fs: &dyn FileSystem,
    env: &dyn Environ,
    dir: &str,
    name: &str,
) -> Result<String, DispatchError> {
    if name.contains('/') {
        return match check_executable(fs, dir, name).await {
            Some(found) => Ok(found),
            None => Err(DispatchError::NotFound(name.to_string())),
        };
    }
    let path_var = env.get("PATH").map(|v| v.value).unwrap_or_default();
    for entry in path_var.split(':') {
        let candidate = match entry {
            "" | "." => format!("./{name}"),
            _ => path::join(entry, name),
        };
        if let Some(found) = check_executable(fs, dir, &candidate).await {
            tracing::debug!(name, path = %found, "resolved command from PATH");
            return Ok(found);
        }
    }
    tracing::debug!(name, "command not found");
    Err(DispatchError::NotFound(name.to_string()))
}

async fn check_executable(fs: &dyn FileSystem, dir: &str, candidate: &str) -> Option<String> {
    let file = path::abs(dir, candidate);
    let meta = fs.stat(&file).await.ok()?;
    if meta.is_dir || !meta.is_executable() {
        return None;
    }
    Some(file)
}
