//! Builtin registration and the helpers the commands share.

mod cat;
mod date;
mod head;
mod ls;
mod mkdir;
mod rm;
mod sleep;
mod touch;
mod wc;

pub use cat::cat;
pub use date::date;
pub use head::head;
pub use ls::ls;
pub use mkdir::mkdir;
pub use rm::rm;
pub use sleep::sleep;
pub use touch::touch;
pub use wc::wc;

use vsh::vfs::FsErrorKind;
use vsh::{CommandContext, CommandRegistry, FileSystem, FsError, RunnerBuilder};

/// Register all builtins.
pub fn register_builtins(commands: &mut CommandRegistry) {
    commands.insert("cat", cat);
    commands.insert("date", date);
    commands.insert("head", head);
    commands.insert("ls", ls);
    commands.insert("mkdir", mkdir);
    commands.insert("rm", rm);
    commands.insert("sleep", sleep);
    commands.insert("touch", touch);
    commands.insert("wc", wc);
}

/// A registry holding every builtin.
pub fn registry() -> CommandRegistry {
    let mut commands = CommandRegistry::new();
    register_builtins(&mut commands);
    commands
}

/// Add every builtin to a runner under construction.
pub fn install(builder: RunnerBuilder) -> RunnerBuilder {
    builder.commands(&registry())
}

/// Describe a filesystem error the way file utilities do.
pub(crate) fn describe(err: &FsError) -> String {
    match err.kind() {
        FsErrorKind::NotExist => "No such file or directory".into(),
        FsErrorKind::Exist => "File exists".into(),
        FsErrorKind::Invalid => "Is a directory".into(),
        FsErrorKind::Io => err.to_string(),
    }
}

/// Read a file operand, where `-` means standard input.
pub(crate) async fn read_input(ctx: &CommandContext, file: &str) -> Result<Vec<u8>, String> {
    if file == "-" {
        return ctx.read_stdin().await.map_err(|e| format!("-: {e}"));
    }
    ctx.fs
        .read_file(&ctx.abs(file))
        .await
        .map_err(|e| format!("{file}: {}", describe(&e)))
}

/// Split leading `-xyz` flag clusters from operands. Everything after `--`
/// is an operand, and so is a lone `-`.
pub(crate) fn split_flags(args: &[String]) -> (Vec<char>, Vec<String>) {
    let mut flags = Vec::new();
    let mut operands = Vec::new();
    let mut only_operands = false;
    for arg in args {
        if only_operands {
            operands.push(arg.clone());
            continue;
        }
        match arg.strip_prefix('-') {
            Some("-") => only_operands = true,
            Some(cluster) if !cluster.is_empty() => flags.extend(cluster.chars()),
            _ => operands.push(arg.clone()),
        }
    }
    (flags, operands)
}
