//! mkdir builtin - make directories

use vsh::{CommandContext, CommandError, FileSystem, path};

use super::{describe, split_flags};

/// `mkdir [-p] DIR...`
///
/// Without `-p` the parent must exist and the directory must not.
pub async fn mkdir(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let (flags, dirs) = split_flags(args.get(1..).unwrap_or_default());
    let mut parents = false;
    for flag in flags {
        match flag {
            'p' => parents = true,
            other => {
                writeln!(ctx.stderr, "mkdir: invalid option -- '{other}'")?;
                return Ok(());
            }
        }
    }
    if dirs.is_empty() {
        writeln!(ctx.stderr, "mkdir: missing operand")?;
        return Ok(());
    }
    for dir in &dirs {
        let target = ctx.abs(dir);
        if !parents {
            if ctx.fs.stat(&target).await.is_ok() {
                writeln!(ctx.stderr, "mkdir: {dir}: File exists")?;
                continue;
            }
            let parent = path::join(&target, "..");
            match ctx.fs.stat(&parent).await {
                Ok(meta) if meta.is_dir => {}
                _ => {
                    writeln!(ctx.stderr, "mkdir: {dir}: No such file or directory")?;
                    continue;
                }
            }
        }
        if let Err(err) = ctx.fs.mkdir_all(&target, 0o755).await {
            writeln!(ctx.stderr, "mkdir: {dir}: {}", describe(&err))?;
        }
    }
    Ok(())
}
