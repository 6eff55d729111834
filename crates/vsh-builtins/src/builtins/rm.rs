//! rm builtin - remove files or directories

use vsh::{CommandContext, CommandError, FileSystem};

use super::{describe, split_flags};

/// `rm [-rRf] PATH...`
pub async fn rm(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let (flags, paths) = split_flags(args.get(1..).unwrap_or_default());
    let mut recursive = false;
    let mut force = false;
    for flag in flags {
        match flag {
            'r' | 'R' => recursive = true,
            'f' => force = true,
            other => {
                writeln!(ctx.stderr, "rm: invalid option -- '{other}'")?;
                return Ok(());
            }
        }
    }
    if paths.is_empty() && !force {
        writeln!(ctx.stderr, "rm: missing operand")?;
        return Ok(());
    }
    for path in &paths {
        let target = ctx.abs(path);
        if target == "/" {
            writeln!(ctx.stderr, "rm: refusing to remove '/'")?;
            continue;
        }
        let meta = match ctx.fs.stat(&target).await {
            Ok(meta) => meta,
            Err(_) if force => continue,
            Err(err) => {
                writeln!(ctx.stderr, "rm: {path}: {}", describe(&err))?;
                continue;
            }
        };
        let removed = if meta.is_dir {
            if !recursive {
                writeln!(ctx.stderr, "rm: {path}: is a directory")?;
                continue;
            }
            ctx.fs.remove_all(&target).await
        } else {
            ctx.fs.remove(&target).await
        };
        match removed {
            Ok(()) => tracing::debug!(path = %target, "removed"),
            Err(err) => {
                writeln!(ctx.stderr, "rm: {path}: {}", describe(&err))?;
            }
        }
    }
    Ok(())
}
