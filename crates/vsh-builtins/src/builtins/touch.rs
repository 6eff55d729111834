//! touch builtin - create empty files

use vsh::{CommandContext, CommandError, FileSystem, OpenFlags};

use super::{describe, split_flags};

/// `touch [-c] FILE...`
///
/// Missing files are created empty unless `-c` is given. Existing entries
/// are left as they are; the filesystem interface cannot set times.
pub async fn touch(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let (flags, files) = split_flags(args.get(1..).unwrap_or_default());
    let mut no_create = false;
    for flag in flags {
        match flag {
            'c' => no_create = true,
            other => {
                writeln!(ctx.stderr, "touch: invalid option -- '{other}'")?;
                return Ok(());
            }
        }
    }
    if files.is_empty() {
        writeln!(ctx.stderr, "touch: missing file operand")?;
        return Ok(());
    }
    for file in &files {
        let target = ctx.abs(file);
        if no_create || ctx.fs.stat(&target).await.is_ok() {
            continue;
        }
        if let Err(err) = ctx
            .fs
            .open_file(&target, OpenFlags::new().create(true), 0o644)
            .await
        {
            writeln!(ctx.stderr, "touch: {file}: {}", describe(&err))?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vsh::MemFs;

    use super::*;
    use crate::builtins::testing::{args, context};

    #[tokio::test]
    async fn test_creates_missing_and_keeps_existing() {
        let fs = MemFs::new();
        fs.mkdir_all("/work", 0o755).await.unwrap();
        fs.write_file("/work/kept", b"data", 0o644).await.unwrap();
        let (ctx, _, _) = context(&fs, "");
        touch(ctx, args(&["touch", "new", "kept"])).await.unwrap();
        assert!(fs.read_file("/work/new").await.unwrap().is_empty());
        assert_eq!(fs.read_file("/work/kept").await.unwrap(), b"data");

        let (ctx, _, _) = context(&fs, "");
        touch(ctx, args(&["touch", "-c", "skipped"])).await.unwrap();
        assert!(fs.stat("/work/skipped").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_parent() {
        let fs = MemFs::new();
        fs.mkdir_all("/work", 0o755).await.unwrap();
        let (ctx, _, err) = context(&fs, "");
        touch(ctx, args(&["touch", "no/such"])).await.unwrap();
        assert_eq!(err.to_string_lossy(), "touch: no/such: No such file or directory\n");
    }
}
