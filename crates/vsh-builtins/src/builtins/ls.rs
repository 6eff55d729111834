//! ls builtin - list directory contents

use chrono::{DateTime, Utc};
use vsh::{CommandContext, CommandError, FileSystem, Metadata};

use super::{describe, split_flags};

/// `ls [-al] [PATH]...`
///
/// Lists one entry per line. `-a` includes names starting with a dot and
/// `-l` prints mode, size and modification time before each name.
pub async fn ls(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let (flags, mut paths) = split_flags(args.get(1..).unwrap_or_default());
    let mut all = false;
    let mut long = false;
    for flag in flags {
        match flag {
            'a' => all = true,
            'l' => long = true,
            '1' => {}
            other => {
                writeln!(ctx.stderr, "ls: invalid option -- '{other}'")?;
                return Ok(());
            }
        }
    }
    if paths.is_empty() {
        paths.push(".".into());
    }
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for path in paths {
        match ctx.fs.stat(&ctx.abs(&path)).await {
            Ok(meta) if meta.is_dir => dirs.push(path),
            Ok(meta) => files.push((path, meta)),
            Err(err) => {
                writeln!(ctx.stderr, "ls: {path}: {}", describe(&err))?;
            }
        }
    }

    let mut out = String::new();
    for (path, meta) in &files {
        out.push_str(&entry_line(path, meta, long));
    }
    let headers = files.len() + dirs.len() > 1;
    for (i, dir) in dirs.iter().enumerate() {
        if headers {
            if i > 0 || !files.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("{dir}:\n"));
        }
        let entries = match ctx.fs.read_dir(&ctx.abs(dir)).await {
            Ok(entries) => entries,
            Err(err) => {
                writeln!(ctx.stderr, "ls: {dir}: {}", describe(&err))?;
                continue;
            }
        };
        for entry in entries.iter().filter(|e| all || !e.name.starts_with('.')) {
            out.push_str(&entry_line(&entry.name, entry, long));
        }
    }
    ctx.stdout.write_all(out.as_bytes())?;
    Ok(())
}

fn entry_line(name: &str, meta: &Metadata, long: bool) -> String {
    if !long {
        return format!("{name}\n");
    }
    let modified: DateTime<Utc> = meta.modified.into();
    format!(
        "{} {:>8} {} {name}\n",
        mode_string(meta),
        meta.size,
        modified.format("%b %e %H:%M"),
    )
}

fn mode_string(meta: &Metadata) -> String {
    let mut out = String::with_capacity(10);
    out.push(if meta.is_dir { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (meta.mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vsh::MemFs;

    use super::*;
    use crate::builtins::testing::{args, context};

    async fn fs() -> MemFs {
        let fs = MemFs::new();
        fs.mkdir_all("/work/sub", 0o755).await.unwrap();
        fs.write_file("/work/b.txt", b"bb", 0o644).await.unwrap();
        fs.write_file("/work/.hidden", b"", 0o600).await.unwrap();
        fs.write_file("/work/sub/run", b"#!", 0o755).await.unwrap();
        fs
    }

    #[tokio::test]
    async fn test_lists_current_dir() {
        let fs = fs().await;
        let (ctx, out, _) = context(&fs, "");
        ls(ctx, args(&["ls"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), "b.txt\nsub\n");

        let (ctx, out, _) = context(&fs, "");
        ls(ctx, args(&["ls", "-a"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), ".hidden\nb.txt\nsub\n");
    }

    #[tokio::test]
    async fn test_files_then_dirs_with_headers() {
        let fs = fs().await;
        let (ctx, out, _) = context(&fs, "");
        ls(ctx, args(&["ls", "sub", "b.txt"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), "b.txt\n\nsub:\nrun\n");
    }

    #[tokio::test]
    async fn test_long_format_modes() {
        let fs = fs().await;
        let (ctx, out, _) = context(&fs, "");
        ls(ctx, args(&["ls", "-l", "sub"])).await.unwrap();
        let line = out.to_string_lossy();
        assert!(line.starts_with("-rwxr-xr-x        2 "), "{line}");
        assert!(line.ends_with(" run\n"), "{line}");
    }

    #[tokio::test]
    async fn test_missing_path() {
        let fs = fs().await;
        let (ctx, _, err) = context(&fs, "");
        let res = ls(ctx, args(&["ls", "ghost"])).await;
        assert!(res.is_ok());
        assert_eq!(err.to_string_lossy(), "ls: ghost: No such file or directory\n");
    }
}
