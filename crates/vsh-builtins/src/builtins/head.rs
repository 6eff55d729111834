//! head builtin - output the first part of files

use vsh::{CommandContext, CommandError};

use super::read_input;

/// `head [-n LINES | -c BYTES | -LINES] [FILE]...`
pub async fn head(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let mut lines = 10usize;
    let mut bytes: Option<usize> = None;
    let mut files = Vec::new();

    let mut iter = args.get(1..).unwrap_or_default().iter();
    while let Some(arg) = iter.next() {
        let (kind, value) = match arg.as_str() {
            "-n" | "--lines" => ('n', iter.next().map(String::as_str)),
            "-c" | "--bytes" => ('c', iter.next().map(String::as_str)),
            "-" => {
                files.push(arg.clone());
                continue;
            }
            a if a.starts_with("-n") => ('n', Some(&a[2..])),
            a if a.starts_with("-c") => ('c', Some(&a[2..])),
            a if a.starts_with('-') => ('n', Some(&a[1..])),
            _ => {
                files.push(arg.clone());
                continue;
            }
        };
        let Some(count) = value.and_then(|v| v.parse::<usize>().ok()) else {
            let what = if kind == 'n' { "lines" } else { "bytes" };
            writeln!(
                ctx.stderr,
                "head: invalid number of {what}: '{}'",
                value.unwrap_or_default()
            )?;
            return Ok(());
        };
        if kind == 'n' {
            lines = count;
            bytes = None;
        } else {
            bytes = Some(count);
        }
    }
    if files.is_empty() {
        files.push("-".into());
    }
    let headers = files.len() > 1;
    for (i, file) in files.iter().enumerate() {
        let data = match read_input(&ctx, file).await {
            Ok(data) => data,
            Err(msg) => {
                writeln!(ctx.stderr, "head: {msg}")?;
                continue;
            }
        };
        if headers {
            if i > 0 {
                writeln!(ctx.stdout)?;
            }
            writeln!(ctx.stdout, "==> {file} <==")?;
        }
        let end = match bytes {
            Some(n) => n.min(data.len()),
            None => line_end(&data, lines),
        };
        ctx.stdout.write_all(&data[..end])?;
    }
    Ok(())
}

/// Offset just past the `lines`-th newline, or the end of `data`.
fn line_end(data: &[u8], lines: usize) -> usize {
    if lines == 0 {
        return 0;
    }
    data.iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .nth(lines - 1)
        .map_or(data.len(), |(i, _)| i + 1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vsh::{FileSystem, MemFs};

    use super::*;
    use crate::builtins::testing::{args, context};

    async fn fs() -> MemFs {
        let fs = MemFs::new();
        fs.mkdir_all("/work", 0o755).await.unwrap();
        let numbers: String = (1..=20).map(|i| format!("{i}\n")).collect();
        fs.write_file("/work/nums", numbers.as_bytes(), 0o644).await.unwrap();
        fs.write_file("/work/short", b"a\nb", 0o644).await.unwrap();
        fs
    }

    #[test]
    fn test_line_end() {
        assert_eq!(line_end(b"a\nb\nc", 2), 4);
        assert_eq!(line_end(b"a\nb", 5), 3);
        assert_eq!(line_end(b"a\n", 0), 0);
    }

    #[tokio::test]
    async fn test_default_ten_lines() {
        let fs = fs().await;
        let (ctx, out, _) = context(&fs, "");
        head(ctx, args(&["head", "nums"])).await.unwrap();
        assert_eq!(out.to_string_lossy().lines().count(), 10);
    }

    #[tokio::test]
    async fn test_counts_and_headers() {
        let fs = fs().await;
        let (ctx, out, _) = context(&fs, "");
        head(ctx, args(&["head", "-n", "2", "nums", "short"])).await.unwrap();
        assert_eq!(
            out.to_string_lossy(),
            "==> nums <==\n1\n2\n\n==> short <==\na\nb"
        );

        let (ctx, out, _) = context(&fs, "");
        head(ctx, args(&["head", "-3"])).await.unwrap();
        assert!(out.contents().is_empty());

        let (ctx, out, _) = context(&fs, "x\ny\nz\nw\n");
        head(ctx, args(&["head", "-3"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), "x\ny\nz\n");

        let (ctx, out, _) = context(&fs, "");
        head(ctx, args(&["head", "-c4", "nums"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), "1\n2\n");
    }

    #[tokio::test]
    async fn test_invalid_count() {
        let fs = fs().await;
        let (ctx, _, err) = context(&fs, "");
        head(ctx, args(&["head", "-n", "many"])).await.unwrap();
        assert_eq!(err.to_string_lossy(), "head: invalid number of lines: 'many'\n");
    }
}
