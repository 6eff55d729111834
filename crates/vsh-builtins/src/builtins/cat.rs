//! cat builtin - concatenate files to standard output

use vsh::{CommandContext, CommandError};

use super::{read_input, split_flags};

/// `cat [-nEs] [FILE]...`
///
/// `-n` numbers every output line, `-E` marks line ends with `$` and `-s`
/// squeezes runs of blank lines. With no files, or for `-`, standard input
/// is read. Line numbering continues across files.
pub async fn cat(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let (flags, mut files) = split_flags(args.get(1..).unwrap_or_default());
    let mut number = false;
    let mut ends = false;
    let mut squeeze = false;
    for flag in flags {
        match flag {
            'n' => number = true,
            'E' => ends = true,
            's' => squeeze = true,
            other => {
                writeln!(ctx.stderr, "cat: invalid option -- '{other}'")?;
                return Ok(());
            }
        }
    }
    if files.is_empty() {
        files.push("-".into());
    }
    let mut line_no = 0usize;
    let mut last_blank = false;
    for file in &files {
        let data = match read_input(&ctx, file).await {
            Ok(data) => data,
            Err(msg) => {
                writeln!(ctx.stderr, "cat: {msg}")?;
                continue;
            }
        };
        if !number && !ends && !squeeze {
            ctx.stdout.write_all(&data)?;
            continue;
        }
        let mut out = Vec::with_capacity(data.len());
        for line in data.split_inclusive(|b| *b == b'\n') {
            let body = line.strip_suffix(b"\n").unwrap_or(line);
            let blank = body.is_empty();
            if squeeze && blank && last_blank {
                continue;
            }
            last_blank = blank;
            if number {
                line_no += 1;
                out.extend_from_slice(format!("{line_no:>6}\t").as_bytes());
            }
            out.extend_from_slice(body);
            if line.ends_with(b"\n") {
                if ends {
                    out.push(b'$');
                }
                out.push(b'\n');
            }
        }
        ctx.stdout.write_all(&out)?;
    }
    Ok(())
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
        fs.write_file("/work/a", b"one\n\n\n\ntwo\n", 0o644).await.unwrap();
        fs.write_file("/work/b", b"three", 0o644).await.unwrap();
        fs
    }

    #[tokio::test]
    async fn test_concatenates_files_and_stdin() {
        let fs = fs().await;
        let (ctx, out, _) = context(&fs, "piped\n");
        cat(ctx, args(&["cat", "b", "-", "/work/b"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), "threepiped\nthree");
    }

    #[tokio::test]
    async fn test_number_squeeze_and_ends() {
        let fs = fs().await;
        let (ctx, out, _) = context(&fs, "");
        cat(ctx, args(&["cat", "-nsE", "a"])).await.unwrap();
        assert_eq!(
            out.to_string_lossy(),
            "     1\tone$\n     2\t$\n     3\ttwo$\n"
        );
    }

    #[tokio::test]
    async fn test_missing_file_reports_and_continues() {
        let fs = fs().await;
        let (ctx, out, err) = context(&fs, "");
        let res = cat(ctx, args(&["cat", "nope", "b"])).await;
        assert!(res.is_ok());
        assert_eq!(out.to_string_lossy(), "three");
        assert_eq!(err.to_string_lossy(), "cat: nope: No such file or directory\n");
    }
}
