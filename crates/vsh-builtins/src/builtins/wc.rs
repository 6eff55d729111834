//! wc builtin - count lines, words and bytes

use vsh::{CommandContext, CommandError};

use super::{read_input, split_flags};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    lines: usize,
    words: usize,
    bytes: usize,
}

impl Counts {
    fn of(data: &[u8]) -> Self {
        Self {
            lines: data.iter().filter(|b| **b == b'\n').count(),
            words: data
                .split(|b| b.is_ascii_whitespace())
                .filter(|w| !w.is_empty())
                .count(),
            bytes: data.len(),
        }
    }

    fn add(&mut self, other: Counts) {
        self.lines += other.lines;
        self.words += other.words;
        self.bytes += other.bytes;
    }
}

/// `wc [-lwc] [FILE]...`
///
/// With no flags all three counts are printed, in the order lines, words,
/// bytes.
pub async fn wc(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let (flags, mut files) = split_flags(args.get(1..).unwrap_or_default());
    let (mut lines, mut words, mut bytes) = (false, false, false);
    for flag in flags {
        match flag {
            'l' => lines = true,
            'w' => words = true,
            'c' => bytes = true,
            other => {
                writeln!(ctx.stderr, "wc: invalid option -- '{other}'")?;
                return Ok(());
            }
        }
    }
    if !lines && !words && !bytes {
        (lines, words, bytes) = (true, true, true);
    }
    let from_stdin = files.is_empty();
    if from_stdin {
        files.push("-".into());
    }

    let render = |counts: Counts, name: Option<&str>| {
        let mut fields = Vec::new();
        for (on, n) in [
            (lines, counts.lines),
            (words, counts.words),
            (bytes, counts.bytes),
        ] {
            if on {
                fields.push(format!("{n:>7}"));
            }
        }
        let mut line = fields.join(" ");
        if let Some(name) = name {
            line.push(' ');
            line.push_str(name);
        }
        line.push('\n');
        line
    };
    let mut total = Counts::default();
    let mut out = String::new();
    for file in &files {
        let data = match read_input(&ctx, file).await {
            Ok(data) => data,
            Err(msg) => {
                writeln!(ctx.stderr, "wc: {msg}")?;
                continue;
            }
        };
        let counts = Counts::of(&data);
        total.add(counts);
        out.push_str(&render(counts, (!from_stdin).then_some(file.as_str())));
    }
    if files.len() > 1 {
        out.push_str(&render(total, Some("total")));
    }
    ctx.stdout.write_all(out.as_bytes())?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vsh::{FileSystem, MemFs};

    use super::*;
    use crate::builtins::testing::{args, context};

    #[test]
    fn test_counts() {
        assert_eq!(
            Counts::of(b"hello world\n  two\tlines\n"),
            Counts {
                lines: 2,
                words: 4,
                bytes: 25
            }
        );
        assert_eq!(Counts::of(b""), Counts::default());
    }

    #[tokio::test]
    async fn test_stdin_has_no_name() {
        let (ctx, out, _) = context(&MemFs::new(), "a b\nc\n");
        wc(ctx, args(&["wc"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), "      2       3       6\n");

        let (ctx, out, _) = context(&MemFs::new(), "a b\nc\n");
        wc(ctx, args(&["wc", "-l"])).await.unwrap();
        assert_eq!(out.to_string_lossy(), "      2\n");
    }

    #[tokio::test]
    async fn test_files_and_total() {
        let fs = MemFs::new();
        fs.mkdir_all("/work", 0o755).await.unwrap();
        fs.write_file("/work/a", b"one\n", 0o644).await.unwrap();
        fs.write_file("/work/b", b"two three\n", 0o644).await.unwrap();
        let (ctx, out, _) = context(&fs, "");
        wc(ctx, args(&["wc", "-lw", "a", "b"])).await.unwrap();
        assert_eq!(
            out.to_string_lossy(),
            "      1       1 a\n      1       2 b\n      2       3 total\n"
        );
    }
}
