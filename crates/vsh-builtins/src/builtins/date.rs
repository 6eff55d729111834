//! date builtin - print the current time

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use vsh::{CommandContext, CommandError};


/// Layout of `date` with no format, as in Unix `date`.
const UNIX_DATE: &str = "%a %b %e %H:%M:%S UTC %Y";

/// `date [-u] [+FORMAT]`
///
/// Time is always reported in UTC; `-u` is accepted for compatibility.
pub async fn date(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    let mut layout = UNIX_DATE.to_string();
    for arg in args.get(1..).unwrap_or_default() {
        if arg == "-u" {
            continue;
        }
        match arg.strip_prefix('+') {
            Some(custom) => layout = custom.to_string(),
            None => {
                writeln!(ctx.stderr, "date: invalid date '{arg}'")?;
                return Ok(());
            }
        }
    }
    match render(Utc::now(), &layout) {
        Some(text) => writeln!(ctx.stdout, "{text}")?,
        None => writeln!(ctx.stderr, "date: invalid format '{layout}'")?,
    }
    Ok(())
}

fn render(now: DateTime<Utc>, layout: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", now.format(layout)).ok()?;
    Some(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use vsh::MemFs;

    use super::*;
    use crate::builtins::testing::{args, context};

    #[test]
    fn test_render_layouts() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(
            render(at, UNIX_DATE).unwrap(),
            "Tue Mar  5 07:08:09 UTC 2024"
        );
        assert_eq!(render(at, "%Y-%m-%d").unwrap(), "2024-03-05");
        assert!(render(at, "%Q").is_none());
    }

    #[tokio::test]
    async fn test_custom_format() {
        let (ctx, out, _) = context(&MemFs::new(), "");
        date(ctx, args(&["date", "-u", "+%Y"])).await.unwrap();
        let year = out.to_string_lossy();
        assert_eq!(year.trim().len(), 4);
        assert!(year.trim().chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_rejects_operand() {
        let (ctx, _, err) = context(&MemFs::new(), "");
        date(ctx, args(&["date", "tomorrow"])).await.unwrap();
        assert_eq!(err.to_string_lossy(), "date: invalid date 'tomorrow'\n");
    }
}
