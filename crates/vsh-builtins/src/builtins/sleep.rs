//! sleep builtin - pause for a duration

use std::time::Duration;

use vsh::{CommandContext, CommandError};


/// `sleep DURATION...`
///
/// Each operand is a number of seconds (`1.5`) or a human-readable duration
/// (`250ms`, `2m`); the total is slept. Cancellation of the run wakes the
/// command early.
pub async fn sleep(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
    if args.len() < 2 {
        writeln!(ctx.stderr, "sleep: missing operand")?;
        return Ok(());
    }
    let mut total = Duration::ZERO;
    for arg in args.get(1..).unwrap_or_default() {
        match parse_interval(arg) {
            Some(d) => total = total.saturating_add(d),
            None => {
                writeln!(ctx.stderr, "sleep: invalid time interval '{arg}'")?;
                return Ok(());
            }
        }
    }
    tokio::select! {
        _ = tokio::time::sleep(total) => Ok(()),
        _ = ctx.cancel.cancelled() => {
            tracing::debug!(?total, "sleep cancelled");
            Ok(())
        }
    }
}

fn parse_interval(arg: &str) -> Option<Duration> {
    if let Ok(secs) = arg.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    humantime::parse_duration(arg).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Instant;

    use vsh::MemFs;

    use super::*;
    use crate::builtins::testing::{args, context};

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_interval("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(parse_interval("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_interval("1m 5s"), Some(Duration::from_secs(65)));
        assert_eq!(parse_interval("-1"), None);
        assert_eq!(parse_interval("soon"), None);
    }

    #[tokio::test]
    async fn test_sleeps_for_total() {
        let (ctx, _, _) = context(&MemFs::new(), "");
        let start = Instant::now();
        sleep(ctx, args(&["sleep", "10ms", "0.01"])).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_cancellation_wakes_early() {
        let (ctx, _, _) = context(&MemFs::new(), "");
        let cancel = ctx.cancel.clone();
        let task = tokio::spawn(sleep(ctx, args(&["sleep", "60"])));
        cancel.cancel();
        let res = task.await.unwrap();
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_interval() {
        let (ctx, _, err) = context(&MemFs::new(), "");
        sleep(ctx, args(&["sleep", "soon"])).await.unwrap();
        assert_eq!(err.to_string_lossy(), "sleep: invalid time interval 'soon'\n");
    }
}
