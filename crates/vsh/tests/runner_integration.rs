//! Integration tests driving the runner through its public API.
//!
//! These tests cover:
//! - Run outcome priority and error surfacing
//! - Reset back to the configured baseline
//! - Subshell and background job isolation
//! - Scripts over disk-backed and snapshot filesystems

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vsh::vfs::snapshot;
use vsh::{
    CommandContext, CommandError, DiskFs, Environ, FileSystem, LineExecutor, MemFs, OutputStream,
    RunError, Runner, SharedBuffer, ShellOpt,
};

async fn quota(_ctx: CommandContext, _args: Vec<String>) -> Result<(), CommandError> {
    Err(CommandError::Status {
        code: 4,
        error: anyhow::anyhow!("quota exceeded"),
    })
}

async fn broken(_ctx: CommandContext, _args: Vec<String>) -> Result<(), CommandError> {
    Err(CommandError::Fatal(anyhow::anyhow!("stream broke")))
}

async fn shell(fs: MemFs) -> (Runner, SharedBuffer, SharedBuffer) {
    let (stdout, out) = OutputStream::buffer();
    let (stderr, err) = OutputStream::buffer();
    let runner = Runner::builder()
        .filesystem(fs)
        .params(["-e", "first"])
        .command("quota", quota)
        .command("broken", broken)
        .stdout(stdout)
        .stderr(stderr)
        .tty(false)
        .build()
        .await
        .expect("build runner");
    (runner, out, err)
}

async fn run(runner: &mut Runner, src: &str) -> Result<(), RunError> {
    let node = LineExecutor::stmt(src).expect("parse");
    runner.run(&CancellationToken::new(), &node).await
}

// =============================================================================
// Run outcomes
// =============================================================================

mod outcomes {
    use super::*;

    #[tokio::test]
    async fn test_handler_error_is_reported_without_halting() {
        let (mut runner, out, _) = shell(MemFs::new()).await;
        let err = run(&mut runner, "set +e; quota; echo still here $?")
            .await
            .expect_err("handler error");
        assert!(matches!(err, RunError::Handler(_)));
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(out.to_string_lossy(), "still here 4\n");
    }

    #[tokio::test]
    async fn test_handler_error_escapes_subshells() {
        for src in [
            "set +e; quota | quota; true",
            "set +e; (quota); true",
            "set +e; x=$(quota); true",
        ] {
            let (mut runner, _, _) = shell(MemFs::new()).await;
            let err = run(&mut runner, src).await.expect_err(src);
            assert!(matches!(err, RunError::Handler(_)), "{src}: {err:?}");
            assert_eq!(err.to_string(), "quota exceeded");
        }
    }

    #[tokio::test]
    async fn test_fatal_error_halts_and_wins() {
        let (mut runner, out, _) = shell(MemFs::new()).await;
        let err = run(&mut runner, "quota; broken; echo unreachable")
            .await
            .expect_err("handler error");
        // errexit stops at `quota`; clear it to reach `broken`.
        assert!(matches!(err, RunError::Handler(_)));

        let err = run(&mut runner, "set +e; quota; broken; echo unreachable")
            .await
            .expect_err("fatal error");
        assert!(matches!(err, RunError::Fatal(_)));
        assert_eq!(err.to_string(), "stream broke");
        assert!(out.contents().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (mut runner, out, _) = shell(MemFs::new()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let node = LineExecutor::stmt("echo never").expect("parse");
        let err = runner.run(&cancel, &node).await.expect_err("cancelled");
        assert_eq!(err.to_string(), "context canceled");
        assert!(out.contents().is_empty());

        // The next run starts clean.
        run(&mut runner, "echo again").await.expect("run");
        assert_eq!(out.to_string_lossy(), "again\n");
    }

    #[tokio::test]
    async fn test_exit_is_per_run() {
        let (mut runner, out, _) = shell(MemFs::new()).await;
        let err = run(&mut runner, "exit 7; echo no").await.expect_err("exit");
        assert_eq!(err.exit_status(), Some(7));
        assert!(runner.exited());

        run(&mut runner, "echo yes").await.expect("run");
        assert!(!runner.exited());
        assert_eq!(out.to_string_lossy(), "yes\n");
    }
}

// =============================================================================
// Reset
// =============================================================================

mod reset {
    use super::*;

    #[tokio::test]
    async fn test_reset_restores_baseline() {
        let fs = MemFs::new();
        fs.mkdir_all("/tmp", 0o755).await.expect("mkdir");
        let (mut runner, _, _) = shell(fs).await;

        run(
            &mut runner,
            "cd /tmp; set +e -- x y; f() { :; }; alias l=ls; v=1; trap 'echo bye' EXIT",
        )
        .await
        .expect("run");
        assert_eq!(runner.dir(), "/tmp");
        assert_eq!(runner.params(), ["x", "y"]);
        assert!(!runner.opt(ShellOpt::ErrExit));

        runner.reset();
        assert_eq!(runner.dir(), "/");
        assert_eq!(runner.params(), ["first"]);
        assert!(runner.opt(ShellOpt::ErrExit));
        assert!(!runner.has_func("f"));
        assert!(runner.alias("l").is_none());
        assert!(runner.env().get("v").is_none());
        assert!(runner.trap(vsh::TrapKind::Exit).is_none());
        assert_eq!(runner.dir_stack(), ["/"]);
    }

    #[tokio::test]
    async fn test_reset_keeps_host_configuration() {
        let (mut runner, out, _) = shell(MemFs::new()).await;
        run(&mut runner, "echo one").await.expect("run");
        runner.reset();
        run(&mut runner, "echo two; quota").await.expect_err("handler");
        assert_eq!(out.to_string_lossy(), "one\ntwo\n");
    }
}

// =============================================================================
// Subshells and background jobs
// =============================================================================

mod isolation {
    use super::*;

    #[tokio::test]
    async fn test_command_substitution_does_not_leak() {
        let (mut runner, out, _) = shell(MemFs::new()).await;
        run(&mut runner, "x=1; y=$(x=2; echo $x); echo $x $y")
            .await
            .expect("run");
        assert_eq!(out.to_string_lossy(), "1 2\n");
    }

    #[tokio::test]
    async fn test_background_scope_is_detached() {
        let (mut runner, out, _) = shell(MemFs::new()).await;
        run(&mut runner, "x=1; { x=2; echo bg $x; } & wait; echo fg $x")
            .await
            .expect("run");
        assert_eq!(out.to_string_lossy(), "bg 2\nfg 1\n");
    }

    #[tokio::test]
    async fn test_children_see_parent_variables() {
        for src in [
            "x=1; (echo $x)",
            "x=1; y=$(echo $x); echo $y",
            "x=1; f() { echo $x; }; f & wait",
        ] {
            let (mut runner, out, _) = shell(MemFs::new()).await;
            run(&mut runner, src).await.expect(src);
            assert_eq!(out.to_string_lossy(), "1\n", "{src}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_background_writers() {
        let fs = MemFs::new();
        fs.mkdir_all("/out", 0o755).await.expect("mkdir");
        let (mut runner, _, _) = shell(fs.clone()).await;

        let script: String = (0..8)
            .map(|i| format!("echo job{i} >/out/{i}.txt &\n"))
            .chain(std::iter::once("wait\n".to_string()))
            .collect();
        run(&mut runner, &script).await.expect("run");

        let entries = fs.read_dir("/out").await.expect("read_dir");
        assert_eq!(entries.len(), 8);
        for i in 0..8 {
            let data = fs.read_file(&format!("/out/{i}.txt")).await.expect("read");
            assert_eq!(data, format!("job{i}\n").into_bytes());
        }
    }
}

// =============================================================================
// Filesystems
// =============================================================================

mod filesystems {
    use super::*;

    #[tokio::test]
    async fn test_script_over_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("bin")).expect("mkdir");
        std::fs::write(dir.path().join("notes.txt"), "from host\n").expect("write");

        let (stdout, out) = OutputStream::buffer();
        let mut runner = Runner::builder()
            .filesystem(DiskFs::new(dir.path()))
            .stdout(stdout)
            .build()
            .await
            .expect("build");
        run(&mut runner, "echo added >>notes.txt; echo *.txt")
            .await
            .expect("run");
        assert_eq!(out.to_string_lossy(), "notes.txt\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).expect("read"),
            "from host\nadded\n"
        );
    }

    #[tokio::test]
    async fn test_snapshot_leaves_host_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("bin")).expect("mkdir");
        std::fs::write(dir.path().join("bin/greet"), "echo hello $1\n").expect("write");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                dir.path().join("bin/greet"),
                std::fs::Permissions::from_mode(0o755),
            )
            .expect("chmod");
        }

        let mirror = snapshot(Arc::new(DiskFs::new(dir.path())))
            .await
            .expect("snapshot");
        let (stdout, out) = OutputStream::buffer();
        let mut runner = Runner::builder()
            .filesystem(mirror.clone())
            .env_vars([("PATH", "/bin")])
            .stdout(stdout)
            .build()
            .await
            .expect("build");

        run(&mut runner, "greet world >/bin/greet.log; echo done")
            .await
            .expect("run");
        assert_eq!(out.to_string_lossy(), "done\n");
        assert_eq!(
            mirror.read_file("/bin/greet.log").await.expect("read"),
            b"hello world\n"
        );
        assert!(!dir.path().join("bin/greet.log").exists());
    }
}
