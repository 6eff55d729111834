//! vsh CLI - run shell code against a virtual filesystem
//!
//! Usage:
//!   vsh -c "command"          Execute a command string
//!   vsh script.sh [more.sh]   Execute script files, each from a clean state
//!   vsh                        Interactive prompt on a terminal, else read stdin

use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vsh::vfs::snapshot;
use vsh::{
    DiskFs, FileSystem, InputStream, LineExecutor, MapEnviron, MemFs, Node, OutputStream,
    RunError, Runner,
};

/// vsh - a shell interpreter whose files live in a virtual filesystem
#[derive(Parser, Debug)]
#[command(name = "vsh")]
#[command(about = "Run shell code against an in-memory or host-backed filesystem")]
struct Args {
    /// Execute this command string
    #[arg(short = 'c', value_name = "COMMAND")]
    command: Option<String>,

    /// Serve files from this host directory instead of an empty memory tree
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Copy --root into memory first so the host is never written
    #[arg(long, requires = "root")]
    snapshot: bool,

    /// Start from the host process environment
    #[arg(long)]
    inherit_env: bool,

    /// Script files on the host, run in order
    scripts: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("vsh: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    let fs: Arc<dyn FileSystem> = match &args.root {
        Some(root) if args.snapshot => Arc::new(
            snapshot(Arc::new(DiskFs::new(root)))
                .await
                .with_context(|| format!("snapshot {}", root.display()))?,
        ),
        Some(root) => Arc::new(DiskFs::new(root)),
        None => Arc::new(MemFs::new()),
    };

    let interactive =
        args.command.is_none() && args.scripts.is_empty() && io::stdin().is_terminal();
    let mut builder = vsh_builtins::install(Runner::builder())
        .filesystem_arc(fs)
        .stdout(OutputStream::stdout())
        .stderr(OutputStream::stderr())
        .tty(interactive);
    if args.inherit_env {
        builder = builder.env(MapEnviron::from_process());
    }
    if args.command.is_some() || !args.scripts.is_empty() {
        builder = builder.stdin(InputStream::new(io::stdin()));
    }
    let mut runner = builder.build().await?;
    let cancel = CancellationToken::new();

    if let Some(command) = &args.command {
        let node = LineExecutor::script("vsh", command)?;
        return Ok(execute(&mut runner, &cancel, &node).await);
    }

    if !args.scripts.is_empty() {
        let mut code = 0;
        for path in &args.scripts {
            let src = std::fs::read_to_string(path)
                .with_context(|| format!("{}", path.display()))?;
            let node = LineExecutor::script(path.display().to_string(), &src)?;
            runner.reset();
            code = execute(&mut runner, &cancel, &node).await;
            if code != 0 {
                break;
            }
        }
        return Ok(code);
    }

    if interactive {
        return repl(&mut runner, &cancel).await;
    }

    let mut src = String::new();
    io::stdin()
        .read_to_string(&mut src)
        .context("failed to read stdin")?;
    let node = LineExecutor::script("vsh", &src)?;
    Ok(execute(&mut runner, &cancel, &node).await)
}

/// Read statements from the terminal until end of input or `exit`.
async fn repl(runner: &mut Runner, cancel: &CancellationToken) -> anyhow::Result<u8> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut pending = String::new();
    let mut code = 0;
    loop {
        prompt(if pending.is_empty() { "$ " } else { "> " })?;
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        pending.push_str(&line);
        pending.push('\n');

        let node = match LineExecutor::stmt(&pending) {
            Ok(node) => node,
            Err(err) if err.is_incomplete() => continue,
            Err(err) => {
                eprintln!("vsh: {err}");
                pending.clear();
                code = 2;
                continue;
            }
        };
        pending.clear();
        code = execute(runner, cancel, &node).await;
        if runner.exited() || runner.fatal_err().is_some() {
            break;
        }
    }
    if !runner.exited() && runner.fatal_err().is_none() {
        // Run the EXIT trap, if any, before leaving.
        let node = LineExecutor::script("vsh", &format!("exit {code}"))?;
        code = execute(runner, cancel, &node).await;
    }
    Ok(code)
}

fn prompt(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}

/// Run `node`, report its outcome and turn it into an exit code.
async fn execute(runner: &mut Runner, cancel: &CancellationToken, node: &Node) -> u8 {
    match runner.run(cancel, node).await {
        Ok(()) => 0,
        Err(RunError::Exit(status)) => status.0,
        Err(err @ RunError::Handler(_)) => {
            eprintln!("vsh: {err}");
            runner.exit_code().max(1)
        }
        Err(err @ RunError::Fatal(_)) => {
            tracing::warn!(error = %err, "interpretation halted");
            eprintln!("vsh: {err}");
            1
        }
    }
}
