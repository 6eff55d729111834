//! The interpreter state machine.
//!
//! A [`Runner`] owns everything a running script can change: variables,
//! functions, options, positional parameters, the working directory, traps and
//! background jobs. It does not know the shape of the statements it runs;
//! those are opaque [`Body`] values handed to an [`Executor`].

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, CommandContext, CommandError};
use crate::dispatch::{self, CommandRegistry, Resolved};
use crate::env::{EnvError, Environ, MapEnviron, Overlay, Variable};
use crate::interp::LineExecutor;
use crate::io::{InputStream, OutputStream};
use crate::options::{ParamsError, ShellOpt, ShellOpts, parse_params};
use crate::path;
use crate::vfs::{FileSystem, FsError, MemFs};

/// An opaque statement tree, produced and consumed by an [`Executor`].
#[derive(Clone)]
pub struct Body(Arc<dyn Any + Send + Sync>);

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

impl Body {
    /// Wrap a statement tree.
    pub fn new<T: Any + Send + Sync>(tree: T) -> Self {
        Self(Arc::new(tree))
    }

    /// Borrow the tree if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

/// A unit handed to [`Runner::run`].
#[derive(Debug, Clone)]
pub enum Node {
    /// A whole script; running it implies an exit at the end.
    Script {
        /// Name reported as `$0`.
        name: String,
        /// The statements.
        body: Body,
    },
    /// A single statement or statement list, run incrementally.
    Stmt(Body),
    /// A single command.
    Command(Body),
}

/// Executes statement trees against a runner.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    /// Execute `body`, updating the runner's state and exit status.
    async fn execute(&self, runner: &mut Runner, body: &Body);

    /// Execute the file at `path`, found through `PATH`. `args[0]` is the
    /// name it was invoked as.
    async fn exec_file(&self, runner: &mut Runner, path: &str, args: Vec<String>) {
        let _ = args;
        runner.errf(format_args!("{path}: cannot execute\n"));
        runner.set_exit(126);
    }
}

/// A non-zero exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("exit status {0}")]
pub struct ExitStatus(pub u8);

/// Outcome of [`Runner::run`] other than success, in priority order.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// Interpretation was halted.
    #[error("{0}")]
    Fatal(Arc<anyhow::Error>),
    /// A command failed with an error that did not halt interpretation.
    #[error("{0}")]
    Handler(Arc<anyhow::Error>),
    /// The last command exited with a non-zero status.
    #[error(transparent)]
    Exit(#[from] ExitStatus),
}

impl RunError {
    /// The exit status, if this is one.
    pub fn exit_status(&self) -> Option<u8> {
        match self {
            Self::Exit(ExitStatus(code)) => Some(*code),
            _ => None,
        }
    }
}

/// Errors from [`RunnerBuilder::build`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The working directory could not be read.
    #[error("could not stat {path}: {source}")]
    Dir {
        /// The directory.
        path: String,
        /// Why.
        #[source]
        source: FsError,
    },
    /// The working directory is a file.
    #[error("{0} is not a directory")]
    NotADirectory(String),
    /// The options and parameters did not parse.
    #[error(transparent)]
    Params(#[from] ParamsError),
}

/// Identifier of a background job, shown as `g1`, `g2`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(usize);

impl JobId {
    /// Parse the `gN` form.
    pub fn parse(s: &str) -> Option<Self> {
        let n: usize = s.strip_prefix('g')?.parse().ok()?;
        (n > 0).then_some(Self(n))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug)]
struct BgJob {
    id: JobId,
    /// Holds `Some(status)` once the job finished.
    done: watch::Receiver<Option<u8>>,
}

/// Which trap a callback is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// Runs when the shell exits.
    Exit,
    /// Runs after a command fails.
    Err,
}

/// A trap callback.
#[derive(Debug, Clone)]
pub struct Trap {
    /// The source text, for listing.
    pub source: String,
    /// The parsed callback.
    pub body: Body,
}

#[derive(Debug, Clone, Default)]
struct Traps {
    exit: Option<Trap>,
    err: Option<Trap>,
}

/// Host-injected configuration, preserved across resets.
#[derive(Clone)]
struct Config {
    env: Arc<dyn Environ>,
    tty: bool,
    fs: Arc<dyn FileSystem>,
    commands: Arc<CommandRegistry>,
    executor: Arc<dyn Executor>,
}

/// State captured on the first reset and restored by every reset.
#[derive(Clone)]
struct Baseline {
    dir: String,
    params: Vec<String>,
    opts: ShellOpts,
    stdin: Option<InputStream>,
    stdout: OutputStream,
    stderr: OutputStream,
}

/// Interprets statement trees.
///
/// A runner can be reused for many [`Runner::run`] calls, keeping its state
/// between them. It must not be driven concurrently; use
/// [`Runner::subshell`] to get an independent copy.
pub struct Runner {
    config: Config,
    baseline: Option<Baseline>,
    did_reset: bool,

    overlay: Arc<Overlay>,
    vars: BTreeMap<String, Variable>,
    funcs: HashMap<String, Body>,
    aliases: HashMap<String, String>,
    traps: Traps,

    dir: String,
    dir_stack: Vec<String>,
    params: Vec<String>,
    opts: ShellOpts,
    filename: Option<String>,

    stdin: Option<InputStream>,
    stdout: OutputStream,
    stderr: OutputStream,

    cancel: CancellationToken,

    exit: u8,
    last_exit: u8,
    fatal: Option<Arc<anyhow::Error>>,
    handler_err: Option<Arc<anyhow::Error>>,
    returning: bool,
    exiting: bool,
    handling_trap: bool,

    jobs: Vec<BgJob>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("dir", &self.dir)
            .field("params", &self.params)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Start configuring a runner.
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    fn fresh(config: Config, baseline: Baseline) -> Self {
        let overlay = Arc::new(Overlay::new(Arc::clone(&config.env)));
        Self {
            config,
            baseline: None,
            did_reset: false,
            overlay,
            vars: BTreeMap::new(),
            funcs: HashMap::new(),
            aliases: HashMap::new(),
            traps: Traps::default(),
            dir_stack: Vec::new(),
            dir: baseline.dir,
            params: baseline.params,
            opts: baseline.opts,
            filename: None,
            stdin: baseline.stdin,
            stdout: baseline.stdout,
            stderr: baseline.stderr,
            cancel: CancellationToken::new(),
            exit: 0,
            last_exit: 0,
            fatal: None,
            handler_err: None,
            returning: false,
            exiting: false,
            handling_trap: false,
            jobs: Vec::new(),
        }
    }

    fn current_baseline(&self) -> Baseline {
        Baseline {
            dir: self.dir.clone(),
            params: self.params.clone(),
            opts: self.opts,
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }

    /// Return the runner to its state right before the first run.
    ///
    /// The first call records the directory, parameters, options and streams
    /// as the baseline. Every call rebuilds the state from that baseline,
    /// keeping the filesystem, command registry, TTY flag and base
    /// environment, and seeds the default variables.
    pub fn reset(&mut self) {
        let baseline = match &self.baseline {
            Some(baseline) => baseline.clone(),
            None => self.current_baseline(),
        };
        let cancel = self.cancel.clone();
        *self = Self::fresh(self.config.clone(), baseline.clone());
        self.baseline = Some(baseline);
        self.cancel = cancel;

        if self.overlay.get("HOME").is_none() {
            self.seed("HOME", Variable::new("/"));
        }
        for name in ["UID", "EUID", "GID"] {
            if self.overlay.get(name).is_none() {
                self.seed(name, Variable::new("0").read_only());
            }
        }
        self.seed("PWD", Variable::exported(self.dir.clone()));
        self.seed("IFS", Variable::new(" \t\n"));
        self.seed("OPTIND", Variable::new("1"));
        self.dir_stack.push(self.dir.clone());
        self.did_reset = true;
        tracing::debug!(dir = %self.dir, "runner reset");
    }

    fn seed(&mut self, name: &str, var: Variable) {
        if let Err(err) = self.overlay.set(name, var) {
            tracing::debug!(%err, "keeping inherited variable");
        }
    }

    /// Run `node` and reconcile its outcome.
    ///
    /// Returns, in order of priority: the fatal error, the non-fatal command
    /// error, or the non-zero exit status of the last command.
    pub async fn run(&mut self, cancel: &CancellationToken, node: &Node) -> Result<(), RunError> {
        if !self.did_reset {
            self.reset();
        }
        self.cancel = cancel.clone();
        self.fatal = None;
        self.handler_err = None;
        self.returning = false;
        self.exiting = false;
        self.filename = None;
        tracing::debug!("run start");

        match node {
            Node::Script { name, body } => {
                self.filename = Some(name.clone());
                self.execute(body).await;
                if !self.exiting {
                    self.exit_shell(self.exit).await;
                }
            }
            Node::Stmt(body) | Node::Command(body) => self.execute(body).await,
        }

        self.vars = self.overlay.to_map();
        self.last_exit = self.exit;
        tracing::debug!(exit = self.exit, exited = self.exiting, "run finished");

        if let Some(err) = &self.fatal {
            tracing::warn!(error = %err, "run halted");
            return Err(RunError::Fatal(Arc::clone(err)));
        }
        if let Some(err) = &self.handler_err {
            return Err(RunError::Handler(Arc::clone(err)));
        }
        if self.exit != 0 {
            return Err(ExitStatus(self.exit).into());
        }
        Ok(())
    }

    /// Hand `body` to the executor.
    pub async fn execute(&mut self, body: &Body) {
        let executor = Arc::clone(&self.config.executor);
        executor.execute(self, body).await;
    }

    /// Whether the last run asked the whole shell to exit.
    pub fn exited(&self) -> bool {
        self.exiting
    }

    /// The fatal error of the last run, if any.
    pub fn fatal_err(&self) -> Option<Arc<anyhow::Error>> {
        self.fatal.clone()
    }

    /// Make an independent copy of this runner.
    ///
    /// The copy shares the filesystem and command registry, copies
    /// functions, aliases and the directory stack, and writes variables to a
    /// fresh scope. A `background` copy detaches that scope from this
    /// runner's so both may run at the same time. The copy starts with no
    /// background jobs and no traps.
    pub fn subshell(&mut self, background: bool) -> Runner {
        if !self.did_reset {
            self.reset();
        }
        let overlay = if background {
            Overlay::detached(self.overlay.as_ref())
        } else {
            Overlay::new(Arc::clone(&self.overlay) as Arc<dyn Environ>)
        };
        Runner {
            config: self.config.clone(),
            baseline: self.baseline.clone(),
            did_reset: true,
            overlay: Arc::new(overlay),
            vars: BTreeMap::new(),
            funcs: self.funcs.clone(),
            aliases: self.aliases.clone(),
            traps: Traps::default(),
            dir: self.dir.clone(),
            dir_stack: self.dir_stack.clone(),
            params: self.params.clone(),
            opts: self.opts,
            filename: self.filename.clone(),
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            cancel: self.cancel.clone(),
            exit: self.exit,
            last_exit: self.last_exit,
            fatal: None,
            handler_err: None,
            returning: false,
            exiting: false,
            handling_trap: false,
            jobs: Vec::new(),
        }
    }

    /// Run `body` in a foreground subshell, as `( ... )` does.
    pub async fn run_subshell(&mut self, body: &Body) {
        let mut sub = self.subshell(false);
        sub.execute(body).await;
        self.absorb(&sub);
    }

    /// Run `body` in a subshell and return its standard output with trailing
    /// newlines removed, as `$( ... )` does.
    pub async fn capture(&mut self, body: &Body) -> String {
        let mut sub = self.subshell(false);
        let (stdout, buffer) = OutputStream::buffer();
        sub.stdout = stdout;
        sub.execute(body).await;
        self.absorb(&sub);
        let mut out = buffer.to_string_lossy();
        out.truncate(out.trim_end_matches('\n').len());
        out
    }

    /// Take the exit status and any errors of a finished subshell. Errors
    /// already recorded here win over the subshell's.
    pub fn absorb(&mut self, sub: &Runner) {
        self.exit = sub.exit;
        if self.fatal.is_none() {
            self.fatal = sub.fatal.clone();
        }
        if self.handler_err.is_none() {
            self.handler_err = sub.handler_err.clone();
        }
    }

    /// Start `body` in a background subshell.
    pub fn background(&mut self, body: Body) -> JobId {
        let mut sub = self.subshell(true);
        let (tx, rx) = watch::channel(None);
        let id = JobId(self.jobs.len() + 1);
        tokio::spawn(async move {
            sub.execute(&body).await;
            tracing::debug!(job = %id, exit = sub.exit, "background job finished");
            let _ = tx.send(Some(sub.exit));
        });
        tracing::debug!(job = %id, "background job started");
        self.jobs.push(BgJob { id, done: rx });
        self.seed("!", Variable::new(id.to_string()));
        id
    }

    /// Wait for one background job, or all of them.
    ///
    /// Returns the job's exit status, 0 when waiting for all, or 127 for an
    /// unknown job.
    pub async fn wait(&mut self, job: Option<JobId>) -> u8 {
        let receivers: Vec<_> = match job {
            Some(id) => match self.jobs.iter().find(|j| j.id == id) {
                Some(job) => vec![job.done.clone()],
                None => return 127,
            },
            None => self.jobs.iter().map(|j| j.done.clone()).collect(),
        };
        let mut status = 0;
        for mut rx in receivers {
            let code = match rx.wait_for(Option::is_some).await {
                Ok(code) => code.unwrap_or(1),
                Err(_) => 1,
            };
            status = code;
        }
        if job.is_none() { 0 } else { status }
    }

    /// Run a command by name: functions first, then registered commands,
    /// then `PATH`.
    pub async fn call(&mut self, args: Vec<String>) {
        let Some(name) = args.first().cloned() else {
            return;
        };
        if self.opts.get(ShellOpt::XTrace) {
            self.errf(format_args!("+ {}\n", args.join(" ")));
        }
        if let Some(body) = self.funcs.get(&name).cloned() {
            let saved = std::mem::replace(&mut self.params, args[1..].to_vec());
            self.execute(&body).await;
            self.params = saved;
            self.returning = false;
            return;
        }
        let resolved = dispatch::resolve(
            &self.config.commands,
            self.config.fs.as_ref(),
            self.overlay.as_ref(),
            &self.dir,
            &name,
        )
        .await;
        match resolved {
            Ok(Resolved::Builtin(command)) => {
                let outcome = command.run(self.command_context(), args).await;
                self.record(outcome);
            }
            Ok(Resolved::Executable(path)) => {
                let executor = Arc::clone(&self.config.executor);
                executor.exec_file(self, &path, args).await;
            }
            Err(_) => {
                self.errf(format_args!("{name}: command not found\n"));
                self.exit = 127;
            }
        }
    }

    fn record(&mut self, outcome: Result<(), CommandError>) {
        match outcome {
            Ok(()) => self.exit = 0,
            Err(CommandError::Exit(code)) => self.exit = code,
            Err(CommandError::Status { code, error }) => {
                self.exit = code;
                self.handler_err.get_or_insert_with(|| Arc::new(error));
            }
            Err(CommandError::Fatal(err)) => self.set_fatal(err),
        }
    }

    /// The context handed to registered commands.
    pub fn command_context(&self) -> CommandContext {
        CommandContext {
            cancel: self.cancel.clone(),
            env: Arc::clone(&self.overlay) as Arc<dyn Environ>,
            fs: Arc::clone(&self.config.fs),
            commands: Arc::clone(&self.config.commands),
            tty: self.config.tty,
            dir: self.dir.clone(),
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }

    /// Run the exit-time hooks and mark the shell as exiting with `code`.
    pub async fn exit_shell(&mut self, code: u8) {
        if code != 0 {
            self.run_trap(TrapKind::Err).await;
        }
        self.run_trap(TrapKind::Exit).await;
        self.exiting = true;
        self.exit = code;
    }

    /// Run a trap callback. Callbacks never trigger other callbacks, and the
    /// exit status is preserved across them.
    pub async fn run_trap(&mut self, kind: TrapKind) {
        let trap = match kind {
            TrapKind::Exit => self.traps.exit.clone(),
            TrapKind::Err => self.traps.err.clone(),
        };
        let Some(trap) = trap else {
            return;
        };
        if self.handling_trap {
            return;
        }
        self.handling_trap = true;
        let saved = self.exit;
        self.execute(&trap.body).await;
        self.exit = saved;
        self.handling_trap = false;
    }

    /// Set or clear a trap.
    pub fn set_trap(&mut self, kind: TrapKind, trap: Option<Trap>) {
        match kind {
            TrapKind::Exit => self.traps.exit = trap,
            TrapKind::Err => self.traps.err = trap,
        }
    }

    /// The trap registered for `kind`.
    pub fn trap(&self, kind: TrapKind) -> Option<&Trap> {
        match kind {
            TrapKind::Exit => self.traps.exit.as_ref(),
            TrapKind::Err => self.traps.err.as_ref(),
        }
    }

    /// Whether the current statement list should stop: after a fatal error,
    /// an exit, a return, or cancellation. Cancellation is recorded as a
    /// fatal error the first time it is seen.
    pub fn should_stop(&mut self) -> bool {
        if self.fatal.is_none() && self.cancel.is_cancelled() {
            self.fatal = Some(Arc::new(anyhow::anyhow!("context canceled")));
        }
        self.fatal.is_some() || self.exiting || self.returning
    }

    /// Record an error that halts interpretation.
    pub fn set_fatal(&mut self, err: anyhow::Error) {
        tracing::warn!(error = %err, "fatal error");
        self.exit = 1;
        self.fatal = Some(Arc::new(err));
    }

    /// Mark the current function or sourced file as returning.
    pub fn set_returning(&mut self, returning: bool) {
        self.returning = returning;
    }

    /// Whether a `return` is unwinding.
    pub fn returning(&self) -> bool {
        self.returning
    }

    // ==================== status ====================

    /// The status of the last command.
    pub fn exit_code(&self) -> u8 {
        self.exit
    }

    /// Set the status of the current command.
    pub fn set_exit(&mut self, code: u8) {
        self.exit = code;
    }

    /// The status `$?` reports.
    pub fn last_exit(&self) -> u8 {
        self.last_exit
    }

    /// Record the current status as `$?` before starting a new command.
    pub fn start_command(&mut self) {
        self.last_exit = self.exit;
    }

    // ==================== variables ====================

    /// The variable snapshot taken at the end of the last run.
    pub fn vars(&self) -> &BTreeMap<String, Variable> {
        &self.vars
    }

    /// The live variable scope.
    pub fn env(&self) -> Arc<Overlay> {
        Arc::clone(&self.overlay)
    }

    /// Look up a variable, including the special parameters `?`, `#`, `@`,
    /// `*`, `-`, `0` and positional parameters.
    pub fn lookup_var(&self, name: &str) -> Option<String> {
        match name {
            "?" => return Some(self.last_exit.to_string()),
            "#" => return Some(self.params.len().to_string()),
            "@" | "*" => return Some(self.params.join(" ")),
            "-" => return Some(self.opts.flags()),
            "0" => return Some(self.filename.clone().unwrap_or_else(|| "vsh".into())),
            _ => {}
        }
        if let Ok(n) = name.parse::<usize>() {
            return self.params.get(n.checked_sub(1)?).cloned();
        }
        self.overlay.get(name).map(|v| v.value)
    }

    /// Assign a variable, keeping its export flag. With `allexport` on the
    /// variable is exported.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) -> Result<(), EnvError> {
        let exported = self.opts.get(ShellOpt::AllExport)
            || self.overlay.get(name).is_some_and(|v| v.exported);
        self.overlay.set(
            name,
            Variable {
                value: value.into(),
                exported,
                read_only: false,
            },
        )
    }

    /// Assign a variable with explicit flags.
    pub fn set_var_full(&mut self, name: &str, var: Variable) -> Result<(), EnvError> {
        self.overlay.set(name, var)
    }

    /// Unset a variable in the current scope.
    pub fn unset_var(&mut self, name: &str) -> Result<(), EnvError> {
        self.overlay.unset(name)
    }

    // ==================== functions and aliases ====================

    /// Define a function.
    pub fn set_func(&mut self, name: impl Into<String>, body: Body) {
        self.funcs.insert(name.into(), body);
    }

    /// Remove a function, returning whether it existed.
    pub fn unset_func(&mut self, name: &str) -> bool {
        self.funcs.remove(name).is_some()
    }

    /// Whether a function is defined.
    pub fn has_func(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// Define an alias.
    pub fn set_alias(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.aliases.insert(name.into(), value.into());
    }

    /// Remove an alias, returning whether it existed.
    pub fn unset_alias(&mut self, name: &str) -> bool {
        self.aliases.remove(name).is_some()
    }

    /// The text of an alias.
    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// All aliases, sorted by name.
    pub fn aliases(&self) -> Vec<(String, String)> {
        let mut all: Vec<_> = self
            .aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort();
        all
    }

    // ==================== options and parameters ====================

    /// Enabled options.
    pub fn opts(&self) -> ShellOpts {
        self.opts
    }

    /// Whether `opt` is on.
    pub fn opt(&self, opt: ShellOpt) -> bool {
        self.opts.get(opt)
    }

    /// Positional parameters.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Replace the positional parameters.
    pub fn replace_params(&mut self, params: Vec<String>) -> Vec<String> {
        std::mem::replace(&mut self.params, params)
    }

    /// Apply `set`-style arguments. The returned text is any requested
    /// option report.
    pub fn set_params<S: AsRef<str>>(&mut self, args: &[S]) -> Result<String, ParamsError> {
        let update = parse_params(args)?;
        Ok(update.apply(&mut self.opts, &mut self.params))
    }

    /// Name of the running script, if any.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Set the name reported as `$0`.
    pub fn set_filename(&mut self, name: Option<String>) {
        self.filename = name;
    }

    // ==================== directories ====================

    /// The current directory.
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// The directory stack, bottom first. The last entry is the current
    /// directory.
    pub fn dir_stack(&self) -> &[String] {
        &self.dir_stack
    }

    async fn check_dir(&self, path: &str) -> Result<String, FsError> {
        let target = path::abs(&self.dir, path);
        let meta = match self.config.fs.stat(&target).await {
            Ok(meta) => meta,
            Err(FsError::NotExist { .. }) => {
                return Err(FsError::NotExist {
                    op: "chdir",
                    path: target,
                });
            }
            Err(err) => return Err(err),
        };
        if !meta.is_dir {
            return Err(FsError::Invalid {
                op: "chdir",
                path: target,
            });
        }
        Ok(target)
    }

    fn enter(&mut self, target: String) {
        let old = std::mem::replace(&mut self.dir, target);
        self.seed("OLDPWD", Variable::exported(old));
        self.seed("PWD", Variable::exported(self.dir.clone()));
    }

    /// Change the current directory.
    pub async fn change_dir(&mut self, path: &str) -> Result<(), FsError> {
        let target = self.check_dir(path).await?;
        self.enter(target.clone());
        match self.dir_stack.last_mut() {
            Some(top) => *top = target,
            None => self.dir_stack.push(target),
        }
        Ok(())
    }

    /// Change directory and push it on the stack.
    pub async fn push_dir(&mut self, path: &str) -> Result<(), FsError> {
        let target = self.check_dir(path).await?;
        self.enter(target.clone());
        self.dir_stack.push(target);
        Ok(())
    }

    /// Pop the stack and change to the new top. Returns `false` when there
    /// is nothing to pop.
    pub async fn pop_dir(&mut self) -> Result<bool, FsError> {
        if self.dir_stack.len() < 2 {
            return Ok(false);
        }
        self.dir_stack.pop();
        let Some(top) = self.dir_stack.last().cloned() else {
            return Ok(false);
        };
        let target = self.check_dir(&top).await?;
        self.enter(target);
        Ok(true)
    }

    // ==================== resources ====================

    /// The filesystem.
    pub fn fs(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.config.fs)
    }

    /// The registered commands.
    pub fn commands(&self) -> &CommandRegistry {
        &self.config.commands
    }

    /// Whether the shell is attached to a terminal.
    pub fn tty(&self) -> bool {
        self.config.tty
    }

    /// The cancellation token of the current run.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Standard input.
    pub fn stdin(&self) -> Option<InputStream> {
        self.stdin.clone()
    }

    /// Standard output.
    pub fn stdout(&self) -> OutputStream {
        self.stdout.clone()
    }

    /// Standard error.
    pub fn stderr(&self) -> OutputStream {
        self.stderr.clone()
    }

    /// Replace standard input, returning the previous one.
    pub fn replace_stdin(&mut self, stdin: Option<InputStream>) -> Option<InputStream> {
        std::mem::replace(&mut self.stdin, stdin)
    }

    /// Replace standard output, returning the previous one.
    pub fn replace_stdout(&mut self, stdout: OutputStream) -> OutputStream {
        std::mem::replace(&mut self.stdout, stdout)
    }

    /// Replace standard error, returning the previous one.
    pub fn replace_stderr(&mut self, stderr: OutputStream) -> OutputStream {
        std::mem::replace(&mut self.stderr, stderr)
    }

    /// Write to standard output. A broken stream halts interpretation.
    pub fn outf(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = self.stdout.write_fmt(args) {
            self.set_fatal(err.into());
        }
    }

    /// Write to standard error. A broken stream halts interpretation.
    pub fn errf(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = self.stderr.write_fmt(args) {
            self.set_fatal(err.into());
        }
    }
}

/// Configures and builds a [`Runner`].
pub struct RunnerBuilder {
    fs: Option<Arc<dyn FileSystem>>,
    dir: String,
    env: Option<Arc<dyn Environ>>,
    params: Vec<String>,
    commands: CommandRegistry,
    stdin: Option<InputStream>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    tty: bool,
    executor: Option<Arc<dyn Executor>>,
}

impl fmt::Debug for RunnerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerBuilder")
            .field("dir", &self.dir)
            .field("params", &self.params)
            .field("tty", &self.tty)
            .finish_non_exhaustive()
    }
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerBuilder {
    /// Defaults: an empty in-memory filesystem, directory `/`, a TTY, no
    /// commands, an empty environment and discarded output.
    pub fn new() -> Self {
        Self {
            fs: None,
            dir: "/".to_string(),
            env: None,
            params: Vec::new(),
            commands: CommandRegistry::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            tty: true,
            executor: None,
        }
    }

    /// Use `fs` as the filesystem.
    pub fn filesystem(mut self, fs: impl FileSystem + 'static) -> Self {
        self.fs = Some(Arc::new(fs));
        self
    }

    /// Use an already shared filesystem.
    pub fn filesystem_arc(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Start in `dir`, resolved against `/`.
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Use `env` as the immutable base environment.
    pub fn env(mut self, env: impl Environ + 'static) -> Self {
        self.env = Some(Arc::new(env));
        self
    }

    /// Use exported `pairs` as the base environment.
    pub fn env_vars<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env(MapEnviron::new(pairs))
    }

    /// Initial options and parameters, as given to `set`.
    pub fn params<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = args.into_iter().map(Into::into).collect();
        self
    }

    /// Register a command.
    pub fn command(mut self, name: impl Into<String>, command: impl Command + 'static) -> Self {
        self.commands.insert(name, command);
        self
    }

    /// Register every command of `commands`.
    pub fn commands(mut self, commands: &CommandRegistry) -> Self {
        self.commands.extend(commands);
        self
    }

    /// Set all three standard streams.
    pub fn stdio(
        mut self,
        stdin: Option<InputStream>,
        stdout: OutputStream,
        stderr: OutputStream,
    ) -> Self {
        self.stdin = stdin;
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self
    }

    /// Set standard input.
    pub fn stdin(mut self, stdin: InputStream) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Set standard output.
    pub fn stdout(mut self, stdout: OutputStream) -> Self {
        self.stdout = Some(stdout);
        self
    }

    /// Set standard error.
    pub fn stderr(mut self, stderr: OutputStream) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Whether the shell is attached to a terminal.
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Use a custom statement executor.
    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Validate the configuration and build the runner.
    pub async fn build(self) -> Result<Runner, ConfigError> {
        let fs = self.fs.unwrap_or_else(|| Arc::new(MemFs::new()));
        let dir = path::abs("/", &self.dir);
        let meta = fs.stat(&dir).await.map_err(|source| ConfigError::Dir {
            path: dir.clone(),
            source,
        })?;
        if !meta.is_dir {
            return Err(ConfigError::NotADirectory(dir));
        }

        let mut opts = ShellOpts::default();
        let mut params = Vec::new();
        if !self.params.is_empty() {
            parse_params(&self.params)?.apply(&mut opts, &mut params);
        }

        let config = Config {
            env: self
                .env
                .unwrap_or_else(|| Arc::new(MapEnviron::default())),
            tty: self.tty,
            fs,
            commands: Arc::new(self.commands),
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(LineExecutor::new())),
        };
        let baseline = Baseline {
            dir,
            params,
            opts,
            stdin: self.stdin,
            stdout: self.stdout.unwrap_or_else(OutputStream::discard),
            stderr: self.stderr.unwrap_or_else(OutputStream::discard),
        };
        Ok(Runner::fresh(config, baseline))
    }
}
