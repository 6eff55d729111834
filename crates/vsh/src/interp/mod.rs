//! The default [`Executor`]: a line-oriented interpreter for a small POSIX
//! shell subset.
//!
//! Scripts are parsed by [`parse`] into a [`Program`] and wrapped in a
//! [`Body`]. Execution walks the tree against a [`Runner`], which owns all
//! shell state; this module is stateless.
//!
//! Pipelines run their stages one after another, each in a subshell, handing
//! the buffered output of a stage to the next as its input. Output
//! redirections to files are buffered for the duration of the command and
//! written when it finishes.

mod builtins;
mod parse;

use std::mem;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use glob::Pattern;
use thiserror::Error;

use crate::env::{Environ, Variable};
use crate::io::{InputStream, OutputStream, SharedBuffer};
use crate::options::ShellOpt;
use crate::path;
use crate::runner::{Body, Executor, Node, Runner, TrapKind};
use crate::vfs::{FileHandle, OpenFlags};

pub use parse::{ParseError, Program, parse};

use parse::{AndOr, Cmd, Connector, Part, Pipeline, RedirOp, Redirect, Simple, Word};

/// Interprets trees produced by [`parse`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LineExecutor;

impl LineExecutor {
    /// Create the executor.
    pub fn new() -> Self {
        Self
    }

    /// Parse `src` as a whole script called `name`. Running it implies an
    /// exit at the end, so `EXIT` traps fire.
    pub fn script(name: impl Into<String>, src: &str) -> Result<Node, ParseError> {
        Ok(Node::Script {
            name: name.into(),
            body: Body::new(parse(src)?),
        })
    }

    /// Parse `src` as one or more statements to run interactively.
    pub fn stmt(src: &str) -> Result<Node, ParseError> {
        Ok(Node::Stmt(Body::new(parse(src)?)))
    }

    /// A single command whose arguments are taken literally, with no
    /// expansion.
    pub fn command<I, S>(args: I) -> Node
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words = args
            .into_iter()
            .map(|arg| Word(vec![Part::Quoted(arg.into())]))
            .collect();
        let simple = Simple {
            words,
            ..Simple::default()
        };
        Node::Command(Body::new(Program::single(AndOr {
            first: Pipeline {
                negated: false,
                commands: vec![Cmd::Simple(simple)],
            },
            rest: Vec::new(),
        })))
    }
}

#[async_trait]
impl Executor for LineExecutor {
    async fn execute(&self, runner: &mut Runner, body: &Body) {
        if let Some(program) = body.downcast_ref::<Program>() {
            exec_program(runner, program).await;
        } else if let Some(cmd) = body.downcast_ref::<Cmd>() {
            exec_command(runner, cmd).await;
        } else {
            runner.set_fatal(anyhow::anyhow!(
                "statement tree was not produced by the line parser"
            ));
        }
    }

    async fn exec_file(&self, runner: &mut Runner, path: &str, args: Vec<String>) {
        let src = match runner.fs().read_file(path).await {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(err) => {
                runner.errf(format_args!("vsh: {err}\n"));
                runner.set_exit(126);
                return;
            }
        };
        let program = match parse(&src) {
            Ok(program) => program,
            Err(err) => {
                runner.errf(format_args!("{path}: {err}\n"));
                runner.set_exit(2);
                return;
            }
        };
        tracing::debug!(path, "executing script file");
        let mut sub = runner.subshell(false);
        sub.replace_params(args.into_iter().skip(1).collect());
        sub.set_filename(Some(path.to_string()));
        exec_program(&mut sub, &program).await;
        runner.absorb(&sub);
    }
}

fn exec_program<'a>(r: &'a mut Runner, program: &'a Program) -> BoxFuture<'a, ()> {
    async move {
        for item in &program.items {
            if r.should_stop() {
                break;
            }
            if item.background {
                r.start_command();
                r.background(Body::new(Program::single(item.and_or.clone())));
                r.set_exit(0);
                continue;
            }
            exec_and_or(r, &item.and_or).await;
        }
    }
    .boxed()
}

async fn exec_and_or(r: &mut Runner, list: &AndOr) {
    exec_pipeline(r, &list.first).await;
    // Only the final pipeline of a list can trigger errexit or the ERR trap.
    let mut final_ran = list.rest.is_empty();
    let mut negated = list.first.negated;
    for (i, (connector, pipeline)) in list.rest.iter().enumerate() {
        if r.should_stop() {
            return;
        }
        let run = match connector {
            Connector::And => r.exit_code() == 0,
            Connector::Or => r.exit_code() != 0,
        };
        if run {
            exec_pipeline(r, pipeline).await;
            negated = pipeline.negated;
            final_ran = i + 1 == list.rest.len();
        }
    }
    let code = r.exit_code();
    if code == 0 || !final_ran || negated || r.should_stop() {
        return;
    }
    if r.opt(ShellOpt::ErrExit) {
        r.exit_shell(code).await;
    } else {
        r.run_trap(TrapKind::Err).await;
    }
}

async fn exec_pipeline(r: &mut Runner, pipeline: &Pipeline) {
    if r.opt(ShellOpt::NoExec) {
        return;
    }
    if let [cmd] = pipeline.commands.as_slice() {
        exec_command(r, cmd).await;
    } else {
        let mut input = r.stdin();
        let mut statuses = Vec::with_capacity(pipeline.commands.len());
        for (i, cmd) in pipeline.commands.iter().enumerate() {
            let mut stage = r.subshell(false);
            stage.replace_stdin(input.take());
            let buffer = if i + 1 < pipeline.commands.len() {
                let (stdout, buffer) = OutputStream::buffer();
                stage.replace_stdout(stdout);
                Some(buffer)
            } else {
                None
            };
            exec_command(&mut stage, cmd).await;
            statuses.push(stage.exit_code());
            r.absorb(&stage);
            if r.fatal_err().is_some() {
                return;
            }
            input = buffer.map(|b| InputStream::from_bytes(b.take()));
        }
        let status = if r.opt(ShellOpt::PipeFail) {
            statuses.iter().rev().find(|s| **s != 0).copied().unwrap_or(0)
        } else {
            statuses.last().copied().unwrap_or(0)
        };
        r.set_exit(status);
    }
    if pipeline.negated {
        let code = r.exit_code();
        r.set_exit(u8::from(code == 0));
    }
}

fn exec_command<'a>(r: &'a mut Runner, cmd: &'a Cmd) -> BoxFuture<'a, ()> {
    async move {
        match cmd {
            Cmd::Simple(simple) => exec_simple(r, simple).await,
            Cmd::Subshell(body, redirects) => {
                let Some(saved) = open_redirects(r, redirects).await else {
                    return;
                };
                r.run_subshell(&Body::new(body.clone())).await;
                close_redirects(r, saved).await;
            }
            Cmd::Group(body, redirects) => {
                let Some(saved) = open_redirects(r, redirects).await else {
                    return;
                };
                exec_program(r, body).await;
                close_redirects(r, saved).await;
            }
            Cmd::FuncDef(name, body) => {
                r.set_func(name.clone(), Body::new(Cmd::clone(body)));
                r.set_exit(0);
            }
        }
    }
    .boxed()
}

async fn exec_simple(r: &mut Runner, simple: &Simple) {
    r.start_command();
    let mut args = Vec::new();
    for word in &simple.words {
        match expand_fields(r, word).await {
            Ok(fields) => args.extend(fields),
            Err(err) => return expand_failed(r, err),
        }
    }

    if args.is_empty() {
        r.set_exit(0);
        for assign in &simple.assigns {
            let value = match expand_string(r, &assign.value).await {
                Ok(value) => value,
                Err(err) => return expand_failed(r, err),
            };
            if let Err(err) = r.set_var(&assign.name, value) {
                r.errf(format_args!("vsh: {err}\n"));
                r.set_exit(1);
                return;
            }
        }
        if let Some(saved) = open_redirects(r, &simple.redirects).await {
            close_redirects(r, saved).await;
        }
        return;
    }

    if let Some(expanded) = expand_alias(r, &args[0]).await {
        args.splice(0..1, expanded);
        if args.is_empty() {
            return;
        }
    }

    let mut restore = Vec::with_capacity(simple.assigns.len());
    for assign in &simple.assigns {
        let value = match expand_string(r, &assign.value).await {
            Ok(value) => value,
            Err(err) => {
                restore_vars(r, restore);
                return expand_failed(r, err);
            }
        };
        let old = r.env().get(&assign.name);
        if let Err(err) = r.set_var_full(&assign.name, Variable::exported(value)) {
            r.errf(format_args!("vsh: {err}\n"));
            r.set_exit(1);
            restore_vars(r, restore);
            return;
        }
        restore.push((assign.name.clone(), old));
    }

    if let Some(saved) = open_redirects(r, &simple.redirects).await {
        dispatch(r, args).await;
        close_redirects(r, saved).await;
    }
    restore_vars(r, restore);
}

async fn dispatch(r: &mut Runner, args: Vec<String>) {
    if r.has_func(&args[0]) || !builtins::is_builtin(&args[0]) {
        r.call(args).await;
        return;
    }
    if r.opt(ShellOpt::XTrace) {
        r.errf(format_args!("+ {}\n", args.join(" ")));
    }
    builtins::run(r, args).await;
}

/// Expand an alias for the command name, once.
async fn expand_alias(r: &mut Runner, name: &str) -> Option<Vec<String>> {
    let text = r.alias(name)?.to_string();
    let program = match parse(&text) {
        Ok(program) => program,
        Err(err) => {
            tracing::debug!(alias = name, %err, "ignoring unparsable alias");
            return None;
        }
    };
    let mut out = Vec::new();
    for word in program.simple_words()? {
        out.extend(expand_fields(r, word).await.ok()?);
    }
    Some(out)
}

fn restore_vars(r: &mut Runner, saved: Vec<(String, Option<Variable>)>) {
    for (name, old) in saved.into_iter().rev() {
        let restored = match old {
            Some(var) => r.set_var_full(&name, var),
            None => r.unset_var(&name),
        };
        if let Err(err) = restored {
            tracing::debug!(%err, "could not restore prefix assignment");
        }
    }
}

// ==================== redirections ====================

#[derive(Default)]
struct Saved {
    stdin: Option<Option<InputStream>>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    files: Vec<(Box<dyn FileHandle>, SharedBuffer)>,
}

const DEV_NULL: &str = "/dev/null";

async fn open_redirects(r: &mut Runner, redirects: &[Redirect]) -> Option<Saved> {
    let mut saved = Saved::default();
    for redirect in redirects {
        if let Err(msg) = open_redirect(r, redirect, &mut saved).await {
            r.errf(format_args!("vsh: {msg}\n"));
            close_redirects(r, saved).await;
            r.set_exit(1);
            return None;
        }
    }
    Some(saved)
}

async fn open_redirect(
    r: &mut Runner,
    redirect: &Redirect,
    saved: &mut Saved,
) -> Result<(), String> {
    let target = expand_string(r, &redirect.target)
        .await
        .map_err(|e| e.to_string())?;
    let file = path::abs(r.dir(), &target);
    let fs = r.fs();
    match (redirect.op, redirect.fd) {
        (RedirOp::In, 0) => {
            let data = if file == DEV_NULL {
                Vec::new()
            } else {
                fs.read_file(&file).await.map_err(|e| e.to_string())?
            };
            let old = r.replace_stdin(Some(InputStream::from_bytes(data)));
            saved.stdin.get_or_insert(old);
        }
        (RedirOp::Out | RedirOp::Append, fd @ (1 | 2)) => {
            let stream = if file == DEV_NULL {
                OutputStream::discard()
            } else {
                let flags = OpenFlags::new().create(true);
                let flags = if redirect.op == RedirOp::Append {
                    flags.append(true)
                } else {
                    flags.truncate(true)
                };
                let handle = fs
                    .open_file(&file, flags, 0o644)
                    .await
                    .map_err(|e| e.to_string())?;
                let (stream, buffer) = OutputStream::buffer();
                saved.files.push((handle, buffer));
                stream
            };
            if fd == 1 {
                let old = r.replace_stdout(stream);
                saved.stdout.get_or_insert(old);
            } else {
                let old = r.replace_stderr(stream);
                saved.stderr.get_or_insert(old);
            }
        }
        (_, fd) => return Err(format!("{fd}: bad file descriptor")),
    }
    Ok(())
}

async fn close_redirects(r: &mut Runner, saved: Saved) {
    if let Some(stdin) = saved.stdin {
        r.replace_stdin(stdin);
    }
    if let Some(stdout) = saved.stdout {
        r.replace_stdout(stdout);
    }
    if let Some(stderr) = saved.stderr {
        r.replace_stderr(stderr);
    }
    for (mut handle, buffer) in saved.files {
        if let Err(err) = handle.write_all(&buffer.take()).await {
            r.errf(format_args!("vsh: {err}\n"));
            r.set_exit(1);
        }
    }
}

// ==================== expansion ====================

#[derive(Debug, Error)]
enum ExpandError {
    #[error("{0}: unbound variable")]
    Unbound(String),
}

fn expand_failed(r: &mut Runner, err: ExpandError) {
    r.errf(format_args!("vsh: {err}\n"));
    r.set_exit(1);
}

#[derive(Debug, Default)]
struct Field {
    text: String,
    pattern: String,
    glob: bool,
    quoted: bool,
}

/// Accumulates fields while a word is expanded.
#[derive(Debug, Default)]
struct Fields {
    done: Vec<Field>,
    cur: Field,
    pending: bool,
}

impl Fields {
    fn boundary(&mut self) {
        if !self.cur.text.is_empty() || self.cur.quoted {
            self.done.push(mem::take(&mut self.cur));
        }
        self.pending = false;
    }

    fn resume(&mut self) {
        if self.pending {
            self.boundary();
        }
    }

    fn unquoted(&mut self, s: &str) {
        self.resume();
        self.cur.text.push_str(s);
        self.cur.pattern.push_str(s);
        self.cur.glob |= s.contains(['*', '?', '[']);
    }

    fn quoted(&mut self, s: &str) {
        self.resume();
        self.cur.text.push_str(s);
        self.cur.pattern.push_str(&Pattern::escape(s));
        self.cur.quoted = true;
    }

    fn split(&mut self, value: &str, ifs: &str) {
        let is_sep = |c: char| ifs.contains(c);
        if value.is_empty() {
            return;
        }
        if value.starts_with(is_sep) {
            self.boundary();
        }
        for (i, piece) in value.split(is_sep).filter(|p| !p.is_empty()).enumerate() {
            if i > 0 {
                self.boundary();
            }
            self.unquoted(piece);
        }
        if value.ends_with(is_sep) {
            self.pending = true;
        }
    }

    fn finish(mut self) -> Vec<Field> {
        self.boundary();
        self.done
    }
}

fn ifs(r: &Runner) -> String {
    r.env()
        .get("IFS")
        .map(|v| v.value)
        .unwrap_or_else(|| " \t\n".into())
}

fn lookup(r: &Runner, name: &str) -> Result<String, ExpandError> {
    match r.lookup_var(name) {
        Some(value) => Ok(value),
        None if r.opt(ShellOpt::NoUnset) && !matches!(name, "!" | "@" | "*") => {
            Err(ExpandError::Unbound(name.to_string()))
        }
        None => Ok(String::new()),
    }
}

/// `~` or `~/...` at the start of a word.
fn tilde(r: &Runner, word: &Word) -> Option<(String, String)> {
    let Some(Part::Lit(first)) = word.0.first() else {
        return None;
    };
    let rest = first.strip_prefix('~')?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let home = r.lookup_var("HOME")?;
    Some((home, rest.to_string()))
}

/// Expand a word into fields: parameter and command substitution, field
/// splitting on unquoted expansions, then globbing against the filesystem.
async fn expand_fields(r: &mut Runner, word: &Word) -> Result<Vec<String>, ExpandError> {
    let ifs = ifs(r);
    let mut fields = Fields::default();
    let mut parts = word.0.as_slice();
    if let Some((home, rest)) = tilde(r, word) {
        fields.quoted(&home);
        fields.unquoted(&rest);
        parts = &parts[1..];
    }
    for part in parts {
        match part {
            Part::Lit(s) => fields.unquoted(s),
            Part::Quoted(s) => fields.quoted(s),
            Part::Double(inner) if matches!(inner.as_slice(), [Part::Param(p)] if p == "@") => {
                for (i, param) in r.params().to_vec().iter().enumerate() {
                    if i > 0 {
                        fields.boundary();
                    }
                    fields.quoted(param);
                }
            }
            Part::Double(inner) => {
                let s = expand_double(r, inner).await?;
                fields.quoted(&s);
            }
            Part::Param(name) if name == "@" || name == "*" => {
                for (i, param) in r.params().to_vec().iter().enumerate() {
                    if i > 0 {
                        fields.boundary();
                    }
                    fields.split(param, &ifs);
                }
            }
            Part::Param(name) => {
                let value = lookup(r, name)?;
                fields.split(&value, &ifs);
            }
            Part::Subst(body) => {
                let out = r.capture(&Body::new(body.clone())).await;
                fields.split(&out, &ifs);
            }
        }
    }

    let noglob = r.opt(ShellOpt::NoGlob);
    let mut out = Vec::new();
    for field in fields.finish() {
        if field.glob && !noglob {
            let matches = glob_vfs(r, &field.pattern).await;
            if !matches.is_empty() {
                out.extend(matches);
                continue;
            }
        }
        out.push(field.text);
    }
    Ok(out)
}

/// Expand a word into one string, without splitting or globbing.
async fn expand_string(r: &mut Runner, word: &Word) -> Result<String, ExpandError> {
    let mut out = String::new();
    let mut parts = word.0.as_slice();
    if let Some((home, rest)) = tilde(r, word) {
        out.push_str(&home);
        out.push_str(&rest);
        parts = &parts[1..];
    }
    for part in parts {
        match part {
            Part::Lit(s) | Part::Quoted(s) => out.push_str(s),
            Part::Double(inner) => out.push_str(&expand_double(r, inner).await?),
            Part::Param(name) => out.push_str(&lookup(r, name)?),
            Part::Subst(body) => out.push_str(&r.capture(&Body::new(body.clone())).await),
        }
    }
    Ok(out)
}

async fn expand_double(r: &mut Runner, parts: &[Part]) -> Result<String, ExpandError> {
    let mut out = String::new();
    for part in parts {
        match part {
            Part::Lit(s) | Part::Quoted(s) => out.push_str(s),
            Part::Param(name) if name == "*" => {
                let sep = ifs(r).chars().next().map(String::from).unwrap_or_default();
                out.push_str(&r.params().join(&sep));
            }
            Part::Param(name) => out.push_str(&lookup(r, name)?),
            Part::Subst(body) => out.push_str(&r.capture(&Body::new(body.clone())).await),
            Part::Double(inner) => {
                for part in inner {
                    if let Part::Lit(s) | Part::Quoted(s) = part {
                        out.push_str(s);
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Match a glob pattern against the virtual filesystem, one path segment at
/// a time. Hidden entries only match patterns that start with a dot.
async fn glob_vfs(r: &Runner, pattern: &str) -> Vec<String> {
    let fs = r.fs();
    let dir = r.dir().to_string();
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut candidates = vec![if pattern.starts_with('/') {
        "/".to_string()
    } else {
        String::new()
    }];

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let mut next = Vec::new();
        if !segment.contains(['*', '?', '[']) {
            for base in &candidates {
                let joined = join_match(base, segment);
                if !last || fs.stat(&path::abs(&dir, &joined)).await.is_ok() {
                    next.push(joined);
                }
            }
        } else {
            let Ok(matcher) = Pattern::new(segment) else {
                return Vec::new();
            };
            for base in &candidates {
                let host = path::abs(&dir, if base.is_empty() { "." } else { base });
                let Ok(entries) = fs.read_dir(&host).await else {
                    continue;
                };
                for entry in entries {
                    if (!last && !entry.is_dir)
                        || (entry.name.starts_with('.') && !segment.starts_with('.'))
                    {
                        continue;
                    }
                    if matcher.matches(&entry.name) {
                        next.push(join_match(base, &entry.name));
                    }
                }
            }
        }
        candidates = next;
        if candidates.is_empty() {
            break;
        }
    }
    candidates.sort();
    candidates
}

fn join_match(base: &str, name: &str) -> String {
    match base {
        "" => name.to_string(),
        "/" => format!("/{name}"),
        _ => format!("{base}/{name}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::{CommandContext, CommandError};
    use crate::runner::RunError;
    use crate::vfs::{FileSystem, MemFs};
    use tokio_util::sync::CancellationToken;

    async fn upper(ctx: CommandContext, _args: Vec<String>) -> Result<(), CommandError> {
        let input = ctx.read_stdin().await?;
        ctx.stdout
            .write_all(String::from_utf8_lossy(&input).to_uppercase().as_bytes())?;
        Ok(())
    }

    async fn fails(ctx: CommandContext, args: Vec<String>) -> Result<(), CommandError> {
        writeln!(ctx.stdout, "{}", args[1..].join(" "))?;
        Err(CommandError::Exit(3))
    }

    async fn shell() -> (Runner, MemFs, SharedBuffer, SharedBuffer) {
        let fs = MemFs::new();
        fs.mkdir_all("/home/user", 0o755).await.unwrap();
        let (stdout, out) = OutputStream::buffer();
        let (stderr, err) = OutputStream::buffer();
        let runner = Runner::builder()
            .filesystem(fs.clone())
            .dir("/home/user")
            .env_vars([("HOME", "/home/user"), ("PATH", "/bin")])
            .command("upper", upper)
            .command("fails", fails)
            .stdout(stdout)
            .stderr(stderr)
            .build()
            .await
            .unwrap();
        (runner, fs, out, err)
    }

    async fn run(runner: &mut Runner, src: &str) -> Result<(), RunError> {
        let node = LineExecutor::stmt(src).unwrap();
        runner.run(&CancellationToken::new(), &node).await
    }

    #[tokio::test]
    async fn test_echo_and_variables() {
        let (mut r, _, out, _) = shell().await;
        run(&mut r, "greeting='hello  there'; echo $greeting \"$greeting\" ~")
            .await
            .unwrap();
        assert_eq!(out.to_string_lossy(), "hello there hello  there /home/user\n");
    }

    #[tokio::test]
    async fn test_exit_status_and_lists() {
        let (mut r, _, out, _) = shell().await;
        let err = run(&mut r, "false || echo rescued; true && false").await.unwrap_err();
        assert_eq!(err.exit_status(), Some(1));
        assert_eq!(out.to_string_lossy(), "rescued\n");
        run(&mut r, "echo $?").await.unwrap();
        assert_eq!(out.to_string_lossy(), "rescued\n1\n");
    }

    #[tokio::test]
    async fn test_pipeline_and_pipefail() {
        let (mut r, _, out, _) = shell().await;
        run(&mut r, "echo quiet | upper").await.unwrap();
        assert_eq!(out.take(), b"QUIET\n");

        assert!(run(&mut r, "fails x | upper").await.is_ok());
        assert_eq!(out.take(), b"X\n");

        let err = run(&mut r, "set -o pipefail; fails x | upper").await.unwrap_err();
        assert_eq!(err.exit_status(), Some(3));
        assert!(run(&mut r, "! fails x | upper").await.is_ok());
    }

    #[tokio::test]
    async fn test_redirections() {
        let (mut r, fs, out, _) = shell().await;
        run(&mut r, "echo one >notes; echo two >>notes; upper <notes >shout")
            .await
            .unwrap();
        assert_eq!(fs.read_file("/home/user/notes").await.unwrap(), b"one\ntwo\n");
        assert_eq!(fs.read_file("/home/user/shout").await.unwrap(), b"ONE\nTWO\n");
        assert!(out.contents().is_empty());

        run(&mut r, "nosuch 2>/dev/null; echo $?").await.unwrap();
        assert_eq!(out.to_string_lossy(), "127\n");
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let (mut r, _, _, err) = shell().await;
        let res = run(&mut r, "upper <absent").await.unwrap_err();
        assert_eq!(res.exit_status(), Some(1));
        assert_eq!(
            err.to_string_lossy(),
            "vsh: open home/user/absent: file does not exist\n"
        );
    }

    #[tokio::test]
    async fn test_command_substitution_and_splitting() {
        let (mut r, _, out, _) = shell().await;
        run(&mut r, "set -- $(echo a b) c; echo $# \"$@\"; IFS=:; x=1:2; set -- $x; echo $#")
            .await
            .unwrap();
        assert_eq!(out.to_string_lossy(), "3 a b c\n2\n");
    }

    #[tokio::test]
    async fn test_glob_matches_vfs() {
        let (mut r, fs, out, _) = shell().await;
        for name in ["b.txt", "a.txt", ".hidden.txt", "c.md"] {
            fs.write_file(&format!("/home/user/{name}"), b"", 0o644).await.unwrap();
        }
        fs.mkdir_all("/home/user/sub", 0o755).await.unwrap();
        fs.write_file("/home/user/sub/d.txt", b"", 0o644).await.unwrap();

        run(&mut r, "echo *.txt; echo */*.txt; echo '*.txt'; echo *.none")
            .await
            .unwrap();
        assert_eq!(
            out.to_string_lossy(),
            "a.txt b.txt\nsub/d.txt\n*.txt\n*.none\n"
        );

        out.take();
        run(&mut r, "set -f; echo *.txt; echo /home/user/*.md").await.unwrap();
        assert_eq!(out.to_string_lossy(), "*.txt\n/home/user/*.md\n");
    }

    #[tokio::test]
    async fn test_nounset() {
        let (mut r, _, out, err) = shell().await;
        let res = run(&mut r, "set -u; echo $missing; echo after").await;
        assert!(res.is_ok());
        assert_eq!(out.to_string_lossy(), "after\n");
        assert_eq!(err.to_string_lossy(), "vsh: missing: unbound variable\n");
    }

    #[tokio::test]
    async fn test_errexit_stops_script() {
        let (mut r, _, out, _) = shell().await;
        let res = run(&mut r, "set -e; false || true; fails x; echo unreachable").await;
        assert_eq!(res.unwrap_err().exit_status(), Some(3));
        assert!(r.exited());
        assert_eq!(out.to_string_lossy(), "x\n");
    }

    #[tokio::test]
    async fn test_err_trap_runs_after_failure() {
        let (mut r, _, out, _) = shell().await;
        let _ = run(&mut r, "trap 'echo caught $?' ERR; fails; echo next").await;
        assert_eq!(out.to_string_lossy(), "\ncaught 3\nnext\n");
    }

    #[tokio::test]
    async fn test_functions_and_return() {
        let (mut r, _, out, _) = shell().await;
        run(
            &mut r,
            "greet() { echo hi $1; return 4; echo never; }\ngreet bob; echo $? $#",
        )
        .await
        .unwrap();
        assert_eq!(out.to_string_lossy(), "hi bob\n4 0\n");
    }

    #[tokio::test]
    async fn test_subshell_isolation() {
        let (mut r, _, out, _) = shell().await;
        run(&mut r, "x=outer; (x=inner; cd /; echo $x $PWD); echo $x $PWD")
            .await
            .unwrap();
        assert_eq!(
            out.to_string_lossy(),
            "inner /\nouter /home/user\n"
        );
    }

    #[tokio::test]
    async fn test_prefix_assignment_is_scoped() {
        let (mut r, _, _, _) = shell().await;
        run(&mut r, "x=1; x=2 true").await.unwrap();
        assert_eq!(r.vars().get("x").unwrap().value, "1");
    }

    #[tokio::test]
    async fn test_alias_expansion() {
        let (mut r, _, out, _) = shell().await;
        run(&mut r, "alias say='echo said'\nsay it").await.unwrap();
        assert_eq!(out.to_string_lossy(), "said it\n");
    }

    #[tokio::test]
    async fn test_noexec_skips_commands() {
        let (mut r, _, out, _) = shell().await;
        run(&mut r, "set -n; echo hidden").await.unwrap();
        assert!(out.contents().is_empty());
    }

    #[tokio::test]
    async fn test_exec_file_from_path() {
        let (mut r, fs, out, _) = shell().await;
        fs.mkdir_all("/bin", 0o755).await.unwrap();
        fs.write_file("/bin/hello", b"echo hello $1 from $0\nexit 5\n", 0o755)
            .await
            .unwrap();
        let res = run(&mut r, "hello world; echo back $?").await;
        assert!(res.is_ok());
        assert!(!r.exited());
        assert_eq!(out.to_string_lossy(), "hello world from /bin/hello\nback 5\n");
    }

    #[tokio::test]
    async fn test_literal_command_node() {
        let (mut r, _, out, _) = shell().await;
        let node = LineExecutor::command(["echo", "$HOME", "*"]);
        r.run(&CancellationToken::new(), &node).await.unwrap();
        assert_eq!(out.to_string_lossy(), "$HOME *\n");
    }

    #[tokio::test]
    async fn test_script_runs_exit_trap() {
        let (mut r, _, out, _) = shell().await;
        let node = LineExecutor::script("job.sh", "trap 'echo bye from $0' EXIT; echo work").unwrap();
        r.run(&CancellationToken::new(), &node).await.unwrap();
        assert_eq!(out.to_string_lossy(), "work\nbye from job.sh\n");
    }
}
