//! Builtins that read or change the shell's own state.
//!
//! Host commands only see a [`crate::command::CommandContext`]; these run
//! with the whole [`Runner`].

use crate::dispatch;
use crate::env::{Environ, Variable};
use crate::path;
use crate::runner::{Body, JobId, Runner, Trap, TrapKind};

use super::parse::{is_name, parse};

const BUILTINS: &[&str] = &[
    ".", ":", "alias", "cd", "dirs", "echo", "exit", "export", "false", "popd", "pushd", "pwd",
    "readonly", "return", "set", "shift", "source", "trap", "true", "type", "unalias", "unset",
    "wait",
];

pub(super) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Run a builtin and record its status.
pub(super) async fn run(r: &mut Runner, args: Vec<String>) {
    let rest = &args[1..];
    let status = match args[0].as_str() {
        ":" | "true" => 0,
        "false" => 1,
        "echo" => echo(r, rest),
        "pwd" => {
            let dir = r.dir().to_string();
            r.outf(format_args!("{dir}\n"));
            0
        }
        "cd" => cd(r, rest).await,
        "pushd" => pushd(r, rest).await,
        "popd" => popd(r).await,
        "dirs" => {
            print_dirs(r);
            0
        }
        "exit" => exit(r, rest).await,
        "return" => match status_arg(r, "return", rest) {
            Ok(code) => {
                r.set_returning(true);
                code
            }
            Err(code) => code,
        },
        "set" => set(r, rest),
        "shift" => shift(r, rest),
        "export" => export(r, rest),
        "readonly" => readonly(r, rest),
        "unset" => unset(r, rest),
        "alias" => alias(r, rest),
        "unalias" => unalias(r, rest),
        "trap" => trap(r, rest),
        "wait" => wait(r, rest).await,
        "source" | "." => source(r, &args[0], rest).await,
        "type" => type_of(r, rest).await,
        other => {
            r.errf(format_args!("{other}: not a shell builtin\n"));
            1
        }
    };
    r.set_exit(status);
}

fn echo(r: &mut Runner, args: &[String]) -> u8 {
    let mut newline = true;
    let mut escapes = false;
    let mut words = args;
    while let Some(flag) = words.first() {
        let Some(letters) = flag.strip_prefix('-') else {
            break;
        };
        if letters.is_empty() || !letters.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
            break;
        }
        for c in letters.chars() {
            match c {
                'n' => newline = false,
                'e' => escapes = true,
                _ => escapes = false,
            }
        }
        words = &words[1..];
    }
    let mut line = words.join(" ");
    if escapes {
        line = unescape(&line);
    }
    if newline {
        line.push('\n');
    }
    r.outf(format_args!("{line}"));
    0
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

async fn cd(r: &mut Runner, args: &[String]) -> u8 {
    let (target, print) = match args.first().map(String::as_str) {
        None => (r.lookup_var("HOME").unwrap_or_else(|| "/".into()), false),
        Some("-") => match r.lookup_var("OLDPWD") {
            Some(old) => (old, true),
            None => {
                r.errf(format_args!("cd: OLDPWD not set\n"));
                return 1;
            }
        },
        Some(dir) => (dir.to_string(), false),
    };
    if let Err(err) = r.change_dir(&target).await {
        r.errf(format_args!("cd: {err}\n"));
        return 1;
    }
    if print {
        let dir = r.dir().to_string();
        r.outf(format_args!("{dir}\n"));
    }
    0
}

async fn pushd(r: &mut Runner, args: &[String]) -> u8 {
    let Some(dir) = args.first() else {
        r.errf(format_args!("pushd: no other directory\n"));
        return 1;
    };
    if let Err(err) = r.push_dir(dir).await {
        r.errf(format_args!("pushd: {err}\n"));
        return 1;
    }
    print_dirs(r);
    0
}

async fn popd(r: &mut Runner) -> u8 {
    match r.pop_dir().await {
        Ok(true) => {
            print_dirs(r);
            0
        }
        Ok(false) => {
            r.errf(format_args!("popd: directory stack empty\n"));
            1
        }
        Err(err) => {
            r.errf(format_args!("popd: {err}\n"));
            1
        }
    }
}

fn print_dirs(r: &mut Runner) {
    let line = r
        .dir_stack()
        .iter()
        .rev()
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    r.outf(format_args!("{line}\n"));
}

/// Parse an optional status argument, defaulting to the current status.
/// A bad argument is reported and its status returned as the error.
fn status_arg(r: &mut Runner, name: &str, args: &[String]) -> Result<u8, u8> {
    let Some(arg) = args.first() else {
        return Ok(r.exit_code());
    };
    match arg.parse::<i64>() {
        Ok(n) => Ok(n.rem_euclid(256) as u8),
        Err(_) => {
            r.errf(format_args!("{name}: {arg}: numeric argument required\n"));
            Err(2)
        }
    }
}

async fn exit(r: &mut Runner, args: &[String]) -> u8 {
    let code = status_arg(r, "exit", args).unwrap_or_else(|code| code);
    r.exit_shell(code).await;
    code
}

fn set(r: &mut Runner, args: &[String]) -> u8 {
    if args.is_empty() {
        let mut listing = String::new();
        for (name, var) in r.env().to_map() {
            listing.push_str(&format!("{name}={}\n", quote(&var.value)));
        }
        r.outf(format_args!("{listing}"));
        return 0;
    }
    match r.set_params(args) {
        Ok(report) => {
            r.outf(format_args!("{report}"));
            0
        }
        Err(err) => {
            r.errf(format_args!("set: {err}\n"));
            2
        }
    }
}

fn shift(r: &mut Runner, args: &[String]) -> u8 {
    let n = match args.first().map(|a| a.parse::<usize>()) {
        None => 1,
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            r.errf(format_args!("shift: {}: numeric argument required\n", args[0]));
            return 2;
        }
    };
    let mut params = r.params().to_vec();
    if n > params.len() {
        r.errf(format_args!("shift: shift count out of range\n"));
        return 1;
    }
    params.drain(..n);
    r.replace_params(params);
    0
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Split `name=value` and check the name.
fn assignment(arg: &str) -> Result<(&str, Option<&str>), String> {
    let (name, value) = match arg.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (arg, None),
    };
    if is_name(name) {
        Ok((name, value))
    } else {
        Err(format!("{arg:?}: not a valid identifier"))
    }
}

fn list_flagged(r: &mut Runner, keyword: &str, pick: fn(&Variable) -> bool) {
    let mut listing = String::new();
    for (name, var) in r.env().to_map() {
        if pick(&var) {
            listing.push_str(&format!("{keyword} {name}={}\n", quote(&var.value)));
        }
    }
    r.outf(format_args!("{listing}"));
}

fn export(r: &mut Runner, args: &[String]) -> u8 {
    if args.is_empty() {
        list_flagged(r, "export", |v| v.exported);
        return 0;
    }
    let mut status = 0;
    for arg in args {
        let (name, value) = match assignment(arg) {
            Ok(pair) => pair,
            Err(msg) => {
                r.errf(format_args!("export: {msg}\n"));
                status = 1;
                continue;
            }
        };
        let current = r.env().get(name);
        let var = match (value, current) {
            (Some(value), current) => Variable {
                value: value.to_string(),
                exported: true,
                read_only: current.is_some_and(|v| v.read_only),
            },
            (None, Some(current)) => Variable {
                exported: true,
                ..current
            },
            (None, None) => continue,
        };
        if let Err(err) = r.set_var_full(name, var) {
            r.errf(format_args!("export: {err}\n"));
            status = 1;
        }
    }
    status
}

fn readonly(r: &mut Runner, args: &[String]) -> u8 {
    if args.is_empty() {
        list_flagged(r, "readonly", |v| v.read_only);
        return 0;
    }
    let mut status = 0;
    for arg in args {
        let (name, value) = match assignment(arg) {
            Ok(pair) => pair,
            Err(msg) => {
                r.errf(format_args!("readonly: {msg}\n"));
                status = 1;
                continue;
            }
        };
        let current = r.env().get(name);
        if value.is_none() && current.as_ref().is_some_and(|v| v.read_only) {
            continue;
        }
        let var = Variable {
            value: value
                .map(str::to_string)
                .or_else(|| current.as_ref().map(|v| v.value.clone()))
                .unwrap_or_default(),
            exported: current.is_some_and(|v| v.exported),
            read_only: true,
        };
        if let Err(err) = r.set_var_full(name, var) {
            r.errf(format_args!("readonly: {err}\n"));
            status = 1;
        }
    }
    status
}

fn unset(r: &mut Runner, args: &[String]) -> u8 {
    let (funcs_only, names) = match args.first().map(String::as_str) {
        Some("-f") => (true, &args[1..]),
        Some("-v") => (false, &args[1..]),
        _ => (false, args),
    };
    let mut status = 0;
    for name in names {
        if funcs_only {
            r.unset_func(name);
            continue;
        }
        if let Err(err) = r.unset_var(name) {
            r.errf(format_args!("unset: {err}\n"));
            status = 1;
        }
    }
    status
}

fn alias(r: &mut Runner, args: &[String]) -> u8 {
    if args.is_empty() {
        let mut listing = String::new();
        for (name, value) in r.aliases() {
            listing.push_str(&format!("alias {name}={}\n", quote(&value)));
        }
        r.outf(format_args!("{listing}"));
        return 0;
    }
    let mut status = 0;
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) => r.set_alias(name, value),
            None => match r.alias(arg).map(quote) {
                Some(value) => r.outf(format_args!("alias {arg}={value}\n")),
                None => {
                    r.errf(format_args!("alias: {arg}: not found\n"));
                    status = 1;
                }
            },
        }
    }
    status
}

fn unalias(r: &mut Runner, args: &[String]) -> u8 {
    if args.first().is_some_and(|a| a == "-a") {
        for (name, _) in r.aliases() {
            r.unset_alias(&name);
        }
        return 0;
    }
    let mut status = 0;
    for name in args {
        if !r.unset_alias(name) {
            r.errf(format_args!("unalias: {name}: not found\n"));
            status = 1;
        }
    }
    status
}

fn trap_kind(sig: &str) -> Option<TrapKind> {
    let upper = sig.to_ascii_uppercase();
    match upper.strip_prefix("SIG").unwrap_or(&upper) {
        "EXIT" | "0" => Some(TrapKind::Exit),
        "ERR" => Some(TrapKind::Err),
        _ => None,
    }
}

fn trap(r: &mut Runner, args: &[String]) -> u8 {
    if args.is_empty() || args[0] == "-p" {
        let mut listing = String::new();
        for (kind, sig) in [(TrapKind::Exit, "EXIT"), (TrapKind::Err, "ERR")] {
            if let Some(trap) = r.trap(kind) {
                listing.push_str(&format!("trap -- {} {sig}\n", quote(&trap.source)));
            }
        }
        r.outf(format_args!("{listing}"));
        return 0;
    }
    // A lone argument names a signal to reset.
    let (action, sigs) = if args.len() == 1 {
        ("-", args)
    } else {
        (args[0].as_str(), &args[1..])
    };
    let trap = match action {
        "-" | "" => None,
        source => match parse(source) {
            Ok(program) => Some(Trap {
                source: source.to_string(),
                body: Body::new(program),
            }),
            Err(err) => {
                r.errf(format_args!("trap: {err}\n"));
                return 2;
            }
        },
    };
    let mut status = 0;
    for sig in sigs {
        match trap_kind(sig) {
            Some(kind) => r.set_trap(kind, trap.clone()),
            None => {
                r.errf(format_args!("trap: {sig}: invalid signal specification\n"));
                status = 1;
            }
        }
    }
    status
}

async fn wait(r: &mut Runner, args: &[String]) -> u8 {
    if args.is_empty() {
        return r.wait(None).await;
    }
    let mut status = 0;
    for arg in args {
        status = match JobId::parse(arg) {
            Some(id) => r.wait(Some(id)).await,
            None => {
                r.errf(format_args!("wait: {arg}: no such job\n"));
                127
            }
        };
    }
    status
}

async fn source(r: &mut Runner, name: &str, args: &[String]) -> u8 {
    let Some(file) = args.first() else {
        r.errf(format_args!("{name}: filename argument required\n"));
        return 2;
    };
    let target = path::abs(r.dir(), file);
    let src = match r.fs().read_file(&target).await {
        Ok(data) => String::from_utf8_lossy(&data).into_owned(),
        Err(err) => {
            r.errf(format_args!("{name}: {err}\n"));
            return 1;
        }
    };
    let program = match parse(&src) {
        Ok(program) => program,
        Err(err) => {
            r.errf(format_args!("{file}: {err}\n"));
            return 2;
        }
    };
    let saved = (args.len() > 1).then(|| r.replace_params(args[1..].to_vec()));
    super::exec_program(r, &program).await;
    if let Some(params) = saved {
        r.replace_params(params);
    }
    r.set_returning(false);
    r.exit_code()
}

async fn type_of(r: &mut Runner, args: &[String]) -> u8 {
    let mut status = 0;
    for name in args {
        if let Some(value) = r.alias(name).map(str::to_string) {
            r.outf(format_args!("{name} is aliased to `{value}'\n"));
        } else if r.has_func(name) {
            r.outf(format_args!("{name} is a function\n"));
        } else if is_builtin(name) || r.commands().contains(name) {
            r.outf(format_args!("{name} is a shell builtin\n"));
        } else {
            let fs = r.fs();
            let env = r.env();
            match dispatch::look_path(fs.as_ref(), env.as_ref(), r.dir(), name).await {
                Ok(found) => r.outf(format_args!("{name} is {found}\n")),
                Err(_) => {
                    r.errf(format_args!("type: {name}: not found\n"));
                    status = 1;
                }
            }
        }
    }
    status
}
