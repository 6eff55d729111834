//! Shell options and positional parameters.

use std::fmt::Write as _;

use thiserror::Error;

/// A boolean shell option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellOpt {
    /// `-a`: mark every assigned variable for export.
    AllExport,
    /// `-e`: exit when a command fails outside of a condition.
    ErrExit,
    /// `-n`: read commands without executing them.
    NoExec,
    /// `-f`: disable pathname expansion.
    NoGlob,
    /// `-u`: treat expanding an unset variable as an error.
    NoUnset,
    /// `-x`: print commands before running them.
    XTrace,
    /// A pipeline fails with the last failing stage's status.
    PipeFail,
}

impl ShellOpt {
    /// Every option, in bit-vector order.
    pub const ALL: [ShellOpt; 7] = [
        ShellOpt::AllExport,
        ShellOpt::ErrExit,
        ShellOpt::NoExec,
        ShellOpt::NoGlob,
        ShellOpt::NoUnset,
        ShellOpt::XTrace,
        ShellOpt::PipeFail,
    ];

    /// The single-character flag, if the option has one.
    pub fn flag(self) -> Option<char> {
        match self {
            ShellOpt::AllExport => Some('a'),
            ShellOpt::ErrExit => Some('e'),
            ShellOpt::NoExec => Some('n'),
            ShellOpt::NoGlob => Some('f'),
            ShellOpt::NoUnset => Some('u'),
            ShellOpt::XTrace => Some('x'),
            ShellOpt::PipeFail => None,
        }
    }

    /// The long name used with `-o`.
    pub fn name(self) -> &'static str {
        match self {
            ShellOpt::AllExport => "allexport",
            ShellOpt::ErrExit => "errexit",
            ShellOpt::NoExec => "noexec",
            ShellOpt::NoGlob => "noglob",
            ShellOpt::NoUnset => "nounset",
            ShellOpt::XTrace => "xtrace",
            ShellOpt::PipeFail => "pipefail",
        }
    }

    /// Find an option by its flag character.
    pub fn from_flag(flag: char) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.flag() == Some(flag))
    }

    /// Find an option by its long name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// The set of enabled shell options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShellOpts([bool; ShellOpt::ALL.len()]);

impl ShellOpts {
    /// Whether `opt` is enabled.
    pub fn get(&self, opt: ShellOpt) -> bool {
        self.0[opt.index()]
    }

    /// Enable or disable `opt`.
    pub fn set(&mut self, opt: ShellOpt, enabled: bool) {
        self.0[opt.index()] = enabled;
    }

    /// The flags of enabled options, as in `$-`.
    pub fn flags(&self) -> String {
        ShellOpt::ALL
            .into_iter()
            .filter(|o| self.get(*o))
            .filter_map(ShellOpt::flag)
            .collect()
    }

    /// Status table printed by `set -o`.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for opt in ShellOpt::ALL {
            let state = if self.get(opt) { "on" } else { "off" };
            let _ = writeln!(out, "{:<15} {state}", opt.name());
        }
        out
    }

    /// Re-enterable commands printed by `set +o`.
    pub fn report_commands(&self) -> String {
        let mut out = String::new();
        for opt in ShellOpt::ALL {
            let flag = if self.get(opt) { "-o" } else { "+o" };
            let _ = writeln!(out, "set {flag} {}", opt.name());
        }
        out
    }
}

/// Errors from parsing an option/parameter update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    /// Unknown flag or option name.
    #[error("invalid option: {0:?}")]
    InvalidOption(String),
}

/// One step of a parsed update, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamsAction {
    /// Turn an option on or off.
    Toggle(ShellOpt, bool),
    /// Print the `set -o` status table.
    Report,
    /// Print the `set +o` command list.
    ReportCommands,
}

/// A fully parsed option/parameter update.
///
/// Parsing completes before anything is applied, so an invalid token leaves
/// the shell state untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamsUpdate {
    /// Option changes and report requests.
    pub actions: Vec<ParamsAction>,
    /// New positional parameters, if the update replaces them.
    pub params: Option<Vec<String>>,
}

impl ParamsUpdate {
    /// Apply the update, returning any report output.
    pub fn apply(&self, opts: &mut ShellOpts, params: &mut Vec<String>) -> String {
        let mut out = String::new();
        for action in &self.actions {
            match action {
                ParamsAction::Toggle(opt, on) => opts.set(*opt, *on),
                ParamsAction::Report => out.push_str(&opts.report()),
                ParamsAction::ReportCommands => out.push_str(&opts.report_commands()),
            }
        }
        if let Some(new) = &self.params {
            params.clone_from(new);
        }
        out
    }
}

/// Parse the arguments of `set`.
///
/// Tokens starting with `-` enable options, `+` disable them, and combined
/// flags like `-eu` are split. `-o name`/`+o name` toggle a named option and
/// a bare `-o`/`+o` requests a report. `-` or `--` end option scanning: the
/// remaining tokens become the positional parameters, but only when at least
/// one follows. The first token that is not an option also starts the
/// parameters.
pub fn parse_params<S: AsRef<str>>(args: &[S]) -> Result<ParamsUpdate, ParamsError> {
    let mut update = ParamsUpdate::default();
    let mut i = 0;
    while i < args.len() {
        let token = args[i].as_ref();
        let mut chars = token.chars();
        let sign = match chars.next() {
            Some(c @ ('-' | '+')) => c,
            _ => break,
        };
        i += 1;
        let rest: Vec<char> = chars.collect();
        if token == "-" || token == "--" {
            if i < args.len() {
                update.params = Some(args[i..].iter().map(|s| s.as_ref().to_string()).collect());
            }
            return Ok(update);
        }
        if rest.is_empty() {
            return Err(ParamsError::InvalidOption(token.to_string()));
        }
        let enable = sign == '-';
        for flag in rest {
            if flag != 'o' {
                let opt = ShellOpt::from_flag(flag)
                    .ok_or_else(|| ParamsError::InvalidOption(format!("{sign}{flag}")))?;
                update.actions.push(ParamsAction::Toggle(opt, enable));
                continue;
            }
            let name = match args.get(i).map(AsRef::as_ref) {
                Some(name) if !name.starts_with(['-', '+']) => {
                    i += 1;
                    name
                }
                _ => "",
            };
            if name.is_empty() {
                update.actions.push(if enable {
                    ParamsAction::Report
                } else {
                    ParamsAction::ReportCommands
                });
                continue;
            }
            let opt = ShellOpt::from_name(name)
                .ok_or_else(|| ParamsError::InvalidOption(name.to_string()))?;
            update.actions.push(ParamsAction::Toggle(opt, enable));
        }
    }
    if i < args.len() {
        update.params = Some(args[i..].iter().map(|s| s.as_ref().to_string()).collect());
    }
    Ok(update)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn run(args: &[&str], opts: &mut ShellOpts, params: &mut Vec<String>) -> String {
        parse_params(args).unwrap().apply(opts, params)
    }

    #[test]
    fn test_flags_toggle() {
        let mut opts = ShellOpts::default();
        let mut params = vec!["keep".to_string()];
        run(&["-eu"], &mut opts, &mut params);
        assert!(opts.get(ShellOpt::ErrExit));
        assert!(opts.get(ShellOpt::NoUnset));
        assert_eq!(opts.flags(), "eu");

        run(&["+e"], &mut opts, &mut params);
        assert!(!opts.get(ShellOpt::ErrExit));
        assert_eq!(params, ["keep"]);
    }

    #[test]
    fn test_named_options() {
        let mut opts = ShellOpts::default();
        let mut params = Vec::new();
        run(&["-o", "pipefail", "-o", "noglob"], &mut opts, &mut params);
        assert!(opts.get(ShellOpt::PipeFail));
        assert!(opts.get(ShellOpt::NoGlob));
        run(&["+o", "pipefail"], &mut opts, &mut params);
        assert!(!opts.get(ShellOpt::PipeFail));
    }

    #[test]
    fn test_double_dash_sets_params() {
        let mut opts = ShellOpts::default();
        let mut params = vec!["old".to_string()];
        run(&["-e", "--", "a", "b"], &mut opts, &mut params);
        assert!(opts.get(ShellOpt::ErrExit));
        assert_eq!(params, ["a", "b"]);
    }

    #[test]
    fn test_bare_double_dash_keeps_params() {
        let mut opts = ShellOpts::default();
        let mut params = vec!["old".to_string()];
        run(&["--"], &mut opts, &mut params);
        assert_eq!(params, ["old"]);
        run(&["-"], &mut opts, &mut params);
        assert_eq!(params, ["old"]);
    }

    #[test]
    fn test_plain_words_become_params() {
        let mut opts = ShellOpts::default();
        let mut params = Vec::new();
        run(&["-x", "one", "-two"], &mut opts, &mut params);
        assert!(opts.get(ShellOpt::XTrace));
        assert_eq!(params, ["one", "-two"]);
    }

    #[test]
    fn test_reports_do_not_change_state() {
        let mut opts = ShellOpts::default();
        opts.set(ShellOpt::ErrExit, true);
        let mut params = vec!["p".to_string()];

        let report = run(&["-o"], &mut opts, &mut params);
        assert!(report.contains("errexit         on\n"));
        assert!(report.contains("xtrace          off\n"));

        let commands = run(&["+o"], &mut opts, &mut params);
        assert!(commands.contains("set -o errexit\n"));
        assert!(commands.contains("set +o pipefail\n"));

        assert!(opts.get(ShellOpt::ErrExit));
        assert_eq!(params, ["p"]);
    }

    #[test]
    fn test_invalid_options() {
        assert_eq!(
            parse_params(&["-z"]).unwrap_err().to_string(),
            "invalid option: \"-z\""
        );
        assert_eq!(
            parse_params(&["-o", "bogus"]).unwrap_err(),
            ParamsError::InvalidOption("bogus".into())
        );
    }

    #[test]
    fn test_error_reports_offending_flag() {
        let err = parse_params(&["-e", "-uz", "--", "new"]).unwrap_err();
        assert_eq!(err, ParamsError::InvalidOption("-z".into()));
    }
}
