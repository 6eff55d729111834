//! Parser for the line executor's command language.
//!
//! The grammar is a small subset of the POSIX shell: simple commands with
//! quoting, parameter expansion and command substitution, pipelines, `&&`/`||`
//! lists, `;`/`&`/newline separators, `( ... )` subshells, `{ ...; }` groups,
//! function definitions and file redirections. There are no loops or
//! conditionals.

use std::sync::Arc;

use thiserror::Error;

/// Errors from parsing a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The input ended inside a construct; more input may complete it.
    #[error("unexpected end of input")]
    Incomplete,
    /// The input can never be valid.
    #[error("line {line}: {message}")]
    Syntax {
        /// 1-based line of the offending character.
        line: usize,
        /// What went wrong.
        message: String,
    },
}

impl ParseError {
    /// Whether more input could make the script valid.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }
}

/// A parsed statement list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub(crate) items: Vec<Item>,
}

impl Program {
    /// Whether the program contains no statements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A program made of one foreground list.
    pub(crate) fn single(and_or: AndOr) -> Self {
        Self {
            items: vec![Item {
                and_or,
                background: false,
            }],
        }
    }

    /// The words of a program consisting of one plain simple command.
    pub(crate) fn simple_words(&self) -> Option<&[Word]> {
        let [item] = self.items.as_slice() else {
            return None;
        };
        if item.background || !item.and_or.rest.is_empty() {
            return None;
        }
        let pipeline = &item.and_or.first;
        match pipeline.commands.as_slice() {
            [Cmd::Simple(simple)]
                if !pipeline.negated
                    && simple.assigns.is_empty()
                    && simple.redirects.is_empty() =>
            {
                Some(&simple.words)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Item {
    pub(crate) and_or: AndOr,
    pub(crate) background: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AndOr {
    pub(crate) first: Pipeline,
    pub(crate) rest: Vec<(Connector, Pipeline)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    pub(crate) negated: bool,
    pub(crate) commands: Vec<Cmd>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cmd {
    Simple(Simple),
    Subshell(Program, Vec<Redirect>),
    Group(Program, Vec<Redirect>),
    FuncDef(String, Arc<Cmd>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Simple {
    pub(crate) assigns: Vec<Assign>,
    pub(crate) words: Vec<Word>,
    pub(crate) redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assign {
    pub(crate) name: String,
    pub(crate) value: Word,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Redirect {
    pub(crate) fd: u32,
    pub(crate) op: RedirOp,
    pub(crate) target: Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RedirOp {
    In,
    Out,
    Append,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Word(pub(crate) Vec<Part>);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Part {
    /// Unquoted text.
    Lit(String),
    /// Single-quoted or backslash-escaped text.
    Quoted(String),
    /// Double-quoted parts; never split or globbed.
    Double(Vec<Part>),
    Param(String),
    Subst(Program),
}

impl Word {
    /// The text of a word made only of unquoted literal text.
    pub(crate) fn as_literal(&self) -> Option<&str> {
        match self.0.as_slice() {
            [Part::Lit(s)] => Some(s),
            _ => None,
        }
    }
}

/// Parse a script.
pub fn parse(src: &str) -> Result<Program> {
    let mut parser = Parser {
        chars: src.chars().collect(),
        pos: 0,
    };
    parser.program(End::Eof)
}

/// Whether `name` is a valid variable name.
pub(crate) fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Eof,
    Paren,
    Brace,
}

fn is_meta(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t' | '\n' | ';' | '&' | '|' | '(' | ')' | '<' | '>'
    )
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    /// Whether the unquoted word `w` starts here.
    fn at_word(&self, w: &str) -> bool {
        let len = w.chars().count();
        self.starts_with(w) && self.peek_at(len).is_none_or(is_meta)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        let line = 1 + self.chars[..self.pos.min(self.chars.len())]
            .iter()
            .filter(|c| **c == '\n')
            .count();
        Err(ParseError::Syntax {
            line,
            message: message.into(),
        })
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t') => self.pos += 1,
                Some('\\') if self.peek_at(1) == Some('\n') => self.pos += 2,
                Some('#') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn skip_linebreaks(&mut self) {
        loop {
            self.skip_blanks();
            if self.peek() == Some('\n') {
                self.pos += 1;
            } else {
                return;
            }
        }
    }

    fn at_end(&self, end: End) -> Result<bool> {
        match (self.peek(), end) {
            (None, End::Eof) => Ok(true),
            (None, _) => Err(ParseError::Incomplete),
            (Some(')'), End::Paren) => Ok(true),
            (Some(')'), _) => self.error("unexpected ')'"),
            _ => Ok(end == End::Brace && self.at_word("}")),
        }
    }

    fn program(&mut self, end: End) -> Result<Program> {
        let mut items = Vec::new();
        loop {
            self.skip_linebreaks();
            if self.at_end(end)? {
                break;
            }
            let and_or = self.and_or()?;
            self.skip_blanks();
            let (background, separated) = match self.peek() {
                Some('&') => {
                    self.pos += 1;
                    (true, true)
                }
                Some(';') if self.peek_at(1) != Some(';') => {
                    self.pos += 1;
                    (false, true)
                }
                Some('\n') => {
                    self.pos += 1;
                    (false, true)
                }
                _ => (false, false),
            };
            items.push(Item { and_or, background });
            if !separated {
                self.skip_blanks();
                if self.at_end(end)? {
                    break;
                }
                return match self.peek() {
                    Some(c) => self.error(format!("unexpected {c:?}")),
                    None => Err(ParseError::Incomplete),
                };
            }
        }
        Ok(Program { items })
    }

    fn and_or(&mut self) -> Result<AndOr> {
        let first = self.pipeline()?;
        let mut rest = Vec::new();
        loop {
            self.skip_blanks();
            let connector = if self.starts_with("&&") {
                Connector::And
            } else if self.starts_with("||") {
                Connector::Or
            } else {
                break;
            };
            self.pos += 2;
            self.skip_linebreaks();
            rest.push((connector, self.pipeline()?));
        }
        Ok(AndOr { first, rest })
    }

    fn pipeline(&mut self) -> Result<Pipeline> {
        self.skip_blanks();
        let negated = self.at_word("!");
        if negated {
            self.pos += 1;
        }
        let mut commands = vec![self.command()?];
        loop {
            self.skip_blanks();
            if self.peek() == Some('|') && self.peek_at(1) != Some('|') {
                self.pos += 1;
                self.skip_linebreaks();
                commands.push(self.command()?);
            } else {
                break;
            }
        }
        Ok(Pipeline { negated, commands })
    }

    fn command(&mut self) -> Result<Cmd> {
        self.skip_blanks();
        match self.peek() {
            None => Err(ParseError::Incomplete),
            Some('(') => {
                self.pos += 1;
                let body = self.program(End::Paren)?;
                self.pos += 1;
                let redirects = self.redirects()?;
                Ok(Cmd::Subshell(body, redirects))
            }
            Some('{') if self.at_word("{") => {
                self.pos += 1;
                let body = self.program(End::Brace)?;
                self.pos += 1;
                let redirects = self.redirects()?;
                Ok(Cmd::Group(body, redirects))
            }
            Some(c @ (')' | ';' | '&' | '|')) => self.error(format!("unexpected {c:?}")),
            Some(_) => self.simple(),
        }
    }

    fn redirects(&mut self) -> Result<Vec<Redirect>> {
        let mut out = Vec::new();
        loop {
            self.skip_blanks();
            match self.redirect()? {
                Some(redirect) => out.push(redirect),
                None => return Ok(out),
            }
        }
    }

    fn redirect(&mut self) -> Result<Option<Redirect>> {
        let start = self.pos;
        let mut fd = None;
        if let Some(d) = self.peek().and_then(|c| c.to_digit(10)) {
            if matches!(self.peek_at(1), Some('<' | '>')) {
                fd = Some(d);
                self.pos += 1;
            }
        }
        let op = match self.peek() {
            Some('>') if self.peek_at(1) == Some('>') => {
                self.pos += 2;
                RedirOp::Append
            }
            Some('>') => {
                self.pos += 1;
                RedirOp::Out
            }
            Some('<') => {
                self.pos += 1;
                RedirOp::In
            }
            _ => {
                self.pos = start;
                return Ok(None);
            }
        };
        self.skip_blanks();
        match self.peek() {
            None => return Err(ParseError::Incomplete),
            Some(c) if is_meta(c) => return self.error(format!("unexpected {c:?} after redirection")),
            Some(_) => {}
        }
        let target = self.word()?;
        let fd = fd.unwrap_or(if op == RedirOp::In { 0 } else { 1 });
        Ok(Some(Redirect { fd, op, target }))
    }

    fn simple(&mut self) -> Result<Cmd> {
        let mut simple = Simple::default();
        loop {
            self.skip_blanks();
            match self.peek() {
                None | Some('\n' | ';' | '&' | '|' | ')') => break,
                Some('(') => return self.error("unexpected '('"),
                _ => {}
            }
            if let Some(redirect) = self.redirect()? {
                simple.redirects.push(redirect);
                continue;
            }
            let word = self.word()?;
            if simple.words.is_empty() {
                if let Some(assign) = as_assignment(&word) {
                    simple.assigns.push(assign);
                    continue;
                }
            }
            simple.words.push(word);
            if simple.words.len() == 1 && simple.assigns.is_empty() && simple.redirects.is_empty()
            {
                if let Some(def) = self.function_def(&simple.words[0])? {
                    return Ok(def);
                }
            }
        }
        Ok(Cmd::Simple(simple))
    }

    fn function_def(&mut self, name: &Word) -> Result<Option<Cmd>> {
        let save = self.pos;
        self.skip_blanks();
        if self.peek() != Some('(') {
            self.pos = save;
            return Ok(None);
        }
        let Some(name) = name.as_literal().filter(|n| is_name(n)) else {
            return self.error("invalid function name");
        };
        self.pos += 1;
        self.skip_blanks();
        match self.bump() {
            Some(')') => {}
            None => return Err(ParseError::Incomplete),
            Some(_) => return self.error("expected ')' in function definition"),
        }
        self.skip_linebreaks();
        let body = self.command()?;
        Ok(Some(Cmd::FuncDef(name.to_string(), Arc::new(body))))
    }

    fn word(&mut self) -> Result<Word> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            match self.peek() {
                None => break,
                Some(c) if is_meta(c) => break,
                Some('\'') => {
                    flush(&mut lit, &mut parts);
                    self.pos += 1;
                    let mut quoted = String::new();
                    loop {
                        match self.bump() {
                            None => return Err(ParseError::Incomplete),
                            Some('\'') => break,
                            Some(c) => quoted.push(c),
                        }
                    }
                    parts.push(Part::Quoted(quoted));
                }
                Some('"') => {
                    flush(&mut lit, &mut parts);
                    self.pos += 1;
                    parts.push(Part::Double(self.double_quoted()?));
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.bump() {
                        None => return Err(ParseError::Incomplete),
                        Some('\n') => {}
                        Some(c) => {
                            flush(&mut lit, &mut parts);
                            parts.push(Part::Quoted(c.to_string()));
                        }
                    }
                }
                Some('$') => match self.dollar()? {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => lit.push('$'),
                },
                Some(c) => {
                    self.pos += 1;
                    lit.push(c);
                }
            }
        }
        flush(&mut lit, &mut parts);
        Ok(Word(parts))
    }

    fn double_quoted(&mut self) -> Result<Vec<Part>> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            match self.peek() {
                None => return Err(ParseError::Incomplete),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.bump() {
                        None => return Err(ParseError::Incomplete),
                        Some(c @ ('$' | '`' | '"' | '\\')) => lit.push(c),
                        Some('\n') => {}
                        Some(c) => {
                            lit.push('\\');
                            lit.push(c);
                        }
                    }
                }
                Some('$') => match self.dollar()? {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => lit.push('$'),
                },
                Some(c) => {
                    self.pos += 1;
                    lit.push(c);
                }
            }
        }
        flush(&mut lit, &mut parts);
        Ok(parts)
    }

    /// Parse an expansion at a `$`. A `$` that starts no expansion is
    /// consumed and reported as `None`.
    fn dollar(&mut self) -> Result<Option<Part>> {
        match self.peek_at(1) {
            Some('{') => {
                self.pos += 2;
                let mut name = String::new();
                loop {
                    match self.bump() {
                        None => return Err(ParseError::Incomplete),
                        Some('}') => break,
                        Some(c) => name.push(c),
                    }
                }
                if !is_name(&name) && !is_special(&name) {
                    return self.error(format!("${{{name}}}: bad substitution"));
                }
                Ok(Some(Part::Param(name)))
            }
            Some('(') => {
                self.pos += 2;
                let body = self.program(End::Paren)?;
                self.pos += 1;
                Ok(Some(Part::Subst(body)))
            }
            Some(c) if "?#@*!-0123456789".contains(c) => {
                self.pos += 2;
                Ok(Some(Part::Param(c.to_string())))
            }
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {
                self.pos += 1;
                let mut name = String::new();
                while let Some(c) = self.peek().filter(|c| *c == '_' || c.is_ascii_alphanumeric()) {
                    name.push(c);
                    self.pos += 1;
                }
                Ok(Some(Part::Param(name)))
            }
            _ => {
                self.pos += 1;
                Ok(None)
            }
        }
    }
}

fn is_special(name: &str) -> bool {
    matches!(name, "?" | "#" | "@" | "*" | "!" | "-") || name.chars().all(|c| c.is_ascii_digit())
}

fn flush(lit: &mut String, parts: &mut Vec<Part>) {
    if !lit.is_empty() {
        parts.push(Part::Lit(std::mem::take(lit)));
    }
}

fn as_assignment(word: &Word) -> Option<Assign> {
    let Some(Part::Lit(first)) = word.0.first() else {
        return None;
    };
    let (name, value) = first.split_once('=')?;
    if !is_name(name) {
        return None;
    }
    let mut parts = Vec::with_capacity(word.0.len());
    if !value.is_empty() {
        parts.push(Part::Lit(value.to_string()));
    }
    parts.extend(word.0[1..].iter().cloned());
    Some(Assign {
        name: name.to_string(),
        value: Word(parts),
    })
}
