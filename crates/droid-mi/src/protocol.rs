//! GDB/MI output records.
//!
//! Every line the debugger prints is one of: a result record answering a
//! command (`^done`, `^running`, `^connected`, `^error`, `^exit`), an async
//! record (`*` exec, `+` status, `=` notify), a stream record (`~` console,
//! `@` target, `&` log), the `(gdb)` prompt, or raw program output.

use std::fmt;

use crate::error::MiError;

/// A value on the right of `name=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Const(String),
    Tuple(Vec<(String, Value)>),
    /// List entries. For lists of results (`[frame={..},frame={..}]`) the
    /// names are dropped and only the values kept.
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Field of a tuple.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Tuple(fields) => lookup(fields, key),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

pub fn lookup<'a>(results: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    results.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "done" => ResultClass::Done,
            "running" => ResultClass::Running,
            "connected" => ResultClass::Connected,
            "error" => ResultClass::Error,
            "exit" => ResultClass::Exit,
            _ => return None,
        })
    }
}

impl fmt::Display for ResultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultClass::Done => "done",
            ResultClass::Running => "running",
            ResultClass::Connected => "connected",
            ResultClass::Error => "error",
            ResultClass::Exit => "exit",
        })
    }
}

/// Answer to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub token: Option<u64>,
    pub class: ResultClass,
    pub results: Vec<(String, Value)>,
}

impl ResultRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.results, key)
    }

    pub fn is_error(&self) -> bool {
        self.class == ResultClass::Error
    }

    /// `msg` of an `^error` record.
    pub fn error_message(&self) -> Option<&str> {
        self.get("msg").and_then(Value::as_str)
    }

    /// `code` of an `^error` record, e.g. `undefined-command`.
    pub fn error_code(&self) -> Option<&str> {
        self.get("code").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*`: execution state changes.
    Exec,
    /// `+`: progress of long operations.
    Status,
    /// `=`: everything else (threads, libraries, breakpoints).
    Notify,
}

/// Unsolicited notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRecord {
    pub token: Option<u64>,
    pub kind: AsyncKind,
    pub class: String,
    pub results: Vec<(String, Value)>,
}

impl AsyncRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.results, key)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.kind == AsyncKind::Exec && self.class == "running"
    }

    pub fn is_stopped(&self) -> bool {
        self.kind == AsyncKind::Exec && self.class == "stopped"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Console,
    Target,
    Log,
    /// Unprefixed output from the debugged program.
    Program,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub text: String,
}

/// One classified output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Result(ResultRecord),
    Async(AsyncRecord),
    Stream(StreamRecord),
    Prompt,
}

/// Classify and parse one line of debugger output (without the newline).
pub fn parse_line(line: &str) -> Result<Line, MiError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim_end() == "(gdb)" {
        return Ok(Line::Prompt);
    }

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    let rest = &line[digits..];
    let token = if digits > 0 {
        line[..digits].parse::<u64>().ok()
    } else {
        None
    };

    let Some(prefix) = rest.bytes().next() else {
        return Ok(program_output(line));
    };

    match prefix {
        b'^' => {
            let mut p = Parser::new(rest, 1);
            let class_name = p.word();
            let class = ResultClass::parse(class_name).ok_or_else(|| {
                MiError::InvalidResponse(format!("unknown result class `{class_name}`"))
            })?;
            let results = p.trailing_results()?;
            Ok(Line::Result(ResultRecord {
                token,
                class,
                results,
            }))
        }
        b'*' | b'+' | b'=' => {
            let kind = match prefix {
                b'*' => AsyncKind::Exec,
                b'+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let mut p = Parser::new(rest, 1);
            let class = p.word().to_string();
            if class.is_empty() {
                return Err(MiError::InvalidResponse(format!(
                    "async record without class: {line}"
                )));
            }
            let results = p.trailing_results()?;
            Ok(Line::Async(AsyncRecord {
                token,
                kind,
                class,
                results,
            }))
        }
        b'~' | b'@' | b'&' if digits == 0 => {
            let kind = match prefix {
                b'~' => StreamKind::Console,
                b'@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            let mut p = Parser::new(rest, 1);
            let text = p.cstring()?;
            Ok(Line::Stream(StreamRecord { kind, text }))
        }
        _ => Ok(program_output(line)),
    }
}

/// Token of a line shaped like a result record, whether or not its body
/// parses. `None` for every other kind of line.
pub fn result_token(line: &str) -> Option<Option<u64>> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if line.as_bytes().get(digits) != Some(&b'^') {
        return None;
    }
    Some(if digits > 0 {
        line[..digits].parse::<u64>().ok()
    } else {
        None
    })
}

fn program_output(line: &str) -> Line {
    Line::Stream(StreamRecord {
        kind: StreamKind::Program,
        text: line.to_string(),
    })
}

/// Parse a `name=value,...` list as it appears after a record class.
pub fn parse_results(text: &str) -> Result<Vec<(String, Value)>, MiError> {
    let mut p = Parser::new(text, 0);
    let mut results = Vec::new();
    if p.at_end() {
        return Ok(results);
    }
    results.push(p.result()?);
    let mut continued = false;
    while p.eat(b',') {
        p.next_result(&mut results, &mut continued)?;
    }
    p.finish()?;
    Ok(results)
}

/// Quote `s` as a C string for use in a command.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, what: &str) -> MiError {
        MiError::InvalidResponse(format!("{what} at column {} in `{}`", self.pos, self.src))
    }

    fn expect(&mut self, b: u8) -> Result<(), MiError> {
        if self.eat(b) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", b as char)))
        }
    }

    fn finish(&self) -> Result<(), MiError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }

    /// Record class or variable name.
    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    fn trailing_results(&mut self) -> Result<Vec<(String, Value)>, MiError> {
        let mut results = Vec::new();
        let mut continued = false;
        while self.eat(b',') {
            self.next_result(&mut results, &mut continued)?;
        }
        self.finish()?;
        Ok(results)
    }

    /// A `name=value` pair, or a bare tuple continuing the previous value.
    ///
    /// Breakpoints with several locations are reported as
    /// `bkpt={...},{...},{...}`; the tuples are folded into one list under
    /// the first name.
    fn next_result(
        &mut self,
        results: &mut Vec<(String, Value)>,
        continued: &mut bool,
    ) -> Result<(), MiError> {
        if self.peek() != Some(b'{') {
            results.push(self.result()?);
            *continued = false;
            return Ok(());
        }
        let extra = self.tuple()?;
        let Some((_, last)) = results.last_mut() else {
            return Err(self.error("expected variable name"));
        };
        if !*continued {
            let first = std::mem::replace(last, Value::List(Vec::new()));
            *last = Value::List(vec![first]);
            *continued = true;
        }
        if let Value::List(items) = last {
            items.push(extra);
        }
        Ok(())
    }

    fn result(&mut self) -> Result<(String, Value), MiError> {
        let name = self.word();
        if name.is_empty() {
            return Err(self.error("expected variable name"));
        }
        self.expect(b'=')?;
        let value = self.value()?;
        Ok((name.to_string(), value))
    }

    fn value(&mut self) -> Result<Value, MiError> {
        match self.peek() {
            Some(b'"') => Ok(Value::Const(self.cstring()?)),
            Some(b'{') => self.tuple(),
            Some(b'[') => self.list(),
            _ => Err(self.error("expected value")),
        }
    }

    fn tuple(&mut self) -> Result<Value, MiError> {
        self.expect(b'{')?;
        let mut fields = Vec::new();
        if self.eat(b'}') {
            return Ok(Value::Tuple(fields));
        }
        loop {
            fields.push(self.result()?);
            if self.eat(b'}') {
                return Ok(Value::Tuple(fields));
            }
            self.expect(b',')?;
        }
    }

    fn list(&mut self) -> Result<Value, MiError> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        if self.eat(b']') {
            return Ok(Value::List(items));
        }
        loop {
            let item = match self.peek() {
                Some(b'"' | b'{' | b'[') => self.value()?,
                _ => self.result()?.1,
            };
            items.push(item);
            if self.eat(b']') {
                return Ok(Value::List(items));
            }
            self.expect(b',')?;
        }
    }

    fn cstring(&mut self) -> Result<String, MiError> {
        self.expect(b'"')?;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(esc) = self.peek() else {
                        return Err(self.error("unterminated escape"));
                    };
                    self.pos += 1;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'v' => out.push(0x0b),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            let mut code = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        code = code * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((code & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
