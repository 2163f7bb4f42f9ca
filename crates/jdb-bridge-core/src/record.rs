//! Record model for classified jdb output.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Per-command correlation token.
///
/// Zero is reserved and never handed out for a real command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(u64);

impl Token {
    /// The "no token" value.
    pub const NONE: Self = Self(0);

    /// First token allocated by a fresh session.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw token value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw token value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the reserved "no token" value.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The token allocated after this one.
    ///
    /// Never wraps back to zero or to earlier tokens.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn thread_prompt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([\w$.\-]+)\[(\d+)\]$").expect("valid thread prompt regex")
    })
}

fn leading_prompt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(> |[\w$.\-]+\[\d+\] )").expect("valid leading prompt regex")
    })
}

/// The prompt jdb prints when it is ready for the next command.
///
/// `> ` when no thread is selected, `main[1] ` when a thread is suspended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Current thread name, if one is selected.
    pub thread: Option<String>,
    /// Current frame index (1-based as jdb prints it).
    pub frame: Option<u32>,
}

impl Prompt {
    /// Parse a whole line as a prompt. Trailing whitespace is ignored.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line == ">" {
            return Some(Self::default());
        }
        let caps = thread_prompt_re().captures(line)?;
        let frame = caps.get(2)?.as_str().parse().ok()?;
        Some(Self {
            thread: Some(caps.get(1)?.as_str().to_string()),
            frame: Some(frame),
        })
    }

    /// Split a prompt glued to the front of other output.
    ///
    /// Returns `(prompt, rest)` only when `rest` is non-empty.
    #[must_use]
    pub fn split_leading(line: &str) -> Option<(&str, &str)> {
        let m = leading_prompt_re().find(line)?;
        let rest = &line[m.end()..];
        if rest.trim().is_empty() {
            return None;
        }
        Some((&line[..m.end()], rest))
    }

    /// Whether a thread is suspended and selected.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        self.thread.is_some()
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.thread, self.frame) {
            (Some(thread), Some(frame)) => write!(f, "{thread}[{frame}]"),
            _ => f.write_str(">"),
        }
    }
}

/// Outcome of a completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultClass {
    /// jdb accepted and ran the command.
    Done,
    /// jdb replied with an error message.
    Error,
}

/// Completion of one command: everything jdb printed up to its next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Token of the command this completes, or `Token::NONE` if unsolicited.
    pub token: Token,
    /// Outcome.
    pub class: ResultClass,
    /// Prompt that terminated the reply.
    pub prompt: Prompt,
    /// Console lines printed as the reply.
    pub output: Vec<String>,
}

impl ResultRecord {
    /// A bare prompt record, not yet correlated with a command.
    #[must_use]
    pub const fn from_prompt(prompt: Prompt) -> Self {
        Self {
            token: Token::NONE,
            class: ResultClass::Done,
            prompt,
            output: Vec::new(),
        }
    }

    /// Whether jdb rejected the command.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.class == ResultClass::Error
    }

    /// Reply text, one output line per line.
    #[must_use]
    pub fn text(&self) -> String {
        self.output.join("\n")
    }
}

/// Why the target VM stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Breakpoint,
    Step,
    Exception,
    MethodEntry,
    MethodExit,
    Watchpoint,
}

/// Kind of unsolicited state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum AsyncClass {
    /// A thread was suspended by an event.
    Stopped(StopReason),
    /// The target VM started.
    Started,
    /// The target VM exited or disconnected.
    Exited,
    /// A deferred breakpoint was resolved after its class loaded.
    Deferred,
}

const ASYNC_PREFIXES: &[(&str, AsyncClass)] = &[
    ("Breakpoint hit:", AsyncClass::Stopped(StopReason::Breakpoint)),
    ("Step completed:", AsyncClass::Stopped(StopReason::Step)),
    ("Exception occurred:", AsyncClass::Stopped(StopReason::Exception)),
    ("Method entered:", AsyncClass::Stopped(StopReason::MethodEntry)),
    ("Method exited:", AsyncClass::Stopped(StopReason::MethodExit)),
    ("Field (", AsyncClass::Stopped(StopReason::Watchpoint)),
    ("VM Started:", AsyncClass::Started),
    ("The application exited", AsyncClass::Exited),
    ("The application has been disconnected", AsyncClass::Exited),
    ("Set deferred breakpoint", AsyncClass::Deferred),
];

/// Unsolicited notification from jdb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncRecord {
    /// What changed.
    pub class: AsyncClass,
    /// Raw line.
    pub text: String,
}

impl AsyncRecord {
    /// Classify a stdout line as an event notification.
    #[must_use]
    pub fn classify(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        ASYNC_PREFIXES
            .iter()
            .find(|(prefix, _)| trimmed.starts_with(prefix))
            .map(|&(_, class)| Self {
                class,
                text: line.to_string(),
            })
    }

    /// Whether this event leaves a thread suspended.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self.class, AsyncClass::Stopped(_))
    }
}

/// Source stream of a text record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// jdb stdout.
    Console,
    /// jdb stderr.
    Log,
}

const ERROR_PREFIXES: &[&str] = &[
    "Unrecognized command",
    "No frames on the current call stack",
    "Unable to",
    "Invalid",
    "No thread specified",
    "Current thread isnt suspended",
    "Command is not supported",
    "Exception in thread",
    "com.sun.tools.example.debug.expr.ParseException",
];

/// Raw console or log text with no command association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Where the text came from.
    pub kind: StreamKind,
    /// The line, without its terminator.
    pub text: String,
}

impl StreamRecord {
    /// Console text.
    #[must_use]
    pub fn console(text: impl Into<String>) -> Self {
        Self {
            kind: StreamKind::Console,
            text: text.into(),
        }
    }

    /// Log text.
    #[must_use]
    pub fn log(text: impl Into<String>) -> Self {
        Self {
            kind: StreamKind::Log,
            text: text.into(),
        }
    }

    /// Whether the line is one of jdb's error replies.
    #[must_use]
    pub fn is_error(&self) -> bool {
        let text = self.text.trim_start();
        ERROR_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
    }
}

/// A classified unit of inbound debugger output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Result(ResultRecord),
    Async(AsyncRecord),
    Stream(StreamRecord),
}

impl Record {
    /// Approximate heap footprint, used to bound history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 16;
        match self {
            Self::Result(r) => {
                OVERHEAD + r.output.iter().map(String::len).sum::<usize>()
                    + r.prompt.thread.as_ref().map_or(0, String::len)
            }
            Self::Async(a) => OVERHEAD + a.text.len(),
            Self::Stream(s) => OVERHEAD + s.text.len(),
        }
    }

    /// The result record, if this is one.
    #[must_use]
    pub fn into_result(self) -> Option<ResultRecord> {
        match self {
            Self::Result(r) => Some(r),
            _ => None,
        }
    }
}

impl From<ResultRecord> for Record {
    fn from(record: ResultRecord) -> Self {
        Self::Result(record)
    }
}

impl From<AsyncRecord> for Record {
    fn from(record: AsyncRecord) -> Self {
        Self::Async(record)
    }
}

impl From<StreamRecord> for Record {
    fn from(record: StreamRecord) -> Self {
        Self::Stream(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_sequence() {
        assert!(Token::NONE.is_none());
        assert_eq!(Token::FIRST.get(), 1);
        assert_eq!(Token::FIRST.next().get(), 2);
        let late = Token::new(u64::from(u32::MAX));
        assert!(late.next() > late);
        assert_eq!(late.next().get(), u64::from(u32::MAX) + 1);
    }

    #[test]
    fn test_prompt_parse() {
        assert_eq!(Prompt::parse("> "), Some(Prompt::default()));
        assert_eq!(Prompt::parse(">"), Some(Prompt::default()));

        let prompt = Prompt::parse("main[1] ").unwrap();
        assert_eq!(prompt.thread.as_deref(), Some("main"));
        assert_eq!(prompt.frame, Some(1));
        assert!(prompt.is_suspended());
        assert_eq!(prompt.to_string(), "main[1]");

        let prompt = Prompt::parse("Thread-0[12]").unwrap();
        assert_eq!(prompt.thread.as_deref(), Some("Thread-0"));
        assert_eq!(prompt.frame, Some(12));

        assert_eq!(Prompt::parse("Breakpoint hit: main[1]"), None);
        assert_eq!(Prompt::parse(""), None);
        assert_eq!(Prompt::parse(">>"), None);
    }

    #[test]
    fn test_prompt_split_leading() {
        assert_eq!(
            Prompt::split_leading("> Breakpoint hit: x"),
            Some(("> ", "Breakpoint hit: x"))
        );
        assert_eq!(
            Prompt::split_leading("main[1] Step completed: y"),
            Some(("main[1] ", "Step completed: y"))
        );
        assert_eq!(Prompt::split_leading("main[1] "), None);
        assert_eq!(Prompt::split_leading("plain output"), None);
    }

    #[test]
    fn test_async_classify() {
        let record = AsyncRecord::classify(
            "Breakpoint hit: \"thread=main\", Foo.main(), line=5 bci=0",
        )
        .unwrap();
        assert_eq!(record.class, AsyncClass::Stopped(StopReason::Breakpoint));
        assert!(record.is_stop());

        let record = AsyncRecord::classify("Exception occurred: java.lang.NullPointerException (uncaught)")
            .unwrap();
        assert_eq!(record.class, AsyncClass::Stopped(StopReason::Exception));

        let record = AsyncRecord::classify("The application exited").unwrap();
        assert_eq!(record.class, AsyncClass::Exited);
        assert!(!record.is_stop());

        assert!(AsyncRecord::classify("x = 5").is_none());
    }

    #[test]
    fn test_stream_error_detection() {
        assert!(StreamRecord::console("Unrecognized command: 'frob'.  Try help...").is_error());
        assert!(StreamRecord::console("No frames on the current call stack").is_error());
        assert!(!StreamRecord::console("x = 5").is_error());
    }

    #[test]
    fn test_record_serialization() {
        let record = Record::Stream(StreamRecord::log("warning"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"stream\""));
        assert!(json.contains("\"kind\":\"log\""));

        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_result_text() {
        let mut record = ResultRecord::from_prompt(Prompt::default());
        assert!(record.token.is_none());
        record.output = vec!["a".into(), "b".into()];
        assert_eq!(record.text(), "a\nb");
        assert!(!record.is_error());
    }
}
