//! Line framing for jdb stdout.
//!
//! jdb writes its prompt without a newline and sometimes prints event text
//! right after it on the same line. The framer turns the raw byte stream into
//! lines where every prompt stands alone.

use jdb_bridge_core::Prompt;

/// Incremental splitter from stdout bytes to lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of output and take every line it completes.
    ///
    /// A trailing partial line is held back, unless it is a complete prompt.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            emit(decode(&raw[..pos]), &mut lines);
        }

        // A prompt always ends in a space; without it the chunk may have been
        // cut in the middle of `> ` or `main[1] `.
        if self.pending.last() == Some(&b' ') {
            let partial = decode(&self.pending);
            if Prompt::parse(&partial).is_some() {
                self.pending.clear();
                lines.push(partial.trim_end().to_string());
            }
        }

        lines
    }

    /// Take whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = decode(&self.pending);
        self.pending.clear();
        Some(rest)
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn emit(line: String, lines: &mut Vec<String>) {
    let mut rest = line.as_str();
    while let Some((prompt, tail)) = Prompt::split_leading(rest) {
        lines.push(prompt.trim_end().to_string());
        rest = tail;
    }
    lines.push(rest.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"one\r\ntwo\n"), vec!["one", "two"]);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_partial_line_is_held() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"Set uncaught java.la").is_empty());
        assert_eq!(framer.push(b"ng.Throwable\n"), vec!["Set uncaught java.lang.Throwable"]);
    }

    #[test]
    fn test_bare_prompt_is_flushed() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"Initializing jdb ...\n> "), vec!["Initializing jdb ...", ">"]);
        assert_eq!(framer.push(b"main[1] "), vec!["main[1]"]);
    }

    #[test]
    fn test_split_prompt_is_not_flushed_early() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b">").is_empty());
        assert_eq!(framer.push(b" "), vec![">"]);
    }

    #[test]
    fn test_glued_prompt_is_split() {
        let mut framer = LineFramer::new();
        assert_eq!(
            framer.push(b"> Breakpoint hit: \"thread=main\", Foo.main(), line=3 bci=0\n"),
            vec![">", "Breakpoint hit: \"thread=main\", Foo.main(), line=3 bci=0"]
        );
    }

    #[test]
    fn test_finish_returns_tail() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"no newline").is_empty());
        assert_eq!(framer.finish().as_deref(), Some("no newline"));
        assert_eq!(framer.finish(), None);
    }
}
