//! Mirroring between string pool data and the line-oriented text artifact.
//!
//! The artifact stores one string constant per line, so raw line breaks
//! inside a constant are carried as literal placeholder tokens instead.

use super::RiteError;

/// Placeholder for a carriage return embedded in a string constant.
pub const CR_TOKEN: &str = "<CR>";
/// Placeholder for a line feed embedded in a string constant.
pub const LF_TOKEN: &str = "<LF>";

/// Decode raw pool-string bytes into one artifact line.
/// Bytes that are not valid UTF-8 decode to U+FFFD.
pub fn escape_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace('\r', CR_TOKEN)
        .replace('\n', LF_TOKEN)
}

/// Re-encode one artifact line into raw pool-string bytes.
pub fn unescape_line(line: &str) -> Vec<u8> {
    line.replace(CR_TOKEN, "\r")
        .replace(LF_TOKEN, "\n")
        .into_bytes()
}

/// Sequential cursor over the replacement lines consumed while writing a
/// container. Each string pool entry takes exactly one line, in stream
/// order.
#[derive(Debug)]
pub struct LineCursor<'a> {
    lines: &'a [String],
    next: usize,
}

impl<'a> LineCursor<'a> {
    pub fn new(lines: &'a [String]) -> Self {
        Self { lines, next: 0 }
    }

    pub fn take(&mut self) -> Result<&'a str, RiteError> {
        let line = self
            .lines
            .get(self.next)
            .ok_or(RiteError::LinesExhausted {
                consumed: self.next,
            })?;
        self.next += 1;
        Ok(line)
    }

    /// Number of lines handed out so far.
    pub fn consumed(&self) -> usize {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn line_breaks_become_tokens() {
        assert_eq!(escape_line(b"a\r\nb"), "a<CR><LF>b");
        assert_eq!(escape_line(b"no breaks"), "no breaks");
    }

    #[test]
    fn tokens_become_line_breaks() {
        assert_eq!(unescape_line("a<CR><LF>b"), b"a\r\nb");
        assert_eq!(unescape_line("<LF><LF>"), b"\n\n");
    }

    #[test]
    fn escape_then_unescape_is_identity() {
        let raw = "first\rsecond\nthird".as_bytes();
        assert_eq!(unescape_line(&escape_line(raw)), raw);
    }

    #[test]
    fn cursor_yields_lines_in_order_then_errors() {
        let lines = vec!["one".to_string(), "two".to_string()];
        let mut cursor = LineCursor::new(&lines);
        assert_eq!(cursor.take().unwrap(), "one");
        assert_eq!(cursor.take().unwrap(), "two");
        assert!(matches!(
            cursor.take(),
            Err(RiteError::LinesExhausted { consumed: 2 })
        ));
    }
}
