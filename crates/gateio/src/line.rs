use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr;

/// Incremental line splitter for a telnet-cleaned byte stream.
///
/// The session loop reads raw chunks, strips IAC sequences, and feeds the
/// remainder here; `pop` then yields one line at a time with the trailing
/// `\n` and optional `\r` removed.
#[derive(Debug)]
pub struct LineSplitter {
    buf: BytesMut,
    max_line_len: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_line_len: 8 * 1024,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, if any.
    ///
    /// Returns `Err` once the pending (unterminated) data exceeds the line
    /// limit; callers should treat that as a protocol error and close.
    pub fn pop(&mut self) -> std::io::Result<Option<Bytes>> {
        if let Some(i) = memchr(b'\n', &self.buf) {
            let raw = self.buf.split_to(i + 1).freeze();
            return Ok(Some(trim_crlf(raw)));
        }
        if self.buf.len() > self.max_line_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "line too long",
            ));
        }
        Ok(None)
    }

    /// Bytes buffered but not yet terminated by a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn trim_crlf(mut b: Bytes) -> Bytes {
    let mut end = b.len();
    if end > 0 && b[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && b[end - 1] == b'\r' {
        end -= 1;
    }
    b.truncate(end);
    b
}
