/// Forward-only cursor over a single log line.
///
/// Every field in the HAProxy HTTP log format is terminated by a known
/// separator byte, so parsing is a strictly forward walk: each call consumes
/// the field plus its separator and the cursor never backtracks.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Consume and return the bytes before `sep`, dropping the separator
    /// itself. `None` when the separator is absent from the remainder.
    pub fn take_until(&mut self, sep: u8) -> Option<&'a [u8]> {
        let end = self.buf.iter().position(|&b| b == sep)?;
        let field = &self.buf[..end];
        self.buf = &self.buf[end + 1..];
        Some(field)
    }

    /// Drop `n` bytes from the front, saturating at the end of input.
    pub fn skip(&mut self, n: usize) {
        self.buf = &self.buf[n.min(self.buf.len())..];
    }

    /// The next unconsumed byte, if any.
    pub fn peek(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// The unconsumed remainder.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }
}
