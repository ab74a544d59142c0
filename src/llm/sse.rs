//! Line assembly for SSE byte streams

/// Buffers raw response bytes and hands back complete lines.
///
/// Provider streams arrive with arbitrary chunk boundaries; a line is
/// only parseable once its terminating newline has arrived.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes into the buffer
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pop the next complete line, trimmed; `None` until one is available
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.find('\n')?;
        let line = self.pending[..pos].trim().to_string();
        self.pending.drain(..=pos);
        Some(line)
    }
}
