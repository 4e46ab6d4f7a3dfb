use std::io;
use std::sync::Arc;

use super::StreamBuffer;

/// Cap of the diagnostic capture buffer
pub const CAPTURE_MAX_LEN: usize = 1024;

/// `io::Write` sink that keeps the most recent text in a [`StreamBuffer`]
///
/// Hand it to a logger (for example `env_logger`'s pipe target) so that the
/// tail of the log can be read back from the console.
#[derive(Debug, Clone)]
pub struct StreamCapture {
    stream: Arc<StreamBuffer>,
}

impl StreamCapture {
    /// Create a capture over a fresh buffer of [`CAPTURE_MAX_LEN`] bytes
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let stream = StreamBuffer::new(name).with_slack(CAPTURE_MAX_LEN / 4);
        stream.init(CAPTURE_MAX_LEN);
        Self {
            stream: Arc::new(stream),
        }
    }

    /// Capture into an existing buffer, initializing it if needed
    #[must_use]
    pub fn with_stream(stream: Arc<StreamBuffer>) -> Self {
        if !stream.is_initialized() {
            stream.init(CAPTURE_MAX_LEN);
        }
        Self { stream }
    }

    /// Buffer backing this capture
    pub fn stream(&self) -> &Arc<StreamBuffer> {
        &self.stream
    }

    /// Drain everything captured so far as lossy UTF-8
    pub fn take_text(&self) -> String {
        let bytes = self.stream.pull_vec(self.stream.size());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for StreamCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.push(buf) {
            0 => Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("capture stream {} refused write", self.stream.name()),
            )),
            written => Ok(written),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn keeps_most_recent_text() {
        let mut capture = StreamCapture::new("log");
        for i in 0..200 {
            writeln!(capture, "line {i:03}").unwrap();
        }
        let text = capture.take_text();
        assert!(text.len() <= CAPTURE_MAX_LEN);
        assert!(text.ends_with("line 199\n"));
        assert!(!text.contains("line 000"));
        assert!(capture.take_text().is_empty());
    }

    #[test]
    fn shares_existing_stream() {
        let stream = Arc::new(StreamBuffer::new("shared"));
        let mut capture = StreamCapture::with_stream(Arc::clone(&stream));
        capture.write_all(b"hello").unwrap();
        assert_eq!(stream.size(), 5);
        assert_eq!(stream.max_len(), CAPTURE_MAX_LEN);
    }
}
