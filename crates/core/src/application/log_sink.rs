// Log Sink - OutputSink that turns process output into tracing events

use std::io;
use std::sync::Mutex;
use tracing::{event, Level, Span};

use crate::domain::OutputLevel;
use crate::port::OutputSink;

/// Forwards every write as one log record at a fixed severity
///
/// Records are parented to the owning task's span, so they carry the task
/// identity instead of going to an ad hoc file.
pub struct LogSink {
    level: OutputLevel,
    stream: &'static str,
    span: Span,
    pending: Mutex<Vec<u8>>,
}

impl LogSink {
    /// Create a sink for one stream (`"stdout"` / `"stderr"`) of a task
    pub fn new(level: OutputLevel, stream: &'static str, span: Span) -> Self {
        Self {
            level,
            stream,
            span,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, text: &str) {
        let stream = self.stream;
        match self.level {
            OutputLevel::Trace => event!(parent: &self.span, Level::TRACE, stream, "{}", text),
            OutputLevel::Debug => event!(parent: &self.span, Level::DEBUG, stream, "{}", text),
            OutputLevel::Info => event!(parent: &self.span, Level::INFO, stream, "{}", text),
            OutputLevel::Warn => event!(parent: &self.span, Level::WARN, stream, "{}", text),
            OutputLevel::Error => event!(parent: &self.span, Level::ERROR, stream, "{}", text),
        }
    }

    fn emit_bytes(&self, bytes: &[u8]) {
        let line = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        self.emit(&String::from_utf8_lossy(line));
    }
}

impl OutputSink for LogSink {
    fn write_text(&self, text: &str) {
        self.emit(text.strip_suffix('\n').unwrap_or(text));
    }
}

/// Byte-stream view: complete lines are logged as they arrive,
/// a trailing partial line waits for more bytes or `flush`
impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pending = self
            .pending
            .get_mut()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink buffer poisoned"))?;
        pending.extend_from_slice(buf);

        let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') else {
            return Ok(buf.len());
        };
        let complete: Vec<u8> = pending.drain(..=last_newline).collect();
        for line in complete[..complete.len() - 1].split(|b| *b == b'\n') {
            self.emit_bytes(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let rest = match self.pending.get_mut() {
            Ok(pending) => std::mem::take(pending),
            Err(_) => return Ok(()),
        };
        if !rest.is_empty() {
            self.emit_bytes(&rest);
        }
        Ok(())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}
