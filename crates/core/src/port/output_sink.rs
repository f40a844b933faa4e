// Output Sink Port
// Destination for drained process output

/// Writable destination for process output
///
/// Implementations must not block on I/O and must not fail on ordinary
/// text: a supervisor calls `write_text` from its drain loop for every line.
pub trait OutputSink: Send + Sync {
    /// Forward one chunk of process output (usually a single line)
    fn write_text(&self, text: &str);

    /// Backing file descriptor, if any
    ///
    /// Sinks that are not backed by a real descriptor return `None`.
    fn raw_fd(&self) -> Option<i32> {
        None
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every write in memory
    #[derive(Default)]
    pub struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl OutputSink for RecordingSink {
        fn write_text(&self, text: &str) {
            self.lines.lock().unwrap().push(text.to_string());
        }
    }
}
