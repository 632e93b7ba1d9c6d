//! Output sink owned by a tracer session

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, TraceError};

/// Buffered destination for trace records
pub struct OutputSink {
    writer: BufWriter<Box<dyn Write + Send>>,
    label: String,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("label", &self.label)
            .field("buffered", &self.writer.buffer().len())
            .finish()
    }
}

impl OutputSink {
    /// Create (or truncate) a file sink
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| TraceError::SinkUnavailable {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_writer(file, path.display().to_string()))
    }

    pub fn stdout() -> Self {
        Self::from_writer(io::stdout(), "<stdout>")
    }

    pub fn from_writer<W>(writer: W, label: impl Into<String>) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            writer: BufWriter::new(Box::new(writer)),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flush buffered records and release the destination
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Release the destination without flushing buffered records
    ///
    /// Used when the buffer may hold data inherited from another process.
    pub fn abandon(self) {
        let (inner, _discarded) = self.writer.into_parts();
        drop(inner);
    }
}

/// In-memory sink target whose contents stay readable after the session
/// releases its sink
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(err) => err.into_inner(),
        }
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_flushes_buffered_records() {
        let buffer = SharedBuffer::new();
        let mut sink = OutputSink::from_writer(buffer.clone(), "memory");
        sink.write_all(b"row\n").unwrap();
        assert!(buffer.is_empty());
        sink.close().unwrap();
        assert_eq!(buffer.contents(), "row\n");
    }

    #[test]
    fn test_abandon_discards_buffered_records() {
        let buffer = SharedBuffer::new();
        let mut sink = OutputSink::from_writer(buffer.clone(), "memory");
        sink.write_all(b"flushed\n").unwrap();
        sink.flush().unwrap();
        sink.write_all(b"pending\n").unwrap();
        sink.abandon();
        assert_eq!(buffer.contents(), "flushed\n");
    }

    #[test]
    fn test_create_reports_unwritable_path() {
        let err = OutputSink::create(Path::new("/nonexistent-dir/trace.csv")).unwrap_err();
        assert!(matches!(err, TraceError::SinkUnavailable { .. }));
    }

    #[test]
    fn test_create_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        let mut sink = OutputSink::create(&path).unwrap();
        sink.write_all(b"header\n").unwrap();
        sink.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "header\n");
    }
}
