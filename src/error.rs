//! Error types for tracer sessions
//!
//! Recoverable failures surface as `TraceError`. Conditions that would corrupt
//! the recorded call graph go through [`fatal`] instead.

use thiserror::Error;

/// Errors that can occur while opening or driving a tracer session
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Output sink unavailable: {path}")]
    SinkUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write trace header: {0}")]
    Header(#[source] std::io::Error),

    #[error("Tracer session is closed")]
    SessionClosed,

    #[error("Shadow stack underflow: no frame and no root sentinel")]
    StackUnderflow,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tracer session operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Terminate the process on a condition the tracer cannot survive
/// (stack underflow without a root, failed stack growth).
pub fn fatal(reason: &str) -> ! {
    tracing::error!(reason, "calltrace: fatal tracer error");
    eprintln!("[calltrace: fatal: {}]", reason);
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_unavailable_message_names_path() {
        let err = TraceError::SinkUnavailable {
            path: "/nonexistent/trace.csv".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/nonexistent/trace.csv"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: TraceError = io.into();
        assert!(matches!(err, TraceError::Io(_)));
    }

    #[test]
    fn test_session_closed_display() {
        assert_eq!(TraceError::SessionClosed.to_string(), "Tracer session is closed");
    }
}
