use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplatError {
    /// Non-200 response, missing `Content-Length`, or a failure while the
    /// body was streaming.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Malformed PLY header or body.
    #[error("Invalid PLY data: {0}")]
    Format(String),

    #[error("The sort worker is no longer running.")]
    WorkerClosed,

    #[error("An I/O error occurred: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = SplatError::Transfer("404 Unable to load http://host/a.splat".to_string());
        assert_eq!(
            err.to_string(),
            "Transfer failed: 404 Unable to load http://host/a.splat"
        );

        let err = SplatError::Format("No 'end_header' found".to_string());
        assert_eq!(err.to_string(), "Invalid PLY data: No 'end_header' found");
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;

        let err = SplatError::from(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(matches!(err, SplatError::Io(_)));
        assert!(err.source().is_some());
    }
}
