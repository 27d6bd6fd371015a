//! Error types for the capture engine

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while analysing, capturing or stitching a page
#[derive(Error, Debug)]
pub enum Error {
    /// A session was requested while another one is still running
    #[error("A capture session is already in progress")]
    CaptureInProgress,

    /// The viewport capture primitive failed or was denied
    #[error("Viewport capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// A strategy name that does not map to a known capture strategy
    #[error("Unknown capture strategy: {0}")]
    UnknownStrategy(String),

    /// Capturing a scrollable region failed (soft, never surfaces from a session)
    #[error("Capture of scrollable region {index} failed: {reason}")]
    RegionCaptureFailed { index: usize, reason: String },

    /// Capturing an embedded frame failed (soft, never surfaces from a session)
    #[error("Capture of frame {index} failed: {reason}")]
    FrameCaptureFailed { index: usize, reason: String },

    /// The host refused or failed a scroll request
    #[error("Scroll failed: {0}")]
    ScrollError(String),

    /// The host could not report page geometry
    #[error("Page inspection failed: {0}")]
    InspectionError(String),

    /// Failed to encode a raster
    #[error("Image encoding failed: {0}")]
    EncodeError(String),

    /// Failed to decode a raster returned by the host
    #[error("Image decoding failed: {0}")]
    DecodeError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The caller cancelled the session
    #[error("Capture cancelled")]
    Cancelled,

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Region and frame failures are contained by the capture loop.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::RegionCaptureFailed { .. } | Error::FrameCaptureFailed { .. }
        )
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sub_capture_failures_are_soft() {
        assert!(Error::RegionCaptureFailed { index: 0, reason: "gone".into() }.is_soft());
        assert!(Error::FrameCaptureFailed { index: 2, reason: "denied".into() }.is_soft());
        assert!(!Error::CaptureInProgress.is_soft());
        assert!(!Error::CaptureUnavailable("denied".into()).is_soft());
        assert!(!Error::Cancelled.is_soft());
    }

    #[test]
    fn messages_carry_context() {
        let e = Error::FrameCaptureFailed { index: 3, reason: "cross-origin".into() };
        assert_eq!(e.to_string(), "Capture of frame 3 failed: cross-origin");
    }
}
