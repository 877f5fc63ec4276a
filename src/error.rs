//! Error taxonomy mirroring the capture pipeline's failure domains: a
//! misconfigured option, a missing OS resource, a codec failure, or a mux
//! failure. Init-time errors are always fatal; see each call site's doc
//! comment for whether a given error degrades a single stream or the whole
//! process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpotlightError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("mux error: {0}")]
    Mux(String),

    #[error("display capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("display connection lost: {0}")]
    DisplayLost(String),

    #[error("audio device read error: {0}")]
    AudioReadError(String),
}

pub type Result<T> = std::result::Result<T, SpotlightError>;
