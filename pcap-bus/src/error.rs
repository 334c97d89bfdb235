//! Errors surfaced on the conversion event channel.
//!
//! None of these stop the conversion as a whole: a failing segment or input file is
//! reported and the remaining work carries on. Queue overflow is not an error at all; it
//! only bumps the `droppedPacketCount` counter.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    /// Input path could not be stat'ed, enumerated or opened
    #[error("cannot read source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Segment file write, close or delete failed
    #[error("segment I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet arrived before the capture's global header
    #[error("global header not found")]
    MissingHeader,

    /// Decoder exited with a non-zero code (`None` when killed by a signal)
    #[error("unexpected return code from decoder for {path}: {code:?}")]
    DecodeProcess { path: PathBuf, code: Option<i32> },

    /// Decoder process could not be started
    #[error("failed to start decoder for {path}: {source}")]
    DecoderSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed capture input reported by the parser
    #[error("invalid capture {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A decode task panicked or was aborted
    #[error("decode task failed: {0}")]
    DecodeTask(#[from] tokio::task::JoinError),
}
