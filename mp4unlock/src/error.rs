use crate::{job::JobState, keys::Kid};
use std::{io, path::PathBuf};
use thiserror::Error;

/// The error type returned by a decrypt job.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing input filename")]
    MissingInput,

    #[error("missing output filename")]
    MissingOutput,

    #[error("cannot open input file ({}) {}", .path.display(), os_code(.source))]
    CannotOpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open output file ({}) {}", .path.display(), os_code(.source))]
    CannotOpenOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed key '{input}': {reason}")]
    MalformedKey { input: String, reason: String },

    #[error("failed to process the file ({}): {}", .0.code(), .0)]
    Transform(#[from] DecryptError),
}

impl Error {
    pub(crate) fn malformed_key<T: Into<String>, U: ToString>(input: T, reason: U) -> Self {
        Self::MalformedKey {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    /// The job state in which the failure happened.
    pub fn stage(&self) -> JobState {
        match self {
            Self::MalformedKey { .. } => JobState::Created,
            Self::MissingInput
            | Self::MissingOutput
            | Self::CannotOpenInput { .. }
            | Self::CannotOpenOutput { .. } => JobState::Opening,
            Self::Transform(_) => JobState::Transforming,
        }
    }

    /// Numeric result code of the underlying failure, if there is one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::CannotOpenInput { source, .. } | Self::CannotOpenOutput { source, .. } => {
                source.raw_os_error()
            }
            Self::Transform(e) => Some(e.code()),
            _ => None,
        }
    }
}

fn os_code(error: &io::Error) -> i32 {
    error.raw_os_error().unwrap_or(-1)
}

/// Errors raised by a decryption strategy while transforming the file.
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid MP4 format: {0}")]
    Parse(#[from] mp4unlock_boxes::Error),

    #[error("invalid MP4 format: {0}")]
    InvalidFormat(String),

    #[error("key not found for KID {0}")]
    KeyNotFound(Kid),

    #[error("key not found for track {0}")]
    TrackKeyNotFound(u32),

    #[error("subsample data error: {0}")]
    SubsampleError(String),

    #[error("invalid padding after decryption (wrong key?)")]
    Padding,

    #[error("plaintext length mismatch: expected {expected} bytes, got {actual} bytes")]
    PlaintextLengthMismatch { expected: u64, actual: u64 },

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("chunk offset {0} does not fit in a 32-bit stco table")]
    OffsetOverflow(u64),

    #[error("decrypt worker panicked")]
    WorkerPanicked,
}

impl DecryptError {
    /// Numeric result code, the operating system error for I/O failures.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | -9   | I/O failure without an os error |
    /// | -10  | invalid format or padding |
    /// | -11  | missing key |
    /// | -12  | out of range |
    /// | -13  | internal failure |
    /// | -18  | unsupported content |
    pub fn code(&self) -> i32 {
        match self {
            Self::Io(e) => e.raw_os_error().unwrap_or(-9),
            Self::Parse(_)
            | Self::InvalidFormat(_)
            | Self::Padding
            | Self::PlaintextLengthMismatch { .. } => -10,
            Self::KeyNotFound(_) | Self::TrackKeyNotFound(_) => -11,
            Self::SubsampleError(_) | Self::OffsetOverflow(_) => -12,
            Self::WorkerPanicked => -13,
            Self::Unsupported(_) => -18,
        }
    }
}
