// SYNOID Vid2Vid Errors
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use std::path::PathBuf;
use thiserror::Error;

/// Every way a vid2vid run can fail. All of them are fatal to the run and
/// none leave a partial output file behind.
#[derive(Error, Debug)]
pub enum Vid2VidError {
    #[error("Failed to read source video {path:?}: {reason}")]
    SourceRead { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stream transformer initialization failed: {0}")]
    TransformerInit(String),

    #[error("Transform failed at frame {index}: {reason}")]
    Transform { index: usize, reason: String },

    #[error("Failed to write output video {path:?}: {reason}")]
    SinkWrite { path: PathBuf, reason: String },
}

impl Vid2VidError {
    pub fn source_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn sink_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SinkWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Index of the offending source frame, for mid-run transform failures.
    pub fn frame_index(&self) -> Option<usize> {
        match self {
            Self::Transform { index, .. } => Some(*index),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Vid2VidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_index_only_on_transform() {
        let err = Vid2VidError::Transform {
            index: 7,
            reason: "boom".to_string(),
        };
        assert_eq!(err.frame_index(), Some(7));
        assert!(err.to_string().contains("frame 7"));

        let err = Vid2VidError::InvalidConfig("scale".to_string());
        assert_eq!(err.frame_index(), None);
    }
}
