//! Error types for pcap-reassembly.
//!
//! Reassembly operations return [`Result`], whose error side is a tagged
//! outcome:
//!
//! - [`Error::Conflict`] wraps a [`ReassemblyError`]: a later frame contradicts
//!   an already completed reassembly. The calling decoder reports the frame as
//!   malformed and carries on with the rest of the capture.
//! - [`Error::Fatal`] wraps an [`InvariantError`]: the caller handed the engine
//!   impossible input (a decoder bug). These should fail loudly in tests.
//!
//! Overlaps, conflicting overlaps, over-long fragments and multiple tails are
//! not errors; they are recorded as [`FragmentFlags`](crate::FragmentFlags) on
//! the result.

use thiserror::Error;

/// Main error type for reassembly operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Recoverable contradiction of previously reassembled state.
    #[error("Reassembly error: {0}")]
    Conflict(#[from] ReassemblyError),

    /// Caller supplied input that violates an engine invariant.
    #[error("Invariant violation: {0}")]
    Fatal(#[from] InvariantError),
}

impl Error {
    /// Whether this error indicates a caller bug rather than bad capture data.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// The reassembly conflict, if this is a recoverable error.
    pub fn as_conflict(&self) -> Option<&ReassemblyError> {
        match self {
            Error::Conflict(e) => Some(e),
            Error::Fatal(_) => None,
        }
    }
}

/// Recoverable reassembly errors.
///
/// The state that triggered one of these is left untouched, so an unrelated
/// later frame can still use the reassembly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Fragment starts at or past the end of a completed reassembly.
    #[error("New fragment past old data limits")]
    PastOldDataLimits,

    /// Fragment overlaps a completed reassembly that was not marked extendable.
    #[error("New fragment overlaps old data (retransmission?)")]
    OverlapsOldData,

    /// A fragment's block number exceeds the announced block count.
    #[error("Bad total reassembly block count")]
    BadBlockCount,

    /// A completed block-sequence reassembly disagrees with a new total.
    #[error("Defragmented complete but total length not satisfied")]
    TotalLengthNotSatisfied,

    /// Defragmentation found a hole before a fragment.
    #[error("dfpos < offset: fragment at {offset} starts past reassembled position {position}")]
    InternalGap { offset: u32, position: u32 },

    /// A fragment that should still hold bytes has none.
    #[error("no data for fragment at offset {offset} (frame {frame})")]
    MissingData { frame: u64, offset: u32 },

    /// The same (frame, offset) fragment was added to a completed reassembly.
    #[error("Frame already added in first pass")]
    AlreadyAdded { frame: u64 },
}

/// Invariant violations raised for caller (decoder) bugs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    /// The fragment claims more bytes than the buffer holds.
    #[error("fragment of {len} bytes at buffer offset {offset} exceeds captured length {captured}")]
    BeyondCaptured {
        offset: usize,
        len: u32,
        captured: usize,
    },

    /// `offset + len` does not fit in the offset space.
    #[error("fragment offset {offset} + length {len} overflows")]
    OffsetOverflow { offset: u32, len: u32 },

    /// Block number lies below the sequence bias set for the reassembly.
    #[error("block number {number} is below sequence bias {bias}")]
    BelowSequenceBias { number: u32, bias: u32 },

    /// Operation requires a completed reassembly.
    #[error("reassembly {id} has not been defragmented")]
    NotDefragmented { id: u32 },

    /// Truncation is only defined for byte-offset reassemblies.
    #[error("reassembly {id} uses block sequence numbers and cannot be truncated")]
    TruncateBlockSequence { id: u32 },

    /// Truncation target larger than the reassembled data.
    #[error("cannot truncate reassembly {id} to {requested} bytes, only {datalen} reassembled")]
    TruncateBeyondEnd { id: u32, requested: u32, datalen: u32 },

    /// A streaming decoder moved a PDU boundary into an earlier frame.
    #[error("decoder ended PDU at {consumed} bytes, before this chunk's data at {chunk_start}")]
    BoundaryBeforeChunk { consumed: usize, chunk_start: usize },

    /// A length reported by a streaming decoder does not fit the offset space.
    #[error("PDU length {len} overflows the reassembly offset space")]
    LengthOverflow { len: usize },

    /// Streaming state expected an open multi-segment PDU.
    #[error("no open multi-segment PDU for stream")]
    NoOpenMsp,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_messages() {
        let err: Error = ReassemblyError::PastOldDataLimits.into();
        assert!(!err.is_fatal());
        assert_eq!(
            err.as_conflict().map(|e| e.to_string()),
            Some("New fragment past old data limits".to_string())
        );

        let err: Error = ReassemblyError::OverlapsOldData.into();
        assert_eq!(
            err.to_string(),
            "Reassembly error: New fragment overlaps old data (retransmission?)"
        );
    }

    #[test]
    fn test_fatal_is_fatal() {
        let err: Error = InvariantError::OffsetOverflow {
            offset: u32::MAX,
            len: 2,
        }
        .into();
        assert!(err.is_fatal());
        assert!(err.as_conflict().is_none());
    }
}
