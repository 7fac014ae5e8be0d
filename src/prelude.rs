//! Convenient re-exports for common usage.
//!
//! ```rust
//! use pcap_reassembly::prelude::*;
//!
//! let table = ReassemblyTable::<AddressKey>::new("ipv4", ReassemblyConfig::default());
//! assert_eq!(table.stats().in_progress, 0);
//! ```

// Buffers and packet context
pub use crate::buffer::BufferView;
pub use crate::packet::{AddressKey, PacketInfo};

// Reassembly
pub use crate::config::ReassemblyConfig;
pub use crate::reassembly::{
    Fragment, FragmentFlags, Reassembly, ReassemblyRegistry, ReassemblyTable, Rendered,
    SeqBoundary,
};

// Streams
pub use crate::stream::{
    Direction, ParsedMessage, StreamContext, StreamKey, StreamParseResult, StreamParser,
    StreamingReassembler,
};

// Error types
pub use crate::error::{Error, Result};
