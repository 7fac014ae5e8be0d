//! # pcap-reassembly
//!
//! Fragment, block-sequence and multi-segment PDU reassembly for packet
//! capture analysis.
//!
//! Protocol decoders hand the engine fragments as they meet them while walking
//! a capture; the engine hands back the rebuilt datagram once every piece has
//! arrived. Out-of-order delivery, retransmissions, overlapping and conflicting
//! data, partial captures and repeated passes over the same capture are all
//! handled, with byte-for-byte reconstruction.
//!
//! ## Quick Start
//!
//! ```rust
//! use pcap_reassembly::prelude::*;
//!
//! let mut table = ReassemblyTable::<u32>::new("ip", ReassemblyConfig::default());
//!
//! let tail = BufferView::from(&b"world"[..]);
//! let head = BufferView::from(&b"hello "[..]);
//!
//! // Second half first
//! let pending = table
//!     .add_check(&1, 42, &PacketInfo::new(1), Fragment::whole(&tail, 6, false))
//!     .unwrap();
//! assert!(pending.is_none());
//!
//! let done = table
//!     .add_check(&1, 42, &PacketInfo::new(2), Fragment::whole(&head, 0, true))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(done.data().as_slice(), b"hello world");
//! assert_eq!(done.reassembled_in(), 2);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        pcap-reassembly                              |
//! +---------------------------------------------------------------------+
//! |  reassembly/ - fragment lists, tables, defragmentation, registry    |
//! |  stream/     - multi-segment PDU tracking for byte streams          |
//! |  buffer      - BufferView over bytes::Bytes                         |
//! |  packet      - per-packet context, conversation keys                |
//! |  config      - behaviour toggles                                    |
//! |  error       - Error types                                          |
//! +---------------------------------------------------------------------+
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod packet;
pub mod prelude;
pub mod reassembly;
pub mod stream;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferView, Ownership};
pub use config::ReassemblyConfig;
pub use error::{Error, InvariantError, ReassemblyError, Result};
pub use packet::{AddressKey, PacketInfo};
pub use reassembly::{
    AddResult, Fragment, FragmentFlags, FragmentHead, FragmentItem, FragmentList,
    FragmentSummary, HeadFlags, ManagedTable, Reassembly, ReassemblyRegistry, ReassemblyTable,
    Rendered, SeqBoundary, TableId, TableStats,
};
pub use stream::{
    ChunkOutcome, Direction, MspNode, ParsedMessage, StreamContext, StreamKey, StreamParseResult,
    StreamParser, StreamingReassembler,
};
