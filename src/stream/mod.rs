//! Multi-segment PDU reassembly for byte-stream protocols.
//!
//! ## Components
//!
//! - [`StreamParser`] - Trait for decoders that find message boundaries
//! - [`StreamingReassembler`] - Tracks PDUs spanning chunks and reassembles them
//! - [`StreamState`] / [`MspNode`] - Per-direction PDU history
//!
//! ## Example
//!
//! ```rust,no_run
//! use pcap_reassembly::stream::{Direction, StreamContext, StreamKey, StreamingReassembler};
//! use pcap_reassembly::{BufferView, PacketInfo, ReassemblyConfig};
//! # use pcap_reassembly::stream::{StreamParser, StreamParseResult};
//! # struct Http;
//! # impl StreamParser for Http {
//! #     fn name(&self) -> &'static str { "http" }
//! #     fn parse_stream(&self, _: &[u8], _: &StreamContext) -> StreamParseResult {
//! #         StreamParseResult::NotThisProtocol
//! #     }
//! # }
//!
//! let mut reassembler = StreamingReassembler::new("http", ReassemblyConfig::default());
//! let key = StreamKey::new(7, Direction::ToServer);
//! let context = StreamContext::new(7, Direction::ToServer);
//!
//! let chunk = BufferView::from(&b"GET / HTTP/1.1\r\n"[..]);
//! let outcome = reassembler
//!     .process_chunk(&key, &PacketInfo::new(1), &chunk, &Http, &context)
//!     .unwrap();
//! println!("{} messages", outcome.messages.len());
//! ```

mod context;
mod msp;
mod parser;
mod streaming;

pub use context::{Direction, ParsedMessage, StreamContext, StreamKey, StreamParseResult};
pub use msp::{MspNode, Pending, StreamState};
pub use parser::StreamParser;
pub use streaming::{ChunkOutcome, StreamingReassembler};
