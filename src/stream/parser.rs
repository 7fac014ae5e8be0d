use super::{StreamContext, StreamParseResult};

/// Trait for decoders that find message boundaries in a byte stream.
pub trait StreamParser: Send + Sync {
    /// Protocol identifier (e.g., "http", "tls").
    fn name(&self) -> &'static str;

    /// Decode messages from `data`.
    ///
    /// Called on every unit the reassembler hands over: the unfragmented part
    /// of a chunk, or a reassembled multi-segment PDU. Parser should be
    /// stateless; all state is managed by the reassembler.
    fn parse_stream(&self, data: &[u8], context: &StreamContext) -> StreamParseResult;
}
