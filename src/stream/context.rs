use bytes::Bytes;

/// Direction of data flow in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToServer,
    ToClient,
}

impl Direction {
    /// Return a string representation of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToServer => "to_server",
            Direction::ToClient => "to_client",
        }
    }
}

/// One direction of one stream.
///
/// Multi-segment PDU state is kept separately for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub stream_id: u64,
    pub direction: Direction,
}

impl StreamKey {
    pub fn new(stream_id: u64, direction: Direction) -> Self {
        Self {
            stream_id,
            direction,
        }
    }
}

/// Context for stream parsing.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub stream_id: u64,
    pub direction: Direction,
    /// Frame whose chunk is being decoded
    pub frame_number: u64,
    /// Set when the data handed to the parser is a reassembled PDU
    pub reassembly_id: Option<u32>,
    /// Bytes of the current chunk already decoded
    pub bytes_parsed: usize,
    /// Messages already decoded from the current chunk
    pub messages_parsed: usize,
}

impl StreamContext {
    pub fn new(stream_id: u64, direction: Direction) -> Self {
        Self {
            stream_id,
            direction,
            frame_number: 0,
            reassembly_id: None,
            bytes_parsed: 0,
            messages_parsed: 0,
        }
    }
}

/// Result of stream parsing.
#[derive(Debug, Clone)]
pub enum StreamParseResult {
    /// Successfully parsed one or more messages.
    ///
    /// `bytes_consumed` smaller than the data marks where the last message
    /// ended.
    Complete {
        messages: Vec<ParsedMessage>,
        bytes_consumed: usize,
    },

    /// Need more data before parsing can proceed.
    ///
    /// `Some(n)`: exactly `n` more bytes past the offered data.
    /// `None`: at least one more chunk.
    NeedMore { minimum_bytes: Option<usize> },

    /// This stream doesn't match our protocol.
    NotThisProtocol,

    /// Parse error - stream is malformed.
    Error {
        message: String,
        skip_bytes: Option<usize>,
    },
}

/// A decoded application-layer message.
///
/// The payload is owned since messages may outlive the chunk they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub protocol: &'static str,
    pub stream_id: u64,
    pub message_id: u32,
    pub direction: Direction,
    pub frame_number: u64,
    /// Reassembly the message was decoded from, if it spanned chunks
    pub reassembly_id: Option<u32>,
    pub payload: Bytes,
}

impl ParsedMessage {
    /// Message decoded in `context` carrying `payload`.
    pub fn new(protocol: &'static str, context: &StreamContext, payload: &[u8]) -> Self {
        Self {
            protocol,
            stream_id: context.stream_id,
            message_id: context.messages_parsed as u32,
            direction: context.direction,
            frame_number: context.frame_number,
            reassembly_id: context.reassembly_id,
            payload: Bytes::copy_from_slice(payload),
        }
    }
}
