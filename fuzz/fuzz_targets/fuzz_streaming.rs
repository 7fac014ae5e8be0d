//! Fuzz target for multi-segment PDU tracking.
//!
//! The input is split into chunks by a leading length byte and fed through a
//! length-prefixed decoder, then replayed. Both passes must yield the same
//! messages.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcap_reassembly::prelude::*;

struct LengthPrefixed;

impl StreamParser for LengthPrefixed {
    fn name(&self) -> &'static str {
        "lp"
    }

    fn parse_stream(&self, data: &[u8], context: &StreamContext) -> StreamParseResult {
        let Some(&len) = data.first() else {
            return StreamParseResult::NeedMore { minimum_bytes: None };
        };
        let end = 1 + len as usize;
        if end > data.len() {
            return StreamParseResult::NeedMore {
                minimum_bytes: Some(end - data.len()),
            };
        }
        StreamParseResult::Complete {
            messages: vec![ParsedMessage::new("lp", context, &data[1..end])],
            bytes_consumed: end,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let len = data[pos] as usize;
        let end = (pos + 1 + len).min(data.len());
        chunks.push(BufferView::copy_from_slice(&data[pos + 1..end]));
        pos = end;
    }

    let key = StreamKey::new(0, Direction::ToServer);
    let ctx = StreamContext::new(0, Direction::ToServer);
    let mut r = StreamingReassembler::new("fuzz", ReassemblyConfig::default());

    let mut first = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let pinfo = PacketInfo::new(i as u64 + 1);
        match r.process_chunk(&key, &pinfo, chunk, &LengthPrefixed, &ctx) {
            Ok(out) => first.push(out),
            Err(_) => return,
        }
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let pinfo = PacketInfo::new(i as u64 + 1).visited(true);
        if let Ok(out) = r.process_chunk(&key, &pinfo, chunk, &LengthPrefixed, &ctx) {
            assert_eq!(out.messages.len(), first[i].messages.len());
        }
    }
});
