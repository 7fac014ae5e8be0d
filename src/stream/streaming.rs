//! Reassembly of messages whose boundaries a decoder finds in a byte stream.
//!
//! Each chunk (typically a TCP segment's payload) is handled in two parts:
//!
//! 1. Bytes owed to a PDU opened by an earlier chunk are added to that PDU's
//!    reassembly. Once the PDU is complete the decoder sees the rebuilt buffer
//!    and may move its end backwards (the reassembly is truncated) or ask for
//!    more (it is reopened).
//! 2. Whatever follows is offered to the decoder as-is. If it runs out of data
//!    mid-message a new PDU is opened with a fresh reassembly id.
//!
//! Every frame's PDU membership and fragment offset is recorded on the first
//! pass, so later passes rebuild the same attribution from the frame number
//! alone.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::{debug, trace, warn};

use crate::buffer::BufferView;
use crate::config::ReassemblyConfig;
use crate::error::{InvariantError, Result};
use crate::packet::PacketInfo;
use crate::reassembly::{Fragment, ManagedTable, ReassemblyTable, TableStats};

use super::msp::{Pending, StreamState};
use super::{ParsedMessage, StreamContext, StreamParseResult, StreamParser};

/// What [`StreamingReassembler::process_chunk`] did with a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Bytes of the chunk accounted for, either decoded or added to a PDU.
    pub bytes_consumed: usize,
    /// Messages the decoder produced for this chunk.
    pub messages: Vec<ParsedMessage>,
}

/// Bytes at the start of a chunk that belong to an earlier PDU.
#[derive(Debug, Clone, Copy)]
struct Owed {
    msp: usize,
    len: usize,
    need_more: bool,
    reassembly_id: u32,
    frag_offset: u32,
}

fn to_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| InvariantError::LengthOverflow { len }.into())
}

/// Multi-segment PDU tracker on top of a [`ReassemblyTable`].
///
/// `K` identifies one direction of one stream; see
/// [`StreamKey`](super::StreamKey).
#[derive(Debug)]
pub struct StreamingReassembler<K> {
    table: ReassemblyTable<K>,
    streams: HashMap<K, StreamState>,
    next_id: u32,
}

impl<K> StreamingReassembler<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: impl Into<String>, config: ReassemblyConfig) -> Self {
        Self {
            table: ReassemblyTable::new(name, config),
            streams: HashMap::new(),
            next_id: 0,
        }
    }

    /// The underlying fragment table.
    pub fn table(&self) -> &ReassemblyTable<K> {
        &self.table
    }

    /// PDU state for one stream direction.
    pub fn stream(&self, key: &K) -> Option<&StreamState> {
        self.streams.get(key)
    }

    /// Drop all state, as when a new capture is loaded.
    pub fn clear(&mut self) {
        self.table.clear();
        self.streams.clear();
        self.next_id = 0;
    }

    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Process one chunk of `key`'s stream, decoding with `parser`.
    ///
    /// `context` describes the stream; frame number, reassembly id and
    /// progress counters are filled in for every parser call.
    pub fn process_chunk(
        &mut self,
        key: &K,
        pinfo: &PacketInfo,
        chunk: &BufferView,
        parser: &dyn StreamParser,
        context: &StreamContext,
    ) -> Result<ChunkOutcome> {
        let Self {
            table,
            streams,
            next_id,
        } = self;
        let state = streams.entry(key.clone()).or_default();
        let frame = pinfo.frame;
        let total = chunk.len();

        let mut ctx = context.clone();
        ctx.frame_number = frame;
        ctx.reassembly_id = None;
        ctx.bytes_parsed = 0;
        ctx.messages_parsed = 0;
        let mut out = ChunkOutcome::default();
        let mut offset = 0usize;

        let (owed, begins_here) = if pinfo.visited {
            replay_owed(state, frame, total)
        } else {
            (first_pass_owed(state, frame, total)?, None)
        };

        if let Some(mut owed) = owed {
            let mut closed = false;
            loop {
                let frag = Fragment::new(chunk, offset, to_u32(owed.len)?, owed.frag_offset, owed.need_more);
                let mut head = table.add(key, owed.reassembly_id, pinfo, frag)?;
                if head.is_none() && pinfo.visited {
                    // Retired by aging; the snapshot stays filed under its frame
                    head = table.get_reassembled(frame, owed.reassembly_id);
                }
                let data = match head {
                    Some(done)
                        if !owed.need_more
                            && done.reassembled_in() == frame
                            && done.reassembled_in_layer() == pinfo.layer =>
                    {
                        done.data().clone()
                    }
                    _ => break,
                };

                ctx.reassembly_id = Some(owed.reassembly_id);
                let result = parser.parse_stream(data.as_slice(), &ctx);
                ctx.reassembly_id = None;

                match result {
                    StreamParseResult::Complete {
                        messages,
                        bytes_consumed,
                    } => {
                        ctx.messages_parsed += messages.len();
                        out.messages.extend(messages);
                        if !pinfo.visited && bytes_consumed < data.len() {
                            let msp_len = state.msps[owed.msp].length as usize;
                            if bytes_consumed <= msp_len {
                                return Err(InvariantError::BoundaryBeforeChunk {
                                    consumed: bytes_consumed,
                                    chunk_start: msp_len,
                                }
                                .into());
                            }
                            table.truncate(key, owed.reassembly_id, to_u32(bytes_consumed)?)?;
                            owed.len = bytes_consumed - msp_len;
                            debug!(
                                id = owed.reassembly_id,
                                frame,
                                len = bytes_consumed,
                                "PDU ended early, reassembly truncated"
                            );
                        }
                    }
                    StreamParseResult::NeedMore { minimum_bytes } if !pinfo.visited => {
                        let remaining = total - offset;
                        let (len, pending) = match minimum_bytes {
                            Some(n) if n > 0 => {
                                let need = owed
                                    .len
                                    .checked_add(n)
                                    .ok_or(InvariantError::LengthOverflow { len: n })?;
                                let pending = match need.saturating_sub(remaining) {
                                    0 => None,
                                    short => Some(Pending::Bytes(to_u32(short)?)),
                                };
                                (need.min(remaining), pending)
                            }
                            _ => (remaining, Some(Pending::OneMoreChunk)),
                        };

                        let msp_len = state.msps[owed.msp].length;
                        table.truncate(key, owed.reassembly_id, msp_len)?;
                        table.set_partial_reassembly(key, owed.reassembly_id);
                        owed.len = len;
                        owed.need_more = pending.is_some();
                        state.pending = pending;
                        trace!(id = owed.reassembly_id, frame, owed = owed.len, "PDU needs more data");
                        continue;
                    }
                    StreamParseResult::NeedMore { .. } | StreamParseResult::NotThisProtocol => {}
                    StreamParseResult::Error { message, .. } => {
                        warn!(id = owed.reassembly_id, frame, "Reassembled PDU failed to parse: {}", message);
                    }
                }
                closed = true;
                break;
            }

            offset += owed.len;
            if !pinfo.visited {
                let added = to_u32(owed.len)?;
                let msp = &mut state.msps[owed.msp];
                msp.length = msp
                    .length
                    .checked_add(added)
                    .ok_or(InvariantError::LengthOverflow { len: owed.len })?;
                if closed {
                    msp.last_frame = Some(frame);
                    msp.end_offset = offset;
                    state.pending = None;
                    debug!(id = owed.reassembly_id, frame, len = msp.length, "PDU closed");
                }
            }
        }

        // Whole messages inside the chunk, then possibly the start of a new PDU
        while offset < total {
            let msp_start = begins_here.map(|idx| (idx, state.msps[idx].start_offset));
            if let Some((idx, start)) = msp_start {
                if offset >= start {
                    let msp = &state.msps[idx];
                    let frag = Fragment::new(chunk, start, to_u32(total - start)?, 0, true);
                    table.add(key, msp.reassembly_id, pinfo, frag)?;
                    offset = total;
                    break;
                }
            }
            let end = match msp_start {
                Some((_, start)) if start > offset => start,
                _ => total,
            };

            ctx.bytes_parsed = offset;
            let mut stopped = false;
            match parser.parse_stream(&chunk.as_slice()[offset..end], &ctx) {
                StreamParseResult::Complete {
                    messages,
                    bytes_consumed,
                } => {
                    ctx.messages_parsed += messages.len();
                    out.messages.extend(messages);
                    if bytes_consumed == 0 {
                        stopped = true;
                    } else {
                        offset += bytes_consumed.min(end - offset);
                    }
                }
                StreamParseResult::NeedMore { minimum_bytes } if !pinfo.visited => {
                    let len = to_u32(total - offset)?;
                    let pending = match minimum_bytes {
                        Some(n) if n > 0 => Pending::Bytes(to_u32(n)?),
                        _ => Pending::OneMoreChunk,
                    };
                    *next_id = next_id.wrapping_add(1).max(1);
                    let id = *next_id;
                    table.add(key, id, pinfo, Fragment::new(chunk, offset, len, 0, true))?;
                    state.open_msp(frame, offset, len, id);
                    state.pending = Some(pending);
                    debug!(id, frame, start = offset, len, "PDU opened");
                    offset = total;
                }
                StreamParseResult::NeedMore { .. } | StreamParseResult::NotThisProtocol => {
                    stopped = true;
                }
                StreamParseResult::Error {
                    message,
                    skip_bytes,
                } => {
                    warn!(frame, offset, "Stream parse error: {}", message);
                    match skip_bytes {
                        Some(n) if n > 0 => offset += n.min(end - offset),
                        _ => stopped = true,
                    }
                }
            }

            if stopped {
                match msp_start {
                    Some((_, start)) if start > offset => offset = start,
                    _ => break,
                }
            }
        }

        if let (false, Some(max_age)) = (pinfo.visited, table.config().max_age) {
            retire_closed(table, key, state, frame, max_age);
        }

        out.bytes_consumed = offset;
        Ok(out)
    }
}

/// Move closed PDUs last touched more than `max_age` frames ago out of the
/// in-progress map. PDUs close in creation order, so the scan stops at the
/// first one still open or recent.
fn retire_closed<K>(table: &mut ReassemblyTable<K>, key: &K, state: &mut StreamState, frame: u64, max_age: u64)
where
    K: Eq + Hash + Clone + Debug,
{
    while let Some(msp) = state.msps.get(state.retired) {
        match msp.last_frame {
            Some(last) if last.saturating_add(max_age) < frame => {
                table.retire(key, msp.reassembly_id);
                state.retired += 1;
            }
            _ => break,
        }
    }
}

/// Claim the bytes an open PDU is owed by this chunk.
fn first_pass_owed(state: &mut StreamState, frame: u64, total: usize) -> Result<Option<Owed>> {
    if total == 0 {
        return Ok(None);
    }
    let Some(pending) = state.pending.take() else {
        return Ok(None);
    };
    let (len, need_more) = match pending {
        Pending::OneMoreChunk => (total, false),
        Pending::Bytes(n) => {
            let n = n as usize;
            if n > total {
                state.pending = Some(Pending::Bytes(to_u32(n - total)?));
            }
            (n.min(total), n > total)
        }
    };

    let idx = state.last_msp.ok_or(InvariantError::NoOpenMsp)?;
    let msp = &state.msps[idx];
    let owed = Owed {
        msp: idx,
        len,
        need_more,
        reassembly_id: msp.reassembly_id,
        frag_offset: msp.length,
    };
    state.frag_offset_by_frame.insert(frame, owed.frag_offset);
    state.msp_by_frame.insert(frame, idx);
    Ok(Some(owed))
}

/// Rebuild this frame's owed bytes and the PDU it opens from the first pass.
fn replay_owed(state: &StreamState, frame: u64, total: usize) -> (Option<Owed>, Option<usize>) {
    let Some(&idx) = state.msp_by_frame.get(&frame) else {
        return (None, None);
    };
    let (prev, begins) = if state.msps[idx].first_frame == frame {
        (state.msps[idx].prev, Some(idx))
    } else {
        (Some(idx), None)
    };

    let owed = prev.and_then(|p| {
        let msp = &state.msps[p];
        let (len, need_more) = match msp.last_frame {
            Some(last) if last == frame => (msp.end_offset.min(total), false),
            Some(last) if last < frame => return None,
            _ => (total, true),
        };
        Some(Owed {
            msp: p,
            len,
            need_more,
            reassembly_id: msp.reassembly_id,
            frag_offset: state.frag_offset_by_frame.get(&frame).copied().unwrap_or(0),
        })
    });
    (owed, begins)
}

impl<K> ManagedTable for StreamingReassembler<K>
where
    K: Eq + Hash + Clone + Debug + 'static,
{
    fn name(&self) -> &str {
        self.table.name()
    }

    fn clear(&mut self) {
        StreamingReassembler::clear(self)
    }

    fn stats(&self) -> TableStats {
        StreamingReassembler::stats(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
