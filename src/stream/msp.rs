//! Multi-segment PDU bookkeeping for one stream direction.

use std::collections::HashMap;

/// A message whose bytes span several chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspNode {
    /// Frame where the PDU starts.
    pub first_frame: u64,
    /// Frame where the PDU ends; `None` while still open.
    pub last_frame: Option<u64>,
    /// Offset of the PDU start within the first frame's chunk.
    pub start_offset: usize,
    /// Offset just past the PDU end within the last frame's chunk.
    pub end_offset: usize,
    /// Bytes accumulated so far.
    pub length: u32,
    pub reassembly_id: u32,
    /// Earlier PDU in the same stream direction.
    pub prev: Option<usize>,
}

impl MspNode {
    pub fn is_open(&self) -> bool {
        self.last_frame.is_none()
    }

    /// Whether `frame` contributed bytes to this PDU.
    pub fn spans(&self, frame: u64) -> bool {
        frame >= self.first_frame && self.last_frame.map(|last| frame <= last).unwrap_or(true)
    }
}

/// How much of the next chunk belongs to the open PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// Exactly this many bytes.
    Bytes(u32),
    /// All of the next chunk.
    OneMoreChunk,
}

/// Per-direction streaming state.
///
/// PDUs are kept in creation order and linked backwards. The per-frame maps
/// written on the first pass are all a replay needs.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub(crate) msps: Vec<MspNode>,
    /// PDU whose bytes the frame's chunk starts with or begins.
    pub(crate) msp_by_frame: HashMap<u64, usize>,
    /// Offset within the reassembly of each frame's owed bytes.
    pub(crate) frag_offset_by_frame: HashMap<u64, u32>,
    pub(crate) pending: Option<Pending>,
    pub(crate) last_msp: Option<usize>,
    /// PDUs before this index have had their heads retired by aging.
    pub(crate) retired: usize,
}

impl StreamState {
    /// PDUs in creation order.
    pub fn msps(&self) -> &[MspNode] {
        &self.msps
    }

    pub fn msp(&self, index: usize) -> Option<&MspNode> {
        self.msps.get(index)
    }

    /// Most recently opened PDU.
    pub fn last_msp(&self) -> Option<&MspNode> {
        self.last_msp.and_then(|idx| self.msps.get(idx))
    }

    /// Bytes owed to the open PDU by the next chunk.
    pub fn pending(&self) -> Option<Pending> {
        self.pending
    }

    /// PDU recorded for `frame` on the first pass.
    pub fn msp_for_frame(&self, frame: u64) -> Option<&MspNode> {
        self.msp_by_frame.get(&frame).and_then(|idx| self.msps.get(*idx))
    }

    pub(crate) fn open_msp(&mut self, frame: u64, start_offset: usize, length: u32, reassembly_id: u32) -> usize {
        let idx = self.msps.len();
        self.msps.push(MspNode {
            first_frame: frame,
            last_frame: None,
            start_offset,
            end_offset: 0,
            length,
            reassembly_id,
            prev: self.last_msp,
        });
        self.last_msp = Some(idx);
        self.msp_by_frame.insert(frame, idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: New PDUs link back to the previous one
    #[test]
    fn test_open_links_previous() {
        let mut state = StreamState::default();
        let a = state.open_msp(1, 10, 20, 1);
        let b = state.open_msp(4, 0, 5, 2);

        assert_eq!(state.msps()[b].prev, Some(a));
        assert_eq!(state.last_msp().map(|m| m.reassembly_id), Some(2));
        assert_eq!(state.msp_for_frame(1).map(|m| m.start_offset), Some(10));
        assert!(state.msp_for_frame(2).is_none());
    }

    // Test 2: Span covers open PDUs indefinitely
    #[test]
    fn test_spans() {
        let mut node = MspNode {
            first_frame: 3,
            last_frame: None,
            start_offset: 0,
            end_offset: 0,
            length: 0,
            reassembly_id: 1,
            prev: None,
        };
        assert!(node.is_open());
        assert!(node.spans(100));
        assert!(!node.spans(2));

        node.last_frame = Some(5);
        assert!(node.spans(5));
        assert!(!node.spans(6));
    }
}
