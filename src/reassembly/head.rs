//! Per-datagram reassembly state.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::BufferView;
use crate::error::{InvariantError, ReassemblyError, Result};
use crate::packet::PacketInfo;

use super::defrag::overlay_flags;
use super::fragment::{Fragment, FragmentFlags, FragmentItem, HeadFlags};
use super::list::FragmentList;
use super::result::Reassembly;

/// Fragments collected so far for one datagram, plus its lifecycle state.
#[derive(Debug, Clone)]
pub struct FragmentHead {
    pub(crate) id: u32,
    pub(crate) list: FragmentList,
    pub(crate) state: HeadFlags,
    pub(crate) anomalies: FragmentFlags,
    /// Byte length, or last block number in block-sequence mode.
    pub(crate) datalen: u32,
    /// Highest frame that contributed so far.
    pub(crate) frame: u64,
    pub(crate) reassembled_in: u64,
    pub(crate) reassembled_in_layer: u8,
    pub(crate) data: Option<BufferView>,
    pub(crate) fragment_offset_bias: u32,
    pub(crate) result: Option<Arc<Reassembly>>,
}

impl FragmentHead {
    pub(crate) fn new(id: u32, state: HeadFlags) -> Self {
        Self {
            id,
            list: FragmentList::new(),
            state,
            anomalies: FragmentFlags::empty(),
            datalen: 0,
            frame: 0,
            reassembled_in: 0,
            reassembled_in_layer: 0,
            data: None,
            fragment_offset_bias: 0,
            result: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Known total length (or last block number).
    pub fn datalen(&self) -> Option<u32> {
        self.state
            .contains(HeadFlags::DATALEN_SET)
            .then_some(self.datalen)
    }

    pub fn is_defragmented(&self) -> bool {
        self.state.contains(HeadFlags::DEFRAGMENTED)
    }

    pub fn is_block_sequence(&self) -> bool {
        self.state.contains(HeadFlags::BLOCK_SEQUENCE)
    }

    pub fn is_partial_reassembly(&self) -> bool {
        self.state.contains(HeadFlags::PARTIAL_REASSEMBLY)
    }

    pub fn state(&self) -> HeadFlags {
        self.state
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn reassembled_in(&self) -> Option<u64> {
        self.is_defragmented().then_some(self.reassembled_in)
    }

    pub fn anomalies(&self) -> FragmentFlags {
        self.anomalies
    }

    pub fn fragments(&self) -> &FragmentList {
        &self.list
    }

    pub fn contiguous_len(&self) -> u32 {
        self.list.contiguous_len()
    }

    /// Sequence bias subtracted from incoming block numbers.
    pub fn fragment_offset_bias(&self) -> u32 {
        self.fragment_offset_bias
    }

    /// Snapshot of the completed reassembly.
    pub fn result(&self) -> Option<Arc<Reassembly>> {
        self.result.clone()
    }

    /// Bytes currently held by this head and its fragments.
    pub(crate) fn held_bytes(&self) -> usize {
        let fragments: usize = self
            .list
            .iter()
            .filter_map(|f| f.data())
            .filter(|d| !d.is_borrowed())
            .map(|d| d.len())
            .sum();
        fragments + self.data.as_ref().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether `frame` already supplied the fragment at `frag_offset`.
    pub(crate) fn was_added(&self, frame: u64, frag_offset: u32) -> bool {
        frame <= self.frame
            && self
                .list
                .iter()
                .any(|f| f.frame == frame && f.offset == frag_offset)
    }

    /// Untouched for more than `max_age` frames. A head no fragment has
    /// reached yet (bias or total set up front) never ages.
    pub(crate) fn is_stale(&self, frame: u64, max_age: u64) -> bool {
        !self.list.is_empty() && self.frame.saturating_add(max_age) < frame
    }

    pub(crate) fn recompute_frame(&mut self) {
        self.frame = self.list.iter().map(|f| f.frame).max().unwrap_or(0);
    }

    /// Rebuild the shared snapshot after a change to a completed head.
    pub(crate) fn refresh_result(&mut self) {
        self.result = match (&self.data, self.is_defragmented()) {
            (Some(data), true) => Some(Arc::new(Reassembly {
                id: self.id,
                data: data.clone(),
                datalen: self.datalen,
                frame: self.frame,
                reassembled_in: self.reassembled_in,
                reassembled_in_layer: self.reassembled_in_layer,
                anomalies: self.anomalies,
                block_sequence: self.is_block_sequence(),
                fragments: self.list.iter().map(|f| f.summary()).collect(),
            })),
            _ => None,
        };
    }

    pub(crate) fn mark_defragmented(&mut self, data: BufferView, pinfo: &PacketInfo) {
        let mut data = data;
        if let Some(old) = self.data.take() {
            data.chain(old);
        }
        self.data = Some(data);
        self.state.insert(HeadFlags::DEFRAGMENTED);
        self.reassembled_in = pinfo.frame;
        self.reassembled_in_layer = pinfo.layer;
        self.refresh_result();
        debug!(
            id = self.id,
            frame = pinfo.frame,
            len = self.data.as_ref().map(|d| d.len()).unwrap_or(0),
            fragments = self.list.len(),
            "Reassembly complete"
        );
        if !self.anomalies.is_empty() {
            warn!(id = self.id, anomalies = %self.anomalies, "Reassembly completed with anomalies");
        }
    }

    /// Add one byte-offset fragment.
    ///
    /// Returns true when the datagram is (or already was) complete.
    pub(crate) fn add_offset(
        &mut self,
        frag: &Fragment<'_>,
        frame: u64,
        pinfo: &PacketInfo,
        allow_overlaps: bool,
    ) -> Result<bool> {
        let end = frag.end()?;
        let bytes = frag.require_captured()?;

        // A fragment ending exactly at the old limit is an overlay, not growth
        if self.is_defragmented() && end > self.datalen {
            if self.is_partial_reassembly() {
                debug!(id = self.id, datalen = self.datalen, "Reopening completed reassembly");
                self.reset_defragmentation();
            } else if !allow_overlaps {
                let err = if frag.frag_offset >= self.datalen {
                    ReassemblyError::PastOldDataLimits
                } else {
                    ReassemblyError::OverlapsOldData
                };
                warn!(id = self.id, frame, offset = frag.frag_offset, "{}", err);
                return Err(err.into());
            }
        }

        self.frame = self.frame.max(frame);

        let mut item = FragmentItem::new(frame, frag.frag_offset, frag.len, None);
        if !frag.more_frags {
            if self.state.contains(HeadFlags::DATALEN_SET) {
                if self.datalen != end {
                    item.flags |= FragmentFlags::MULTIPLE_TAILS;
                    self.anomalies |= FragmentFlags::MULTIPLE_TAILS;
                }
            } else {
                self.datalen = end;
                self.state.insert(HeadFlags::DATALEN_SET);
            }
        }

        if self.is_defragmented() {
            if let Some(data) = &self.data {
                let flags = overlay_flags(data, self.datalen, frag.frag_offset, frag.len, bytes);
                item.flags |= flags;
                self.anomalies |= flags;
            }
            trace!(id = self.id, frame, offset = frag.frag_offset, flags = %item.flags, "Overlay on completed reassembly");
            self.list.insert(item);
            self.refresh_result();
            return Ok(true);
        }

        item.data = Some(BufferView::copy_from_slice(bytes));
        self.list.insert(item);
        trace!(
            id = self.id,
            frame,
            offset = frag.frag_offset,
            len = frag.len,
            contiguous = self.list.contiguous_len(),
            "Fragment linked"
        );

        if !self.state.contains(HeadFlags::DATALEN_SET) || self.list.contiguous_len() < self.datalen {
            return Ok(false);
        }

        self.defragment_offset(pinfo)?;
        Ok(true)
    }

    /// Reopen a completed byte-offset reassembly so it can grow.
    ///
    /// Fragments without bytes get a view of the superseded buffer.
    pub(crate) fn reset_defragmentation(&mut self) {
        let data = self.data.clone();
        for item in self.list.items_mut() {
            if item.data.is_none() {
                item.data = data.as_ref().and_then(|d| {
                    let offset = item.offset as usize;
                    let len = (item.len as usize).min(d.len().saturating_sub(offset));
                    d.subview(offset, len)
                });
            }
            item.flags.remove(FragmentFlags::TOO_LONG);
            item.flags.remove(FragmentFlags::MULTIPLE_TAILS);
        }
        self.clear_completion();
    }

    pub(crate) fn clear_completion(&mut self) {
        self.state.remove(HeadFlags::DEFRAGMENTED);
        self.state.remove(HeadFlags::PARTIAL_REASSEMBLY);
        self.state.remove(HeadFlags::DATALEN_SET);
        self.anomalies.remove(FragmentFlags::TOO_LONG);
        self.anomalies.remove(FragmentFlags::MULTIPLE_TAILS);
        self.datalen = 0;
        self.reassembled_in = 0;
        self.reassembled_in_layer = 0;
        self.result = None;
    }

    /// Shrink a completed byte-offset reassembly to `tot_len` bytes.
    pub(crate) fn truncate(&mut self, tot_len: u32) -> Result<()> {
        if !self.is_defragmented() {
            return Err(InvariantError::NotDefragmented { id: self.id }.into());
        }
        if self.is_block_sequence() {
            return Err(InvariantError::TruncateBlockSequence { id: self.id }.into());
        }
        if tot_len > self.datalen {
            return Err(InvariantError::TruncateBeyondEnd {
                id: self.id,
                requested: tot_len,
                datalen: self.datalen,
            }
            .into());
        }

        self.state.remove(HeadFlags::PARTIAL_REASSEMBLY);
        if tot_len == self.datalen {
            return Ok(());
        }

        if let Some(old) = self.data.take() {
            let keep = (tot_len as usize).min(old.len());
            let mut data = BufferView::copy_from_slice(&old.as_slice()[..keep]);
            data.chain(old);
            self.data = Some(data);
        }
        self.datalen = tot_len;

        let removed = self.list.truncate(tot_len);
        self.anomalies = FragmentFlags::empty();
        for item in self.list.items_mut() {
            item.flags.remove(FragmentFlags::TOO_LONG);
            item.flags.remove(FragmentFlags::MULTIPLE_TAILS);
            self.anomalies |= item.flags;
            item.data = None;
        }

        debug!(id = self.id, tot_len, dropped = removed.len(), "Reassembly truncated");
        self.refresh_result();
        Ok(())
    }
}
