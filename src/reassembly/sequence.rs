//! Block-sequence reassembly.
//!
//! Fragments carry a block number instead of a byte offset; the datagram is
//! complete once blocks `0..=last` are all present and is built by
//! concatenating them in order.

use std::fmt::Debug;
use std::hash::Hash;

use tracing::{debug, trace};

use crate::buffer::BufferView;
use crate::error::{InvariantError, Result};
use crate::packet::PacketInfo;

use super::fragment::{Fragment, HeadFlags};
use super::head::FragmentHead;
use super::table::{AddResult, ReassemblyTable};

/// How block numbers are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeqMode {
    /// The caller supplies the block number.
    Numbered,
    /// Numbered, but a lone final fragment with no reassembly in progress
    /// is a complete datagram (802.11 retransmission quirk).
    Ieee80211,
    /// Blocks are numbered in arrival order.
    Unnumbered,
}

/// Outcome of linking one block.
pub(crate) enum SeqAdded {
    Pending,
    /// The head in the in-progress table is complete.
    InTable,
    /// A lone final fragment that never entered the table.
    Lone(FragmentHead),
}

/// Head for a final fragment that stands on its own.
fn lone_fragment(id: u32, pinfo: &PacketInfo, bytes: &[u8]) -> FragmentHead {
    let mut head = FragmentHead::new(
        id,
        HeadFlags::BLOCK_SEQUENCE | HeadFlags::DATALEN_SET | HeadFlags::DEFRAGMENTED,
    );
    head.data = Some(BufferView::copy_from_slice(bytes));
    head.frame = pinfo.frame;
    head.reassembled_in = pinfo.frame;
    head.reassembled_in_layer = pinfo.layer;
    head.refresh_result();
    head
}

impl<K> ReassemblyTable<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Add a block-sequence fragment; `frag.frag_offset` is the block number.
    ///
    /// Like [`add`](Self::add), the head stays in the in-progress table after
    /// completion.
    pub fn add_seq(&mut self, key: &K, id: u32, pinfo: &PacketInfo, frag: Fragment<'_>) -> AddResult {
        let map_key = (key.clone(), id);
        Ok(match self.seq_common(key, id, pinfo, frag, SeqMode::Numbered)? {
            SeqAdded::Pending => None,
            SeqAdded::InTable => self.in_progress.get(&map_key).and_then(|h| h.result()),
            SeqAdded::Lone(head) => head.result(),
        })
    }

    /// Add a block-sequence fragment, moving the result to the reassembled
    /// cache on completion.
    pub fn add_seq_check(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
    ) -> AddResult {
        self.seq_check_work(key, id, pinfo, frag, SeqMode::Numbered, false)
    }

    /// Like [`add_seq_check`](Self::add_seq_check), but a final fragment with
    /// no reassembly in progress is returned as a complete datagram.
    pub fn add_seq_802_11(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
    ) -> AddResult {
        self.seq_check_work(key, id, pinfo, frag, SeqMode::Ieee80211, false)
    }

    /// Add the next block of a sequence whose fragments carry no number.
    ///
    /// `frag.frag_offset` is ignored; the block number is one past the last
    /// block already linked.
    pub fn add_seq_next(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
    ) -> AddResult {
        self.seq_check_work(key, id, pinfo, frag, SeqMode::Unnumbered, false)
    }

    /// Set the number subtracted from incoming block numbers, creating the
    /// reassembly if needed.
    pub fn add_seq_offset(&mut self, key: &K, id: u32, pinfo: &PacketInfo, bias: u32) {
        let head = self
            .in_progress
            .entry((key.clone(), id))
            .or_insert_with(|| FragmentHead::new(id, HeadFlags::BLOCK_SEQUENCE));
        head.fragment_offset_bias = bias;
        trace!(table = %self.name(), id, frame = pinfo.frame, bias, "Sequence bias set");
    }

    /// Start a block sequence whose last block number is known up front.
    pub fn start_seq_check(&mut self, key: &K, id: u32, pinfo: &PacketInfo, tot_len: u32) {
        if pinfo.visited {
            return;
        }
        self.in_progress
            .entry((key.clone(), id))
            .or_insert_with(|| {
                let mut head = FragmentHead::new(id, HeadFlags::BLOCK_SEQUENCE | HeadFlags::DATALEN_SET);
                head.datalen = tot_len;
                head
            });
    }

    /// Finish an unnumbered sequence at the last block added.
    ///
    /// Gaps left by declined fragments are skipped.
    pub fn end_seq_next(&mut self, key: &K, id: u32, pinfo: &PacketInfo) -> AddResult {
        if pinfo.visited {
            return Ok(self.reassembled.get(&(pinfo.frame, id)).cloned());
        }
        let map_key = (key.clone(), id);
        let Some(head) = self.in_progress.get_mut(&map_key) else {
            return Ok(None);
        };
        if !head.is_block_sequence() || head.state.contains(HeadFlags::DATALEN_SET) {
            return Ok(None);
        }

        head.datalen = head.list.last().map(|f| f.offset).unwrap_or(0);
        head.state.insert(HeadFlags::DATALEN_SET);
        head.defragment_blocks(pinfo)?;
        self.stats.completed += 1;

        let Some(head) = self.in_progress.remove(&map_key) else {
            return Ok(None);
        };
        let result = self.store_reassembled(head, pinfo, id, false);
        if let Some(done) = &result {
            self.reassembled.insert((pinfo.frame, id), done.clone());
        }
        Ok(result)
    }

    pub(crate) fn seq_check_work(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        mode: SeqMode,
        single: bool,
    ) -> AddResult {
        if pinfo.visited {
            return Ok(self.reassembled.get(&(pinfo.frame, id)).cloned());
        }
        match self.seq_common(key, id, pinfo, frag, mode)? {
            SeqAdded::Pending => Ok(None),
            SeqAdded::Lone(head) => Ok(self.store_reassembled(head, pinfo, id, single)),
            SeqAdded::InTable => Ok(self
                .in_progress
                .remove(&(key.clone(), id))
                .and_then(|head| self.store_reassembled(head, pinfo, id, single))),
        }
    }

    fn seq_common(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        mode: SeqMode,
    ) -> Result<SeqAdded> {
        let map_key = (key.clone(), id);
        if pinfo.visited {
            return Ok(match self.in_progress.get(&map_key) {
                Some(head) if head.is_defragmented() => SeqAdded::InTable,
                _ => SeqAdded::Pending,
            });
        }
        let Some(bytes) = frag.bytes() else {
            debug!(table = %self.name(), id, frame = pinfo.frame, "Short fragment declined");
            return Ok(SeqAdded::Pending);
        };

        self.age_out(&map_key, pinfo.frame);
        let lone_mode = matches!(mode, SeqMode::Ieee80211 | SeqMode::Unnumbered);
        let block = match self.in_progress.get(&map_key) {
            None if lone_mode && !frag.more_frags => {
                trace!(table = %self.name(), id, frame = pinfo.frame, "Unfragmented datagram");
                self.stats.completed += 1;
                return Ok(SeqAdded::Lone(lone_fragment(id, pinfo, bytes)));
            }
            None if mode == SeqMode::Unnumbered => 0,
            Some(head) if mode == SeqMode::Unnumbered => {
                head.list.last().map(|f| f.offset + 1).unwrap_or(0)
            }
            Some(head) => {
                let bias = head.fragment_offset_bias;
                frag.frag_offset
                    .checked_sub(bias)
                    .ok_or(InvariantError::BelowSequenceBias {
                        number: frag.frag_offset,
                        bias,
                    })?
            }
            None => frag.frag_offset,
        };

        let head = self
            .in_progress
            .entry(map_key)
            .or_insert_with(|| FragmentHead::new(id, HeadFlags::BLOCK_SEQUENCE));
        let was_complete = head.is_defragmented();
        if !head.add_block(&frag, block, pinfo)? {
            return Ok(SeqAdded::Pending);
        }
        if !was_complete {
            self.stats.completed += 1;
        }
        Ok(SeqAdded::InTable)
    }
}
