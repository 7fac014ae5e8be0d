//! Reassembly keyed by per-fragment sequence numbers.
//!
//! Some link layers number every frame and only mark the first and last
//! fragment of a datagram. Each datagram is filed under the sequence number of
//! its first fragment, with block numbers relative to it. Fragments that
//! arrive before their First are filed under a guessed start and moved once
//! the real First shows up.

use std::fmt::Debug;
use std::hash::Hash;

use tracing::{debug, trace};

use crate::packet::PacketInfo;

use super::fragment::{Fragment, FragmentItem, HeadFlags};
use super::head::FragmentHead;
use super::sequence::SeqMode;
use super::table::{AddResult, ReassemblyTable};

/// Which ends of a datagram a fragment carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqBoundary {
    pub first: bool,
    pub last: bool,
}

impl SeqBoundary {
    pub const FIRST: Self = Self {
        first: true,
        last: false,
    };
    pub const MIDDLE: Self = Self {
        first: false,
        last: false,
    };
    pub const LAST: Self = Self {
        first: false,
        last: true,
    };
    pub const ONLY: Self = Self {
        first: true,
        last: true,
    };
}

impl<K> ReassemblyTable<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Add a fragment identified by its own sequence number `seq`.
    ///
    /// `frag.frag_offset` and `frag.more_frags` are ignored; position comes
    /// from `seq` and `boundary`. Looks back at most
    /// [`max_single_fragments`](crate::ReassemblyConfig::max_single_fragments)
    /// sequence numbers for the start of the datagram.
    pub fn add_seq_single(
        &mut self,
        key: &K,
        seq: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        boundary: SeqBoundary,
    ) -> AddResult {
        self.add_seq_single_work(key, seq, pinfo, frag, boundary, None)
    }

    /// Like [`add_seq_single`](Self::add_seq_single), evicting candidate
    /// reassemblies untouched for more than `max_age` frames.
    pub fn add_seq_single_aging(
        &mut self,
        key: &K,
        seq: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        boundary: SeqBoundary,
        max_age: u64,
    ) -> AddResult {
        self.add_seq_single_work(key, seq, pinfo, frag, boundary, Some(max_age))
    }

    fn add_seq_single_work(
        &mut self,
        key: &K,
        seq: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        boundary: SeqBoundary,
        max_age: Option<u64>,
    ) -> AddResult {
        if pinfo.visited {
            return Ok(self.reassembled.get(&(pinfo.frame, seq)).cloned());
        }
        let max_frags = self.config.max_single_fragments;

        let frag_number = if boundary.first {
            self.adopt_early_fragments(key, seq, pinfo, max_age, max_frags);
            0
        } else {
            self.find_first(key, seq, pinfo, max_age, max_frags)
        };

        let first_id = seq.wrapping_sub(frag_number);
        if boundary.last {
            self.release_next_datagram(key, seq, first_id, frag_number);
        }

        let frag = Fragment {
            frag_offset: frag_number,
            more_frags: !boundary.last,
            ..frag
        };
        self.seq_check_work(key, first_id, pinfo, frag, SeqMode::Numbered, true)
    }

    /// File a First under `seq`, pulling in any of its fragments that were
    /// guessed into an earlier datagram.
    fn adopt_early_fragments(
        &mut self,
        key: &K,
        seq: u32,
        pinfo: &PacketInfo,
        max_age: Option<u64>,
        max_frags: u32,
    ) {
        let first_key = (key.clone(), seq);
        if let Some(age) = max_age {
            self.evict_if_stale(&first_key, pinfo.frame, age);
        }
        self.in_progress
            .entry(first_key.clone())
            .or_insert_with(|| FragmentHead::new(seq, HeadFlags::BLOCK_SEQUENCE));

        let Some(back) = (1..max_frags)
            .find(|n| self.in_progress.contains_key(&(key.clone(), seq.wrapping_sub(*n))))
        else {
            return;
        };
        let prev_key = (key.clone(), seq.wrapping_sub(back));
        let Some(prev) = self.in_progress.get_mut(&prev_key) else {
            return;
        };

        let mut moved = prev.list.split_off_from(back);
        if moved.is_empty() {
            return;
        }
        prev.recompute_frame();
        let moved_tail = take_datalen_from(prev, back);
        let prev_empty = prev.list.is_empty();

        for f in &mut moved {
            f.offset -= back;
        }
        trace!(table = %self.name(), seq, from = prev_key.1, moved = moved.len(), "Adopting early fragments");
        if let Some(head) = self.in_progress.get_mut(&first_key) {
            absorb(head, moved, moved_tail);
        }
        if prev_empty {
            self.in_progress.remove(&prev_key);
        }
    }

    /// Block number of a non-First fragment, creating a guessed datagram one
    /// sequence number back when no start is found.
    fn find_first(
        &mut self,
        key: &K,
        seq: u32,
        pinfo: &PacketInfo,
        max_age: Option<u64>,
        max_frags: u32,
    ) -> u32 {
        for back in 1..max_frags {
            let candidate = (key.clone(), seq.wrapping_sub(back));
            if let Some(age) = max_age {
                if self.evict_if_stale(&candidate, pinfo.frame, age) {
                    continue;
                }
            }
            if let Some(head) = self.in_progress.get(&candidate) {
                // A datagram whose Last came before this sequence number is closed
                if head.datalen().is_some_and(|last| last < back) {
                    break;
                }
                return back;
            }
        }

        let guessed = seq.wrapping_sub(1);
        debug!(table = %self.name(), seq, guessed, "No First found, guessing start");
        self.in_progress
            .entry((key.clone(), guessed))
            .or_insert_with(|| FragmentHead::new(guessed, HeadFlags::BLOCK_SEQUENCE));
        1
    }

    /// Hand fragments past a Last over to the datagram that follows it.
    fn release_next_datagram(&mut self, key: &K, seq: u32, first_id: u32, frag_number: u32) {
        let shift = frag_number.saturating_add(1);
        let Some(head) = self.in_progress.get_mut(&(key.clone(), first_id)) else {
            return;
        };
        let mut beyond = head.list.split_off_from(shift);
        if beyond.is_empty() {
            return;
        }
        head.recompute_frame();

        // Fragments right after a Last must be a First; anything else there is bad data
        let bad = beyond.iter().take_while(|f| f.offset == shift).count();
        let dropped: u64 = beyond
            .drain(..bad)
            .filter_map(|f| f.data)
            .map(|d| d.len() as u64)
            .sum();
        self.stats.released_bytes += dropped;
        if beyond.is_empty() {
            return;
        }

        let carried_tail = if head.datalen().is_some_and(|last| last > frag_number) {
            take_datalen_from(head, shift)
        } else {
            None
        };

        for f in &mut beyond {
            f.offset -= shift;
        }
        let next_id = seq.wrapping_add(1);
        trace!(table = %self.name(), seq, next_id, moved = beyond.len(), "Moving fragments past Last");
        let next = self
            .in_progress
            .entry((key.clone(), next_id))
            .or_insert_with(|| FragmentHead::new(next_id, HeadFlags::BLOCK_SEQUENCE));
        absorb(next, beyond, carried_tail);
    }
}

/// Take the last block number from `head`, rebased by `shift`.
fn take_datalen_from(head: &mut FragmentHead, shift: u32) -> Option<u32> {
    let last = head.datalen()?;
    if last < shift {
        return None;
    }
    head.state.remove(HeadFlags::DATALEN_SET);
    head.datalen = 0;
    Some(last - shift)
}

fn absorb(head: &mut FragmentHead, items: Vec<FragmentItem>, last_block: Option<u32>) {
    if let Some(frame) = items.iter().map(|f| f.frame).max() {
        head.frame = head.frame.max(frame);
    }
    head.list.merge(items);
    if let Some(last) = last_block {
        head.datalen = last;
        head.state.insert(HeadFlags::DATALEN_SET);
    }
}
