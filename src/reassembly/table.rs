//! In-progress and reassembled tables.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::BufferView;
use crate::config::ReassemblyConfig;
use crate::error::{ReassemblyError, Result};
use crate::packet::PacketInfo;

use super::defrag::overlay_flags;
use super::fragment::{Fragment, FragmentFlags, HeadFlags};
use super::head::FragmentHead;
use super::result::Reassembly;

/// Result of adding a fragment: the completed reassembly, if any.
pub type AddResult = Result<Option<Arc<Reassembly>>>;

/// Counters for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Heads currently collecting fragments.
    pub in_progress: usize,
    /// (frame, id) entries in the reassembled cache.
    pub reassembled_entries: usize,
    /// Reassemblies completed since the last reset.
    pub completed: u64,
    /// Heads dropped by aging.
    pub evicted: u64,
    /// Fragment and buffer bytes released by eviction and deletion.
    pub released_bytes: u64,
}

/// Fragment tables for one protocol.
///
/// `K` identifies the conversation (addresses, ports, ...) and is combined with
/// a 32-bit reassembly id. Completed reassemblies made by the `*_check`
/// variants move to a cache keyed by (frame, id) so later passes over the
/// capture can find them from any contributing frame.
#[derive(Debug)]
pub struct ReassemblyTable<K> {
    name: String,
    pub(crate) config: ReassemblyConfig,
    pub(crate) in_progress: HashMap<(K, u32), FragmentHead>,
    pub(crate) reassembled: HashMap<(u64, u32), Arc<Reassembly>>,
    pub(crate) stats: TableStats,
}

impl<K> ReassemblyTable<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: impl Into<String>, config: ReassemblyConfig) -> Self {
        Self {
            name: name.into(),
            config,
            in_progress: HashMap::new(),
            reassembled: HashMap::new(),
            stats: TableStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    // ========================================================================
    // Byte-offset reassembly
    // ========================================================================

    /// Add a byte-offset fragment.
    ///
    /// The head stays in the in-progress table after completion, so later
    /// fragments are laid over the result. When `check_already_added` is set
    /// in the config, a (frame, offset) pair already in the reassembly is
    /// ignored.
    pub fn add(&mut self, key: &K, id: u32, pinfo: &PacketInfo, frag: Fragment<'_>) -> AddResult {
        let check = self.config.check_already_added;
        self.add_common(key, id, pinfo, frag, check, pinfo.frame)
    }

    /// Like [`add`](Self::add) but never suppresses repeated frames.
    pub fn add_multiple_ok(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
    ) -> AddResult {
        self.add_common(key, id, pinfo, frag, false, pinfo.frame)
    }

    /// Like [`add`](Self::add) but attributes the fragment to `frag_frame`.
    ///
    /// For protocols that buffer data and hand it over in a later frame.
    pub fn add_out_of_order(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        frag_frame: u64,
    ) -> AddResult {
        let check = self.config.check_already_added;
        self.add_common(key, id, pinfo, frag, check, frag_frame)
    }

    fn add_common(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        check_already_added: bool,
        frag_frame: u64,
    ) -> AddResult {
        frag.require_captured()?;
        let end = frag.end()?;
        let map_key = (key.clone(), id);

        if pinfo.visited {
            return match self.in_progress.get(&map_key) {
                Some(head) if head.is_defragmented() => {
                    if frag_frame > head.frame {
                        return Err(ReassemblyError::OverlapsOldData.into());
                    }
                    if end > head.datalen {
                        return Err(if frag.frag_offset >= head.datalen {
                            ReassemblyError::PastOldDataLimits
                        } else {
                            ReassemblyError::OverlapsOldData
                        }
                        .into());
                    }
                    trace!(table = %self.name, id, frame = pinfo.frame, "Replay hit");
                    Ok(head.result())
                }
                _ => Ok(None),
            };
        }

        self.age_out(&map_key, frag_frame);
        if check_already_added {
            if let Some(head) = self.in_progress.get(&map_key) {
                if head.was_added(frag_frame, frag.frag_offset) {
                    if head.is_defragmented() {
                        return Err(ReassemblyError::AlreadyAdded { frame: frag_frame }.into());
                    }
                    trace!(table = %self.name, id, frame = frag_frame, "Fragment already added");
                    return Ok(None);
                }
            }
        }

        let head = self
            .in_progress
            .entry(map_key)
            .or_insert_with(|| FragmentHead::new(id, HeadFlags::empty()));
        let was_complete = head.is_defragmented();
        if !head.add_offset(&frag, frag_frame, pinfo, false)? {
            return Ok(None);
        }
        if !was_complete {
            self.stats.completed += 1;
        }
        Ok(head.result())
    }

    /// Add a byte-offset fragment, moving the result to the reassembled cache
    /// on completion.
    ///
    /// Fragments that were not fully captured are declined.
    pub fn add_check(&mut self, key: &K, id: u32, pinfo: &PacketInfo, frag: Fragment<'_>) -> AddResult {
        self.add_check_with_fallback(key, id, pinfo, frag, pinfo.frame)
    }

    /// Like [`add_check`](Self::add_check), but when no reassembly is in
    /// progress and `fallback_frame` resolves to a completed one, the fragment
    /// is treated as a late retransmission of it.
    pub fn add_check_with_fallback(
        &mut self,
        key: &K,
        id: u32,
        pinfo: &PacketInfo,
        frag: Fragment<'_>,
        fallback_frame: u64,
    ) -> AddResult {
        if pinfo.visited {
            return Ok(self.reassembled.get(&(pinfo.frame, id)).cloned());
        }
        let bytes = match frag.bytes() {
            Some(bytes) => bytes,
            None => {
                debug!(table = %self.name, id, frame = pinfo.frame, "Short fragment declined");
                return Ok(None);
            }
        };
        frag.end()?;

        let map_key = (key.clone(), id);
        self.age_out(&map_key, pinfo.frame);
        if !self.in_progress.contains_key(&map_key) && fallback_frame != pinfo.frame {
            if let Some(done) = self.reassembled.get(&(fallback_frame, id)).cloned() {
                return Ok(Some(self.late_retransmission(id, pinfo, &frag, bytes, &done)));
            }
        }

        let head = self
            .in_progress
            .entry(map_key.clone())
            .or_insert_with(|| FragmentHead::new(id, HeadFlags::empty()));
        if !head.add_offset(&frag, pinfo.frame, pinfo, false)? {
            return Ok(None);
        }
        self.stats.completed += 1;
        Ok(self
            .in_progress
            .remove(&map_key)
            .and_then(|head| self.store_reassembled(head, pinfo, id, false)))
    }

    /// File the completed reassembly under the retransmitting frame too.
    ///
    /// The shared snapshot is left as the first pass built it. Differing
    /// bytes are only logged.
    fn late_retransmission(
        &mut self,
        id: u32,
        pinfo: &PacketInfo,
        frag: &Fragment<'_>,
        bytes: &[u8],
        done: &Arc<Reassembly>,
    ) -> Arc<Reassembly> {
        self.reassembled.insert((pinfo.frame, id), done.clone());

        let flags = overlay_flags(done.data(), done.datalen(), frag.frag_offset, frag.len, bytes);
        if flags.contains(FragmentFlags::OVERLAP_CONFLICT) || flags.contains(FragmentFlags::TOO_LONG) {
            warn!(
                table = %self.name,
                id,
                frame = pinfo.frame,
                reassembled_in = done.reassembled_in(),
                anomalies = %flags,
                "Late retransmission differs from reassembled data"
            );
        } else {
            debug!(table = %self.name, id, frame = pinfo.frame, "Late retransmission");
        }
        done.clone()
    }

    /// Move a completed head into the reassembled cache.
    ///
    /// Every contributing frame gets an entry; `single` keys each entry by the
    /// fragment's own sequence number instead of `id`.
    pub(crate) fn store_reassembled(
        &mut self,
        mut head: FragmentHead,
        pinfo: &PacketInfo,
        id: u32,
        single: bool,
    ) -> Option<Arc<Reassembly>> {
        head.state.insert(HeadFlags::DEFRAGMENTED);
        head.reassembled_in = pinfo.frame;
        head.reassembled_in_layer = pinfo.layer;
        head.refresh_result();
        let result = head.result()?;

        if head.list.is_empty() {
            self.reassembled.insert((pinfo.frame, id), result.clone());
        } else {
            for f in head.list.iter() {
                let entry_id = if single { id.wrapping_add(f.offset) } else { id };
                self.reassembled.insert((f.frame, entry_id), result.clone());
            }
        }
        debug!(
            table = %self.name,
            id,
            frame = pinfo.frame,
            len = result.len(),
            "Reassembly moved to reassembled cache"
        );
        Some(result)
    }

    // ========================================================================
    // Length adjustments
    // ========================================================================

    /// Set the total length (or last block number) of an in-progress reassembly.
    pub fn set_tot_len(&mut self, key: &K, id: u32, tot_len: u32) -> Result<()> {
        let Some(head) = self.in_progress.get_mut(&(key.clone(), id)) else {
            return Ok(());
        };

        let mut max_offset = 0;
        if head.is_block_sequence() {
            for f in head.list.iter() {
                if f.offset > max_offset {
                    max_offset = f.offset;
                    if max_offset > tot_len {
                        warn!(table = %self.name, id, tot_len, max_offset, "Bad block count");
                        return Err(ReassemblyError::BadBlockCount.into());
                    }
                }
            }
        }

        if head.is_defragmented() {
            let reached = if head.is_block_sequence() {
                max_offset
            } else {
                head.datalen
            };
            if reached != tot_len {
                warn!(table = %self.name, id, tot_len, reached, "Total length not satisfied");
                return Err(ReassemblyError::TotalLengthNotSatisfied.into());
            }
        }

        head.datalen = tot_len;
        head.state.insert(HeadFlags::DATALEN_SET);
        Ok(())
    }

    /// Replace the total length, reopening a completed reassembly if needed.
    pub fn reset_tot_len(&mut self, key: &K, id: u32, tot_len: u32) {
        let Some(head) = self.in_progress.get_mut(&(key.clone(), id)) else {
            return;
        };
        head.state.remove(HeadFlags::PARTIAL_REASSEMBLY);
        if head.datalen == tot_len {
            return;
        }
        if head.is_defragmented() {
            if head.is_block_sequence() {
                head.reopen_blocks();
            } else {
                head.reset_defragmentation();
            }
        }
        head.datalen = tot_len;
        head.state.insert(HeadFlags::DATALEN_SET);
        debug!(table = %self.name, id, tot_len, "Total length reset");
    }

    /// Current total length (or last block number) of an in-progress reassembly.
    pub fn tot_len(&self, key: &K, id: u32) -> Option<u32> {
        self.in_progress.get(&(key.clone(), id)).map(|h| h.datalen)
    }

    /// Shrink a completed byte-offset reassembly to `tot_len` bytes.
    pub fn truncate(&mut self, key: &K, id: u32, tot_len: u32) -> Result<()> {
        match self.in_progress.get_mut(&(key.clone(), id)) {
            Some(head) => head.truncate(tot_len),
            None => Ok(()),
        }
    }

    /// Allow a completed reassembly to grow with the next fragment past its end.
    ///
    /// Only a fragment ending beyond the current length reopens it. One that
    /// ends at or before that limit is laid over the completed data and the
    /// flag stays set.
    ///
    /// Returns false if no such reassembly is in progress.
    pub fn set_partial_reassembly(&mut self, key: &K, id: u32) -> bool {
        match self.in_progress.get_mut(&(key.clone(), id)) {
            Some(head) => {
                head.state.insert(HeadFlags::PARTIAL_REASSEMBLY);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Lookups and maintenance
    // ========================================================================

    /// The in-progress head for `(key, id)`.
    pub fn get(&self, key: &K, id: u32) -> Option<&FragmentHead> {
        self.in_progress.get(&(key.clone(), id))
    }

    /// Completed reassembly reachable from `frame`.
    pub fn get_reassembled(&self, frame: u64, id: u32) -> Option<Arc<Reassembly>> {
        self.reassembled.get(&(frame, id)).cloned()
    }

    /// Completed reassembly reachable from the current frame.
    pub fn get_reassembled_id(&self, pinfo: &PacketInfo, id: u32) -> Option<Arc<Reassembly>> {
        self.get_reassembled(pinfo.frame, id)
    }

    /// Drop an in-progress reassembly, returning its reassembled buffer if any.
    pub fn delete(&mut self, key: &K, id: u32) -> Option<BufferView> {
        let mut head = self.in_progress.remove(&(key.clone(), id))?;
        let data = head.data.take();
        self.stats.released_bytes += head.held_bytes() as u64;
        debug!(table = %self.name, id, "Reassembly deleted");
        data
    }

    /// Evict every in-progress head untouched for more than `max_age` frames.
    ///
    /// Returns the number of heads evicted.
    pub fn evict_aged(&mut self, frame: u64, max_age: u64) -> usize {
        let mut released = 0u64;
        let before = self.in_progress.len();
        self.in_progress.retain(|_, head| {
            let keep = !head.is_stale(frame, max_age);
            if !keep {
                released += head.held_bytes() as u64;
            }
            keep
        });
        let evicted = before - self.in_progress.len();
        if evicted > 0 {
            self.stats.evicted += evicted as u64;
            self.stats.released_bytes += released;
            debug!(table = %self.name, frame, max_age, evicted, "Evicted aged reassemblies");
        }
        evicted
    }

    /// Evict one head if it is older than `max_age` frames.
    pub(crate) fn evict_if_stale(&mut self, map_key: &(K, u32), frame: u64, max_age: u64) -> bool {
        let stale = self
            .in_progress
            .get(map_key)
            .map(|h| h.is_stale(frame, max_age))
            .unwrap_or(false);
        if !stale {
            return false;
        }
        if let Some(head) = self.in_progress.remove(map_key) {
            self.stats.evicted += 1;
            self.stats.released_bytes += head.held_bytes() as u64;
            debug!(table = %self.name, id = map_key.1, head_frame = head.frame, frame, "Evicted aged reassembly");
        }
        true
    }

    /// Apply the configured aging threshold to the head at `map_key` before
    /// `frame` adds to it. A stale head is evicted and a fresh one started.
    pub(crate) fn age_out(&mut self, map_key: &(K, u32), frame: u64) -> bool {
        match self.config.max_age {
            Some(age) => self.evict_if_stale(map_key, frame, age),
            None => false,
        }
    }

    /// Retire a completed head into the reassembled cache under the frame
    /// that completed it. Returns false if there was nothing to retire.
    pub(crate) fn retire(&mut self, key: &K, id: u32) -> bool {
        let map_key = (key.clone(), id);
        let Some(result) = self.in_progress.get(&map_key).and_then(|h| h.result()) else {
            return false;
        };
        if let Some(head) = self.in_progress.remove(&map_key) {
            let fragments: usize = head
                .list
                .iter()
                .filter_map(|f| f.data())
                .filter(|d| !d.is_borrowed())
                .map(|d| d.len())
                .sum();
            self.stats.evicted += 1;
            self.stats.released_bytes += fragments as u64;
        }
        self.reassembled.insert((result.reassembled_in(), id), result);
        trace!(table = %self.name, id, "Completed reassembly retired");
        true
    }

    /// Drop all state, as when a new capture is loaded.
    pub fn clear(&mut self) {
        self.in_progress.clear();
        self.reassembled.clear();
        self.stats = TableStats::default();
        debug!(table = %self.name, "Table cleared");
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            in_progress: self.in_progress.len(),
            reassembled_entries: self.reassembled.len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Table = ReassemblyTable<u32>;

    fn table() -> Table {
        ReassemblyTable::new("test", ReassemblyConfig::default())
    }

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    // Test 1: Retransmitted frame is ignored before completion
    #[test]
    fn test_already_added_ignored() {
        let mut t = table();
        let buf = BufferView::from(payload(10, 0));
        let p1 = PacketInfo::new(1);

        assert!(t.add(&7, 1, &p1, Fragment::whole(&buf, 0, true)).unwrap().is_none());
        assert!(t.add(&7, 1, &p1, Fragment::whole(&buf, 0, true)).unwrap().is_none());
        assert_eq!(t.get(&7, 1).unwrap().fragments().len(), 1);

        // Without the check the duplicate is linked
        t.add_multiple_ok(&7, 1, &p1, Fragment::whole(&buf, 0, true)).unwrap();
        assert_eq!(t.get(&7, 1).unwrap().fragments().len(), 2);
    }

    // Test 2: Replay returns the same result only when complete
    #[test]
    fn test_replay_lookup() {
        let mut t = table();
        let a = BufferView::from(payload(8, 0));
        let b = BufferView::from(payload(8, 8));
        t.add(&1, 5, &PacketInfo::new(1), Fragment::whole(&a, 0, true)).unwrap();
        let done = t
            .add(&1, 5, &PacketInfo::new(2), Fragment::whole(&b, 8, false))
            .unwrap()
            .unwrap();

        let replay = t
            .add(&1, 5, &PacketInfo::new(1).visited(true), Fragment::whole(&a, 0, true))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&done, &replay));

        let err = t
            .add(&1, 5, &PacketInfo::new(9).visited(true), Fragment::whole(&a, 0, true))
            .unwrap_err();
        assert_eq!(err.as_conflict(), Some(&ReassemblyError::OverlapsOldData));
    }

    // Test 3: Check variant moves the result to the reassembled cache
    #[test]
    fn test_add_check_moves_result() {
        let mut t = table();
        let a = BufferView::from(payload(4, 0));
        let b = BufferView::from(payload(4, 4));
        assert!(t
            .add_check(&1, 3, &PacketInfo::new(10), Fragment::whole(&a, 0, true))
            .unwrap()
            .is_none());
        let done = t
            .add_check(&1, 3, &PacketInfo::new(11), Fragment::whole(&b, 4, false))
            .unwrap()
            .unwrap();

        assert!(t.get(&1, 3).is_none());
        assert_eq!(t.stats().reassembled_entries, 2);
        assert!(Arc::ptr_eq(&t.get_reassembled(10, 3).unwrap(), &done));
        assert!(Arc::ptr_eq(
            &t.get_reassembled_id(&PacketInfo::new(11), 3).unwrap(),
            &done
        ));
    }

    // Test 4: Short captures are declined by the check variant
    #[test]
    fn test_add_check_short_capture() {
        let mut t = table();
        let buf = BufferView::from(payload(4, 0));
        let frag = Fragment::new(&buf, 0, 40, 0, false);
        assert!(t.add_check(&1, 1, &PacketInfo::new(1), frag).unwrap().is_none());
        assert!(t.get(&1, 1).is_none());

        // ...but are a caller bug for the plain variant
        assert!(t.add(&1, 1, &PacketInfo::new(1), frag).unwrap_err().is_fatal());
    }

    // Test 5: Late retransmission resolves through the fallback frame
    #[test]
    fn test_late_retransmission() {
        let mut t = table();
        let a = BufferView::from(payload(4, 0));
        let b = BufferView::from(payload(4, 4));
        t.add_check(&1, 3, &PacketInfo::new(1), Fragment::whole(&a, 0, true)).unwrap();
        let done = t
            .add_check(&1, 3, &PacketInfo::new(2), Fragment::whole(&b, 4, false))
            .unwrap()
            .unwrap();

        let bad = BufferView::from(payload(4, 100));
        let late = t
            .add_check_with_fallback(&1, 3, &PacketInfo::new(5), Fragment::whole(&bad, 4, false), 2)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&late, &done));
        assert!(late.anomalies().is_empty());
        assert!(Arc::ptr_eq(&t.get_reassembled(5, 3).unwrap(), &done));

        // Replay of the first pass sees exactly what it saw before
        let replay = t
            .add_check(&1, 3, &PacketInfo::new(2).visited(true), Fragment::whole(&b, 4, false))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&replay, &done));
        assert!(replay.anomalies().is_empty());
        assert_eq!(t.stats().reassembled_entries, 3);
    }

    // Test 6: Bad block counts are rejected without changing the head
    #[test]
    fn test_set_tot_len_block_count() {
        let mut t = table();
        let buf = BufferView::from(payload(4, 0));
        t.add_seq(&1, 1, &PacketInfo::new(1), Fragment::whole(&buf, 5, true)).unwrap();

        let err = t.set_tot_len(&1, 1, 3).unwrap_err();
        assert_eq!(err.as_conflict(), Some(&ReassemblyError::BadBlockCount));
        assert_eq!(t.get(&1, 1).unwrap().datalen(), None);

        t.set_tot_len(&1, 1, 5).unwrap();
        assert_eq!(t.tot_len(&1, 1), Some(5));
    }

    // Test 7: Completed offset head rejects a different total length
    #[test]
    fn test_set_tot_len_after_completion() {
        let mut t = table();
        let buf = BufferView::from(payload(6, 0));
        t.add(&1, 1, &PacketInfo::new(1), Fragment::whole(&buf, 0, false)).unwrap();

        let err = t.set_tot_len(&1, 1, 8).unwrap_err();
        assert_eq!(err.as_conflict(), Some(&ReassemblyError::TotalLengthNotSatisfied));
        t.set_tot_len(&1, 1, 6).unwrap();
    }

    // Test 8: reset_tot_len reopens and the next fragment completes
    #[test]
    fn test_reset_tot_len() {
        let mut t = table();
        let a = BufferView::from(payload(6, 0));
        t.add(&1, 1, &PacketInfo::new(1), Fragment::whole(&a, 0, false)).unwrap();

        t.reset_tot_len(&1, 1, 10);
        let head = t.get(&1, 1).unwrap();
        assert!(!head.is_defragmented());
        assert_eq!(head.datalen(), Some(10));

        let b = BufferView::from(payload(4, 6));
        let done = t
            .add(&1, 1, &PacketInfo::new(2), Fragment::whole(&b, 6, true))
            .unwrap()
            .unwrap();
        assert_eq!(done.data().as_slice(), payload(10, 0).as_slice());
    }

    // Test 9: Aged heads are evicted and their bytes counted once
    #[test]
    fn test_evict_aged() {
        let mut t = table();
        let buf = BufferView::from(payload(10, 0));
        t.add(&1, 1, &PacketInfo::new(1), Fragment::whole(&buf, 0, true)).unwrap();
        t.add(&1, 2, &PacketInfo::new(8), Fragment::whole(&buf, 0, true)).unwrap();

        assert_eq!(t.evict_aged(10, 5), 1);
        assert_eq!(t.evict_aged(10, 5), 0);
        assert!(t.get(&1, 1).is_none());
        assert!(t.get(&1, 2).is_some());

        let stats = t.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.released_bytes, 10);
    }

    // Test 10: Configured aging replaces a stale head instead of extending it
    #[test]
    fn test_config_max_age() {
        let mut t = ReassemblyTable::new("aged", ReassemblyConfig::default().with_max_age(5));
        let buf = BufferView::from(payload(10, 0));
        t.add(&1, 1, &PacketInfo::new(1), Fragment::whole(&buf, 0, true)).unwrap();
        t.add(&2, 1, &PacketInfo::new(1000), Fragment::whole(&buf, 0, true)).unwrap();

        t.add(&1, 1, &PacketInfo::new(1001), Fragment::whole(&buf, 10, true)).unwrap();
        let head = t.get(&1, 1).unwrap();
        assert_eq!(head.fragments().len(), 1);
        assert_eq!(head.fragments().items()[0].frame(), 1001);

        let stats = t.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.released_bytes, 10);
        assert_eq!(stats.in_progress, 2);

        // Fresh heads are not touched
        t.add(&2, 1, &PacketInfo::new(1002), Fragment::whole(&buf, 10, true)).unwrap();
        assert_eq!(t.get(&2, 1).unwrap().fragments().len(), 2);
        assert_eq!(t.stats().evicted, 1);
    }

    // Test 11: Check variants age too
    #[test]
    fn test_config_max_age_check() {
        let mut t = ReassemblyTable::new("aged", ReassemblyConfig::default().with_max_age(5));
        let a = BufferView::from(payload(4, 0));
        let b = BufferView::from(payload(4, 4));
        t.add_check(&1, 1, &PacketInfo::new(1), Fragment::whole(&b, 4, false)).unwrap();

        // Too late to pair with the stale tail
        assert!(t
            .add_check(&1, 1, &PacketInfo::new(20), Fragment::whole(&a, 0, true))
            .unwrap()
            .is_none());
        assert_eq!(t.get(&1, 1).unwrap().fragments().len(), 1);
        assert_eq!(t.stats().evicted, 1);

        let s = BufferView::from(payload(2, 0));
        t.add_seq_check(&1, 2, &PacketInfo::new(30), Fragment::whole(&s, 0, true)).unwrap();
        t.add_seq_check(&1, 2, &PacketInfo::new(40), Fragment::whole(&s, 1, false)).unwrap();
        assert_eq!(t.get(&1, 2).unwrap().fragments().len(), 1);
        assert_eq!(t.stats().evicted, 2);
    }

    // Test 12: clear resets everything
    #[test]
    fn test_clear() {
        let mut t = table();
        let buf = BufferView::from(payload(4, 0));
        t.add_check(&1, 1, &PacketInfo::new(1), Fragment::whole(&buf, 0, false)).unwrap();
        assert_eq!(t.stats().completed, 1);

        t.clear();
        assert_eq!(t.stats(), TableStats::default());
    }
}
