//! Merging fragment bytes into one buffer.
//!
//! Offset mode copies each fragment to its byte offset; block-sequence mode
//! concatenates one fragment per block number. In both modes data received
//! earlier wins: overlapping bytes are compared, never overwritten, and a
//! mismatch is recorded as `OVERLAP_CONFLICT`.

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::buffer::BufferView;
use crate::error::{ReassemblyError, Result};
use crate::packet::PacketInfo;

use super::fragment::{Fragment, FragmentFlags, FragmentItem, HeadFlags};
use super::head::FragmentHead;

/// Flags for a fragment laid over an already reassembled byte buffer.
pub(crate) fn overlay_flags(
    data: &BufferView,
    datalen: u32,
    offset: u32,
    len: u32,
    bytes: &[u8],
) -> FragmentFlags {
    let mut flags = FragmentFlags::OVERLAP;
    match offset.checked_add(len) {
        Some(end) if end <= datalen => {
            if !data.mem_eq(offset as usize, bytes) {
                flags |= FragmentFlags::OVERLAP_CONFLICT;
            }
        }
        _ => flags |= FragmentFlags::TOO_LONG,
    }
    flags
}

fn missing(item: &FragmentItem) -> ReassemblyError {
    ReassemblyError::MissingData {
        frame: item.frame,
        offset: item.offset,
    }
}

impl FragmentHead {
    /// Merge a byte-offset list covering `[0, datalen)` into one buffer.
    ///
    /// Nothing is modified when an error is returned.
    pub(crate) fn defragment_offset(&mut self, pinfo: &PacketInfo) -> Result<()> {
        let datalen = self.datalen;
        let mut buf = BytesMut::zeroed(datalen as usize);
        let mut item_flags = vec![FragmentFlags::empty(); self.list.len()];
        let mut dfpos: u32 = 0;

        for (idx, item) in self.list.iter().enumerate() {
            if item.len == 0 {
                continue;
            }
            let end = item.end();
            let mut flags = FragmentFlags::empty();

            if end > dfpos {
                if item.offset >= datalen {
                    flags |= FragmentFlags::TOO_LONG;
                } else if dfpos < item.offset {
                    return Err(ReassemblyError::InternalGap {
                        offset: item.offset,
                        position: dfpos,
                    }
                    .into());
                } else {
                    let src = item.data.as_ref().ok_or_else(|| missing(item))?;
                    let mut fraglen = item.len;
                    if end > datalen {
                        flags |= FragmentFlags::TOO_LONG;
                        fraglen = datalen - item.offset;
                    }
                    if src.len() < fraglen as usize {
                        return Err(missing(item).into());
                    }
                    let src = &src.as_slice()[..fraglen as usize];
                    let start = item.offset as usize;
                    let overlap = ((dfpos - item.offset).min(fraglen)) as usize;
                    if overlap > 0 {
                        flags |= FragmentFlags::OVERLAP;
                        if buf[start..start + overlap] != src[..overlap] {
                            flags |= FragmentFlags::OVERLAP_CONFLICT;
                        }
                    }
                    buf[start + overlap..start + fraglen as usize].copy_from_slice(&src[overlap..]);
                }
            } else {
                // Entirely inside data already copied
                flags |= FragmentFlags::OVERLAP;
                if let Some(src) = &item.data {
                    let start = item.offset.min(datalen) as usize;
                    let stop = end.min(datalen) as usize;
                    let n = stop - start;
                    if n > 0 && (src.len() < n || buf[start..stop] != src.as_slice()[..n]) {
                        flags |= FragmentFlags::OVERLAP_CONFLICT;
                    }
                }
            }

            item_flags[idx] = flags;
            dfpos = dfpos.max(end);
        }

        for (item, flags) in self.list.items_mut().iter_mut().zip(item_flags) {
            item.flags |= flags;
            self.anomalies |= flags;
            item.data = None;
        }
        self.mark_defragmented(BufferView::new(buf.freeze()), pinfo);
        Ok(())
    }

    /// Add one block-sequence fragment numbered `block` (bias already removed).
    ///
    /// Returns true when the datagram is (or already was) complete. A fragment
    /// whose bytes were not fully captured is declined.
    pub(crate) fn add_block(
        &mut self,
        frag: &Fragment<'_>,
        block: u32,
        pinfo: &PacketInfo,
    ) -> Result<bool> {
        let bytes = match frag.bytes() {
            Some(bytes) => bytes,
            None => {
                debug!(id = self.id, frame = pinfo.frame, block, "Short fragment declined");
                return Ok(false);
            }
        };

        if self.is_defragmented() && block > self.datalen {
            if self.is_partial_reassembly() {
                debug!(id = self.id, last_block = self.datalen, "Reopening completed block sequence");
                self.reopen_blocks();
            } else {
                let err = ReassemblyError::PastOldDataLimits;
                warn!(id = self.id, frame = pinfo.frame, block, "{}", err);
                return Err(err.into());
            }
        }

        self.frame = self.frame.max(pinfo.frame);

        let mut item = FragmentItem::new(pinfo.frame, block, frag.len, None);
        if !frag.more_frags {
            if self.state.contains(HeadFlags::DATALEN_SET) {
                if self.datalen != block {
                    item.flags |= FragmentFlags::MULTIPLE_TAILS;
                    self.anomalies |= FragmentFlags::MULTIPLE_TAILS;
                }
            } else {
                self.datalen = block;
                self.state.insert(HeadFlags::DATALEN_SET);
            }
        }

        if self.is_defragmented() {
            let flags = self.block_overlay_flags(block, bytes);
            item.flags |= flags;
            self.anomalies |= flags;
            self.list.insert(item);
            self.refresh_result();
            return Ok(true);
        }

        if frag.len > 0 {
            item.data = Some(BufferView::copy_from_slice(bytes));
        }
        let pos = self.list.insert(item);
        trace!(id = self.id, frame = pinfo.frame, block, len = frag.len, "Block linked");

        if !self.state.contains(HeadFlags::DATALEN_SET) {
            return Ok(false);
        }

        // Length of the run 0, 1, 2, ... present in the list
        let mut run: u64 = 0;
        for f in self.list.iter() {
            if u64::from(f.offset) == run {
                run += 1;
            }
        }
        let last = u64::from(self.datalen);
        if run <= last {
            return Ok(false);
        }
        if run > last + 1 {
            self.list.items_mut()[pos].flags |= FragmentFlags::TOO_LONG;
            self.anomalies |= FragmentFlags::TOO_LONG;
        }

        self.defragment_blocks(pinfo)?;
        Ok(true)
    }

    fn block_overlay_flags(&self, block: u32, bytes: &[u8]) -> FragmentFlags {
        let mut flags = FragmentFlags::OVERLAP;
        if block > self.datalen {
            return flags | FragmentFlags::TOO_LONG;
        }

        // Position of `block` in the reassembled buffer
        let mut dfpos = 0usize;
        let mut last: Option<u32> = None;
        let mut existing = None;
        for f in self.list.iter() {
            if f.offset == block {
                existing = Some(f);
                break;
            }
            if last != Some(f.offset) {
                dfpos += f.len as usize;
            }
            last = Some(f.offset);
        }

        if let Some(existing) = existing {
            let same = existing.len as usize == bytes.len()
                && self
                    .data
                    .as_ref()
                    .map(|d| d.mem_eq(dfpos, bytes))
                    .unwrap_or(false);
            if !same {
                flags |= FragmentFlags::OVERLAP_CONFLICT;
            }
        }
        flags
    }

    /// Concatenate blocks `0..=datalen` into one buffer.
    ///
    /// Missing block numbers are skipped, which lets a caller end a sequence
    /// early. Nothing is modified when an error is returned.
    pub(crate) fn defragment_blocks(&mut self, pinfo: &PacketInfo) -> Result<()> {
        let last_block = self.datalen;
        let mut size = 0usize;
        let mut prev: Option<u32> = None;
        for f in self.list.iter().take_while(|f| f.offset <= last_block) {
            if prev != Some(f.offset) {
                size += f.len as usize;
            }
            prev = Some(f.offset);
        }

        let mut buf = BytesMut::with_capacity(size);
        let mut item_flags = vec![FragmentFlags::empty(); self.list.len()];
        let mut last: Option<&FragmentItem> = None;

        for (idx, item) in self
            .list
            .iter()
            .enumerate()
            .take_while(|(_, f)| f.offset <= last_block)
        {
            if item.len > 0 {
                match last {
                    Some(prev) if prev.offset == item.offset => {
                        let mut flags = FragmentFlags::OVERLAP;
                        let same = prev.len == item.len
                            && match (&prev.data, &item.data) {
                                (Some(a), Some(b)) => a.as_slice() == b.as_slice(),
                                _ => false,
                            };
                        if !same {
                            flags |= FragmentFlags::OVERLAP_CONFLICT;
                        }
                        item_flags[idx] = flags;
                    }
                    _ => {
                        let src = item.data.as_ref().ok_or_else(|| missing(item))?;
                        let src = src
                            .as_slice()
                            .get(..item.len as usize)
                            .ok_or_else(|| missing(item))?;
                        buf.extend_from_slice(src);
                    }
                }
            }
            last = Some(item);
        }

        for (item, flags) in self.list.items_mut().iter_mut().zip(item_flags) {
            item.flags |= flags;
            self.anomalies |= flags;
            item.data = None;
        }
        self.mark_defragmented(BufferView::new(buf.freeze()), pinfo);
        Ok(())
    }

    /// Reopen a completed block sequence so more blocks can be appended.
    ///
    /// Blocks get views of the superseded buffer at their concatenated
    /// position; duplicates reuse the position of the block they repeat.
    pub(crate) fn reopen_blocks(&mut self) {
        let data = self.data.clone();
        let mut dfpos = 0usize;
        let mut lastdfpos = 0usize;
        for item in self.list.items_mut() {
            if item.data.is_none() {
                let at = if item.flags.contains(FragmentFlags::OVERLAP) {
                    lastdfpos
                } else {
                    lastdfpos = dfpos;
                    dfpos += item.len as usize;
                    lastdfpos
                };
                item.data = data.as_ref().and_then(|d| d.subview(at, item.len as usize));
            }
            item.flags.remove(FragmentFlags::TOO_LONG);
            item.flags.remove(FragmentFlags::MULTIPLE_TAILS);
        }
        self.clear_completion();
    }
}
