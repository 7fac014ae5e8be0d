//! Fragment items and their flag sets.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::buffer::BufferView;
use crate::error::{InvariantError, Result};

/// Anomalies recorded on a fragment (and, aggregated, on its reassembly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct FragmentFlags(pub u16);

impl FragmentFlags {
    /// Fragment covers bytes another fragment already supplied.
    pub const OVERLAP: Self = Self(0x0001);

    /// Overlapping bytes differ from the ones already supplied.
    pub const OVERLAP_CONFLICT: Self = Self(0x0002);

    /// Tail fragment disagrees with an earlier tail about the total length.
    pub const MULTIPLE_TAILS: Self = Self(0x0004);

    /// Fragment extends past the total length.
    pub const TOO_LONG: Self = Self(0x0008);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if every bit of `flag` is set.
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    pub fn insert(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: Self) {
        self.0 &= !flag.0;
    }
}

impl BitOr for FragmentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FragmentFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for FragmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::OVERLAP, "overlap"),
            (Self::OVERLAP_CONFLICT, "overlap_conflict"),
            (Self::MULTIPLE_TAILS, "multiple_tails"),
            (Self::TOO_LONG, "too_long"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct HeadFlags(pub u16);

impl HeadFlags {
    /// The total length (or last block number) is known.
    pub const DATALEN_SET: Self = Self(0x0001);

    /// All data has been merged into one buffer.
    pub const DEFRAGMENTED: Self = Self(0x0002);

    /// Fragments are numbered by block sequence rather than byte offset.
    pub const BLOCK_SEQUENCE: Self = Self(0x0004);

    /// The caller allowed a completed reassembly to grow.
    pub const PARTIAL_REASSEMBLY: Self = Self(0x0008);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    pub fn insert(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: Self) {
        self.0 &= !flag.0;
    }
}

impl BitOr for HeadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One received fragment.
///
/// `offset` is a byte offset for offset-based reassembly and a block number
/// for block-sequence reassembly; `len` is always a byte count.
#[derive(Debug, Clone)]
pub struct FragmentItem {
    pub(crate) frame: u64,
    pub(crate) offset: u32,
    pub(crate) len: u32,
    pub(crate) flags: FragmentFlags,
    /// Bytes of this fragment; `None` once merged into the reassembled buffer.
    pub(crate) data: Option<BufferView>,
}

impl FragmentItem {
    pub(crate) fn new(frame: u64, offset: u32, len: u32, data: Option<BufferView>) -> Self {
        Self {
            frame,
            offset,
            len,
            flags: FragmentFlags::empty(),
            data,
        }
    }

    /// Frame that carried this fragment.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// End of the byte range covered by this fragment.
    #[inline]
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.len)
    }

    pub fn flags(&self) -> FragmentFlags {
        self.flags
    }

    /// Bytes still held by this fragment, if not yet merged.
    pub fn data(&self) -> Option<&BufferView> {
        self.data.as_ref()
    }

    /// Whether the fragment's bytes are a window into a reassembled buffer.
    pub fn is_subset_view(&self) -> bool {
        self.data.as_ref().map(|d| d.is_borrowed()).unwrap_or(false)
    }

    pub(crate) fn summary(&self) -> FragmentSummary {
        FragmentSummary {
            frame: self.frame,
            offset: self.offset,
            len: self.len,
            flags: self.flags,
        }
    }
}

/// Data-free description of a fragment that contributed to a reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSummary {
    pub frame: u64,
    pub offset: u32,
    pub len: u32,
    pub flags: FragmentFlags,
}

/// A fragment as handed over by a decoder.
///
/// `data[offset..offset + len]` holds the fragment's bytes. `frag_offset` is the
/// byte offset (or block number) of those bytes within the datagram, and
/// `more_frags` is false for the tail fragment.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub data: &'a BufferView,
    pub offset: usize,
    pub len: u32,
    pub frag_offset: u32,
    pub more_frags: bool,
}

impl<'a> Fragment<'a> {
    pub fn new(
        data: &'a BufferView,
        offset: usize,
        len: u32,
        frag_offset: u32,
        more_frags: bool,
    ) -> Self {
        Self {
            data,
            offset,
            len,
            frag_offset,
            more_frags,
        }
    }

    /// Use all of `data` as the fragment's bytes.
    pub fn whole(data: &'a BufferView, frag_offset: u32, more_frags: bool) -> Self {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Self::new(data, 0, len, frag_offset, more_frags)
    }

    /// The fragment's bytes, if they were fully captured.
    pub fn bytes(&self) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(self.len as usize)?;
        self.data.as_slice().get(self.offset..end)
    }

    /// Whether every declared byte is present in the buffer.
    pub fn is_captured(&self) -> bool {
        self.data.bytes_exist(self.offset, self.len as usize)
    }

    /// End of the fragment within the datagram.
    pub(crate) fn end(&self) -> Result<u32> {
        self.frag_offset.checked_add(self.len).ok_or_else(|| {
            InvariantError::OffsetOverflow {
                offset: self.frag_offset,
                len: self.len,
            }
            .into()
        })
    }

    /// The fragment's bytes, or a fatal error when the capture is short.
    pub(crate) fn require_captured(&self) -> Result<&'a [u8]> {
        self.bytes().ok_or_else(|| {
            InvariantError::BeyondCaptured {
                offset: self.offset,
                len: self.len,
                captured: self.data.len(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_ops() {
        let mut flags = FragmentFlags::empty();
        assert!(flags.is_empty());

        flags |= FragmentFlags::OVERLAP;
        assert!(flags.contains(FragmentFlags::OVERLAP));
        assert!(!flags.contains(FragmentFlags::OVERLAP | FragmentFlags::OVERLAP_CONFLICT));

        flags.insert(FragmentFlags::OVERLAP_CONFLICT);
        assert_eq!(flags.to_string(), "overlap|overlap_conflict");

        flags.remove(FragmentFlags::OVERLAP);
        assert_eq!(flags, FragmentFlags::OVERLAP_CONFLICT);
    }

    #[test]
    fn test_head_flags() {
        let mut state = HeadFlags::BLOCK_SEQUENCE | HeadFlags::DATALEN_SET;
        assert!(state.contains(HeadFlags::DATALEN_SET));
        state.remove(HeadFlags::DATALEN_SET);
        assert!(!state.contains(HeadFlags::DATALEN_SET));
        assert!(state.contains(HeadFlags::BLOCK_SEQUENCE));
    }

    #[test]
    fn test_item_subset_view() {
        let parent = BufferView::from(b"0123456789".to_vec());
        let item = FragmentItem::new(3, 2, 4, parent.subview(2, 4));
        assert!(item.is_subset_view());
        assert_eq!(item.end(), 6);

        let owned = FragmentItem::new(3, 2, 4, parent.clone_range(2, 4));
        assert!(!owned.is_subset_view());
    }

    #[test]
    fn test_fragment_capture_checks() {
        let packet = BufferView::from(vec![0u8; 20]);
        let frag = Fragment::new(&packet, 10, 10, 0, true);
        assert!(frag.is_captured());
        assert_eq!(frag.bytes().map(|b| b.len()), Some(10));

        let short = Fragment::new(&packet, 15, 10, 0, true);
        assert!(!short.is_captured());
        assert!(short.require_captured().unwrap_err().is_fatal());

        let overflow = Fragment::new(&packet, 0, 10, u32::MAX - 5, false);
        assert!(overflow.end().is_err());
    }
}
