//! Completed reassemblies and how a frame renders them.

use smallvec::SmallVec;

use crate::buffer::BufferView;
use crate::packet::PacketInfo;

use super::fragment::{FragmentFlags, FragmentSummary};

/// Immutable snapshot of a completed reassembly.
///
/// Shared behind an `Arc`: every frame that contributed a fragment resolves to
/// the same snapshot on later passes.
#[derive(Debug, Clone)]
pub struct Reassembly {
    pub(crate) id: u32,
    pub(crate) data: BufferView,
    pub(crate) datalen: u32,
    pub(crate) frame: u64,
    pub(crate) reassembled_in: u64,
    pub(crate) reassembled_in_layer: u8,
    pub(crate) anomalies: FragmentFlags,
    pub(crate) block_sequence: bool,
    pub(crate) fragments: SmallVec<[FragmentSummary; 8]>,
}

impl Reassembly {
    /// Reassembly id within its table.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The reconstructed bytes.
    pub fn data(&self) -> &BufferView {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total length in bytes, or the last block number for block sequences.
    pub fn datalen(&self) -> u32 {
        self.datalen
    }

    /// Frame that completed the reassembly.
    pub fn reassembled_in(&self) -> u64 {
        self.reassembled_in
    }

    /// Decode layer that completed the reassembly.
    pub fn reassembled_in_layer(&self) -> u8 {
        self.reassembled_in_layer
    }

    /// Highest frame number that contributed a fragment.
    pub fn last_frame(&self) -> u64 {
        self.frame
    }

    /// Soft anomalies seen across all fragments.
    pub fn anomalies(&self) -> FragmentFlags {
        self.anomalies
    }

    pub fn has_anomaly(&self, flag: FragmentFlags) -> bool {
        self.anomalies.contains(flag)
    }

    pub fn is_block_sequence(&self) -> bool {
        self.block_sequence
    }

    /// Fragments in offset order.
    pub fn fragments(&self) -> &[FragmentSummary] {
        &self.fragments
    }

    /// Distinct contributing frames in offset order.
    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        let mut seen: SmallVec<[u64; 8]> = SmallVec::new();
        self.fragments.iter().filter_map(move |f| {
            if seen.contains(&f.frame) {
                None
            } else {
                seen.push(f.frame);
                Some(f.frame)
            }
        })
    }

    /// Produce what `pinfo`'s frame should display.
    ///
    /// Only the frame and layer that completed the reassembly get the data;
    /// every other frame gets a pointer to that frame.
    pub fn render(&self, pinfo: &PacketInfo) -> Rendered {
        if pinfo.frame == self.reassembled_in && pinfo.layer == self.reassembled_in_layer {
            Rendered::Reassembled(self.data.clone())
        } else {
            Rendered::ReassembledIn {
                frame: self.reassembled_in,
            }
        }
    }
}

/// Output of [`Reassembly::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// This frame completed the reassembly; here are the bytes.
    Reassembled(BufferView),
    /// The reassembled data is shown in another frame.
    ReassembledIn { frame: u64 },
}

impl Rendered {
    pub fn data(&self) -> Option<&BufferView> {
        match self {
            Rendered::Reassembled(data) => Some(data),
            Rendered::ReassembledIn { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Reassembly {
        Reassembly {
            id: 9,
            data: BufferView::from(b"abcdefghij".to_vec()),
            datalen: 10,
            frame: 3,
            reassembled_in: 3,
            reassembled_in_layer: 2,
            anomalies: FragmentFlags::empty(),
            block_sequence: false,
            fragments: SmallVec::from_vec(vec![
                FragmentSummary {
                    frame: 1,
                    offset: 0,
                    len: 5,
                    flags: FragmentFlags::empty(),
                },
                FragmentSummary {
                    frame: 3,
                    offset: 5,
                    len: 5,
                    flags: FragmentFlags::empty(),
                },
            ]),
        }
    }

    // Test 1: Only the completing frame and layer see the data
    #[test]
    fn test_render() {
        let r = snapshot();
        let here = PacketInfo::new(3).with_layer(2);
        assert_eq!(r.render(&here).data().map(|d| d.as_slice()), Some(&b"abcdefghij"[..]));

        let other_layer = PacketInfo::new(3).with_layer(4);
        assert_eq!(r.render(&other_layer), Rendered::ReassembledIn { frame: 3 });

        let earlier = PacketInfo::new(1).with_layer(2);
        assert_eq!(r.render(&earlier), Rendered::ReassembledIn { frame: 3 });
    }

    // Test 2: Contributing frames are listed once each
    #[test]
    fn test_frames_distinct() {
        let mut r = snapshot();
        r.fragments.push(FragmentSummary {
            frame: 1,
            offset: 7,
            len: 3,
            flags: FragmentFlags::OVERLAP,
        });
        assert_eq!(r.frames().collect::<Vec<_>>(), vec![1, 3]);
    }
}
