//! Fuzz target for the fragment tables.
//!
//! The input is read as a list of fragment records:
//! - byte 0: operation (offset add, checked add, block sequence, single sequence)
//! - byte 1: datagram id
//! - bytes 2-3: fragment offset or sequence number
//! - byte 4: flags (bit 0 = more fragments, bit 1 = replay pass)
//! - byte 5: payload length, followed by the payload
//!
//! Conflicts are expected; invariant errors are not.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcap_reassembly::{
    BufferView, Fragment, PacketInfo, ReassemblyConfig, ReassemblyTable, SeqBoundary,
};

fuzz_target!(|data: &[u8]| {
    let mut table = ReassemblyTable::<u8>::new("fuzz", ReassemblyConfig::default());
    let mut pos = 0;
    let mut frame = 0u64;

    while pos + 6 <= data.len() {
        let op = data[pos] % 4;
        let id = u32::from(data[pos + 1] % 4);
        let frag_offset = u32::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
        let flags = data[pos + 4];
        let len = data[pos + 5] as usize;
        pos += 6;

        let end = (pos + len).min(data.len());
        let chunk = BufferView::copy_from_slice(&data[pos..end]);
        pos = end;

        frame += 1;
        let pinfo = PacketInfo::new(frame).visited(flags & 2 != 0);
        let frag = Fragment::whole(&chunk, frag_offset, flags & 1 != 0);

        let result = match op {
            0 => table.add(&0, id, &pinfo, frag),
            1 => table.add_check(&0, id, &pinfo, frag),
            2 => table.add_seq_check(&1, id, &pinfo, Fragment { frag_offset: frag_offset % 16, ..frag }),
            _ => {
                let boundary = SeqBoundary {
                    first: flags & 4 != 0,
                    last: flags & 1 == 0,
                };
                table.add_seq_single(&2, frag_offset, &pinfo, frag, boundary)
            }
        };

        match result {
            Ok(Some(done)) => {
                assert!(done.data().len() <= u32::MAX as usize);
            }
            Ok(None) => {}
            Err(e) => assert!(!e.is_fatal(), "invariant violated: {e}"),
        }
    }
});
