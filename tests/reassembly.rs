//! Integration tests for fragment reassembly.
//!
//! These tests verify that:
//! - Fragments reassemble byte-for-byte regardless of arrival order
//! - Later passes over the capture resolve to the same results
//! - Overlaps are flagged and conflicting data never replaces the first copy
//! - Completed reassemblies can be extended, truncated and evicted

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use pcap_reassembly::prelude::*;
use pcap_reassembly::{ReassemblyError, TableStats};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn datagram(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Split `data` into (offset, bytes) fragments of at most `size` bytes.
fn split(data: &[u8], size: usize) -> Vec<(u32, BufferView)> {
    data.chunks(size)
        .enumerate()
        .map(|(i, c)| ((i * size) as u32, BufferView::copy_from_slice(c)))
        .collect()
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![vec![]];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for pos in 0..=rest.len() {
            let mut p = rest.clone();
            p.insert(pos, n - 1);
            out.push(p);
        }
    }
    out
}

fn ip_key() -> AddressKey {
    AddressKey::new(
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
    )
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_round_trip_any_order() {
    init_tracing();
    let data = datagram(150);
    let frags = split(&data, 50);

    for order in permutations(frags.len()) {
        let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());
        let mut result = None;
        for (i, &idx) in order.iter().enumerate() {
            let (offset, buf) = &frags[idx];
            let more = *offset as usize + buf.len() < data.len();
            let pinfo = PacketInfo::new(i as u64 + 1);
            let added = table
                .add_check(&ip_key(), 1, &pinfo, Fragment::whole(buf, *offset, more))
                .unwrap();
            if i + 1 < order.len() {
                assert!(added.is_none(), "completed early for order {:?}", order);
            } else {
                result = added;
            }
        }

        let done = result.expect("last fragment completes");
        assert_eq!(done.data().as_slice(), data.as_slice(), "order {:?}", order);
        assert_eq!(done.reassembled_in(), order.len() as u64);
        assert!(done.anomalies().is_empty());
    }
}

#[test]
fn test_out_of_order_middle_first() {
    init_tracing();
    let data = datagram(150);
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());
    let key = ip_key();

    let mid = BufferView::copy_from_slice(&data[50..100]);
    let first = BufferView::copy_from_slice(&data[0..50]);
    let last = BufferView::copy_from_slice(&data[100..150]);

    assert!(table
        .add(&key, 9, &PacketInfo::new(1), Fragment::whole(&mid, 50, true))
        .unwrap()
        .is_none());
    assert_eq!(table.get(&key, 9).unwrap().contiguous_len(), 0);

    assert!(table
        .add(&key, 9, &PacketInfo::new(2), Fragment::whole(&first, 0, true))
        .unwrap()
        .is_none());
    assert_eq!(table.get(&key, 9).unwrap().contiguous_len(), 100);

    let done = table
        .add(&key, 9, &PacketInfo::new(3), Fragment::whole(&last, 100, false))
        .unwrap()
        .unwrap();
    assert_eq!(done.data().as_slice(), data.as_slice());
    assert_eq!(done.reassembled_in(), 3);
    assert_eq!(done.frames().collect::<Vec<_>>(), vec![2, 1, 3]);
}

// =============================================================================
// Replay
// =============================================================================

#[test]
fn test_replay_idempotent() {
    init_tracing();
    let data = datagram(120);
    let frags = split(&data, 40);
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());

    let mut done = None;
    for (i, (offset, buf)) in frags.iter().enumerate() {
        let more = i + 1 < frags.len();
        done = table
            .add_check(&ip_key(), 3, &PacketInfo::new(i as u64 + 10), Fragment::whole(buf, *offset, more))
            .unwrap();
    }
    let done = done.unwrap();
    let before = table.stats();

    for _ in 0..2 {
        for (i, (offset, buf)) in frags.iter().enumerate() {
            let more = i + 1 < frags.len();
            let pinfo = PacketInfo::new(i as u64 + 10).visited(true);
            let again = table
                .add_check(&ip_key(), 3, &pinfo, Fragment::whole(buf, *offset, more))
                .unwrap()
                .unwrap();
            assert!(Arc::ptr_eq(&again, &done));

            let rendered = again.render(&pinfo);
            if pinfo.frame == 12 {
                assert_eq!(rendered.data().unwrap().as_slice(), data.as_slice());
            } else {
                assert_eq!(rendered, Rendered::ReassembledIn { frame: 12 });
            }
        }
    }
    assert_eq!(table.stats(), before);
}

// =============================================================================
// Overlaps
// =============================================================================

#[test]
fn test_overlap_without_conflict() {
    init_tracing();
    let data = datagram(100);
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());
    let a = BufferView::copy_from_slice(&data[0..60]);
    let b = BufferView::copy_from_slice(&data[40..100]);

    table.add_check(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&a, 0, true)).unwrap();
    let done = table
        .add_check(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&b, 40, false))
        .unwrap()
        .unwrap();

    assert_eq!(done.data().as_slice(), data.as_slice());
    assert!(done.has_anomaly(FragmentFlags::OVERLAP));
    assert!(!done.has_anomaly(FragmentFlags::OVERLAP_CONFLICT));
}

#[test]
fn test_overlap_with_conflict_keeps_first_copy() {
    init_tracing();
    let data = datagram(100);
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());
    let a = BufferView::copy_from_slice(&data[0..60]);
    let mut other = data[40..100].to_vec();
    other[5] ^= 0xff;
    let b = BufferView::from(other);

    table.add_check(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&a, 0, true)).unwrap();
    let done = table
        .add_check(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&b, 40, false))
        .unwrap()
        .unwrap();

    assert!(done.has_anomaly(FragmentFlags::OVERLAP | FragmentFlags::OVERLAP_CONFLICT));
    // Bytes 40..60 come from the first fragment
    assert_eq!(&done.data().as_slice()[..60], &data[..60]);
    assert_eq!(&done.data().as_slice()[60..], &data[60..]);
}

#[test]
fn test_duplicate_with_conflict_keeps_first_copy() {
    init_tracing();
    let data = datagram(100);
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());
    let a = BufferView::copy_from_slice(&data[0..50]);
    let mut changed = data[0..50].to_vec();
    changed[17] ^= 0x01;
    let dup = BufferView::from(changed);
    let tail = BufferView::copy_from_slice(&data[50..100]);

    table.add_check(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&a, 0, true)).unwrap();
    assert!(table
        .add_check(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&dup, 0, true))
        .unwrap()
        .is_none());
    let done = table
        .add_check(&1u32, 1, &PacketInfo::new(3), Fragment::whole(&tail, 50, false))
        .unwrap()
        .unwrap();

    assert!(done.has_anomaly(FragmentFlags::OVERLAP | FragmentFlags::OVERLAP_CONFLICT));
    assert_eq!(done.data().as_slice(), &data[..]);
}

#[test]
fn test_multiple_tails() {
    init_tracing();
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());
    let a = BufferView::from(&b"0123456789"[..]);
    let tail = BufferView::from(&b"abcde"[..]);

    table.add(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&a, 0, false)).unwrap();
    let done = table
        .add(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&tail, 3, false))
        .unwrap()
        .unwrap();
    assert!(done.has_anomaly(FragmentFlags::MULTIPLE_TAILS));
    assert_eq!(done.data().as_slice(), b"0123456789");
}

// =============================================================================
// Adjustments
// =============================================================================

#[test]
fn test_extension_with_partial_reassembly() {
    init_tracing();
    let data = datagram(150);
    let mut table = ReassemblyTable::new("stream", ReassemblyConfig::default());
    let first = BufferView::copy_from_slice(&data[..100]);
    let second = BufferView::copy_from_slice(&data[100..]);

    let done = table
        .add(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&first, 0, false))
        .unwrap()
        .unwrap();
    assert_eq!(done.len(), 100);

    // Not extendable yet
    let err = table
        .add(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&second, 100, false))
        .unwrap_err();
    assert_eq!(err.as_conflict(), Some(&ReassemblyError::PastOldDataLimits));
    assert_eq!(table.tot_len(&1, 1), Some(100));

    assert!(table.set_partial_reassembly(&1, 1));
    let grown = table
        .add(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&second, 100, false))
        .unwrap()
        .unwrap();
    assert_eq!(grown.len(), 150);
    assert_eq!(grown.data().as_slice(), data.as_slice());
    assert_eq!(grown.reassembled_in(), 2);
    // The superseded snapshot is untouched
    assert_eq!(done.len(), 100);
}

#[test]
fn test_partial_reassembly_reopens_only_past_end() {
    init_tracing();
    let data = datagram(150);
    let mut table = ReassemblyTable::new("stream", ReassemblyConfig::default());
    let first = BufferView::copy_from_slice(&data[..100]);
    let resent = BufferView::copy_from_slice(&data[90..100]);
    let second = BufferView::copy_from_slice(&data[100..]);

    table.add(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&first, 0, false)).unwrap();
    assert!(table.set_partial_reassembly(&1, 1));

    // Ending exactly at the old limit lays over the completed data
    let same = table
        .add(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&resent, 90, true))
        .unwrap()
        .unwrap();
    assert_eq!(same.len(), 100);
    assert!(same.has_anomaly(FragmentFlags::OVERLAP));
    assert!(!same.has_anomaly(FragmentFlags::OVERLAP_CONFLICT));
    let head = table.get(&1, 1).unwrap();
    assert!(head.is_defragmented());
    assert!(head.is_partial_reassembly());

    // One byte past it reopens and grows
    let grown = table
        .add(&1u32, 1, &PacketInfo::new(3), Fragment::whole(&second, 100, false))
        .unwrap()
        .unwrap();
    assert_eq!(grown.len(), 150);
    assert_eq!(grown.data().as_slice(), data.as_slice());
    assert_eq!(grown.reassembled_in(), 3);
}

#[test]
fn test_truncate_then_extend() {
    init_tracing();
    let data = datagram(100);
    let mut table = ReassemblyTable::new("stream", ReassemblyConfig::default());
    let buf = BufferView::copy_from_slice(&data);

    table.add(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&buf, 0, false)).unwrap();
    table.truncate(&1, 1, 60).unwrap();
    let head = table.get(&1, 1).unwrap();
    assert_eq!(head.datalen(), Some(60));
    assert_eq!(head.result().unwrap().data().as_slice(), &data[..60]);

    // Truncating past the end is a caller bug
    assert!(table.truncate(&1, 1, 80).unwrap_err().is_fatal());

    table.set_partial_reassembly(&1, 1);
    let rest = BufferView::copy_from_slice(&data[60..]);
    let done = table
        .add(&1u32, 1, &PacketInfo::new(2), Fragment::whole(&rest, 60, false))
        .unwrap()
        .unwrap();
    assert_eq!(done.data().as_slice(), data.as_slice());
}

#[test]
fn test_short_capture_declined() {
    init_tracing();
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default());
    let snap = BufferView::from(&b"only part"[..]);

    let added = table
        .add_check(&1u32, 1, &PacketInfo::new(1), Fragment::new(&snap, 0, 1400, 0, true))
        .unwrap();
    assert!(added.is_none());
    assert!(table.get(&1, 1).is_none());
}

// =============================================================================
// Aging and session reset
// =============================================================================

#[test]
fn test_aging_releases_once() {
    init_tracing();
    let mut table = ReassemblyTable::new("ip", ReassemblyConfig::default().with_max_age(100));
    let buf = BufferView::from(datagram(64));

    table.add(&1u32, 1, &PacketInfo::new(1), Fragment::whole(&buf, 0, true)).unwrap();
    table.add(&1u32, 2, &PacketInfo::new(150), Fragment::whole(&buf, 0, true)).unwrap();

    let max_age = table.config().max_age.unwrap();
    assert_eq!(table.evict_aged(200, max_age), 1);
    assert_eq!(table.evict_aged(200, max_age), 0);
    assert_eq!(table.delete(&1, 1), None);

    let stats = table.stats();
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.released_bytes, 64);
    assert_eq!(stats.in_progress, 1);
}

#[test]
fn test_registry_reset() {
    init_tracing();
    let mut registry = ReassemblyRegistry::new();
    let ipv4 = registry.register(ReassemblyTable::<AddressKey>::new("ipv4", ReassemblyConfig::default()));
    let streams = registry.register(StreamingReassembler::<StreamKey>::new("tcp", ReassemblyConfig::default()));

    let buf = BufferView::from(&b"fragment"[..]);
    let pinfo = PacketInfo::new(1)
        .with_addresses(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        )
        .with_vlan(7);
    let table = registry.get_mut(ipv4).unwrap();
    let key = AddressKey::from_packet(&pinfo, table.config()).unwrap();
    table.add(&key, 77, &pinfo, Fragment::whole(&buf, 0, true)).unwrap();

    assert_eq!(registry.stats()[0].1.in_progress, 1);
    assert!(registry.get(streams).is_some());

    registry.reset_all();
    for (_, stats) in registry.stats() {
        assert_eq!(stats, TableStats::default());
    }
}
