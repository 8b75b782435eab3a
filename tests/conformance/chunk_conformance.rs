//! Chunk layer conformance tests.
//!
//! Verifies the 14-byte chunk header layout and reassembly behaviour between
//! independent sender and receiver instances.

use std::time::Duration;
use tether_core::chunk::{ChunkHeader, CHUNK_HEADER_SIZE, CHUNK_MARKER};
use tether_core::{ChunkReassembler, Error, TetherConfig};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

/// Header: marker:u32 | packetId:u32 | chunkIndex:u16 | totalChunks:u16 | payloadLength:u16, all LE.
#[test]
fn test_chunk_header_bytes() {
    let mut sender = ChunkReassembler::with_limits(64, Duration::from_secs(30), 64);
    let chunks = sender.fragment(&payload(100)).unwrap();

    // 50 payload bytes per chunk: 50 + 50
    assert_eq!(chunks.len(), 2);
    assert_eq!(
        hex::encode(&chunks[1][..CHUNK_HEADER_SIZE]),
        "bebafeca01000000010002003200"
    );
    assert_eq!(
        ChunkHeader::peek(&chunks[0]),
        Some(ChunkHeader {
            packet_id: 1,
            chunk_index: 0,
            total_chunks: 2,
            payload_length: 50,
        })
    );
    assert_eq!(CHUNK_MARKER.to_le_bytes(), [0xBE, 0xBA, 0xFE, 0xCA]);
}

/// Payloads that fit with a header are sent without one.
#[test]
fn test_unchunked_boundary() {
    let config = TetherConfig::default();
    let mut sender = ChunkReassembler::new(&config);

    let fits = payload(config.max_chunk_size - CHUNK_HEADER_SIZE);
    assert_eq!(sender.fragment(&fits).unwrap(), vec![fits.clone()]);

    let over = payload(config.max_chunk_size - CHUNK_HEADER_SIZE + 1);
    let chunks = sender.fragment(&over).unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.len() <= config.max_chunk_size));
}

/// A receiver reassembles whatever order the network delivers.
#[test]
fn test_reverse_order_delivery() {
    let config = TetherConfig::default();
    let mut sender = ChunkReassembler::new(&config);
    let mut receiver = ChunkReassembler::new(&config);

    let data = payload(10_000);
    let chunks = sender.fragment(&data).unwrap();
    assert_eq!(chunks.len(), 10, "ceil(10000 / 1010)");

    let mut released = None;
    for chunk in chunks.iter().rev() {
        if let Some(out) = receiver.reassemble(chunk).unwrap() {
            assert!(released.is_none(), "packet released twice");
            released = Some(out);
        }
    }
    assert_eq!(released, Some(data));
    assert_eq!(receiver.pending_packets(), 0);
}

/// Re-delivered chunks of a released packet start a new buffer, never a second release.
#[test]
fn test_late_duplicate_does_not_release() {
    let mut sender = ChunkReassembler::with_limits(64, Duration::from_secs(30), 64);
    let mut receiver = ChunkReassembler::with_limits(64, Duration::from_secs(30), 64);
    let chunks = sender.fragment(&payload(120)).unwrap();

    for chunk in &chunks[..chunks.len() - 1] {
        assert_eq!(receiver.reassemble(chunk).unwrap(), None);
    }
    assert!(receiver.reassemble(&chunks[chunks.len() - 1]).unwrap().is_some());

    assert_eq!(receiver.reassemble(&chunks[0]).unwrap(), None);
    assert_eq!(receiver.pending_packets(), 1);
    assert_eq!(receiver.evict_expired(Duration::from_secs(30)), 1);
}

/// Incomplete packets are dropped once the configured timeout elapses.
#[test]
fn test_timeout_from_config() {
    let config = TetherConfig::default();
    let mut sender = ChunkReassembler::new(&config);
    let mut receiver = ChunkReassembler::new(&config);
    let chunks = sender.fragment(&payload(3000)).unwrap();

    receiver.reassemble(&chunks[0]).unwrap();
    assert_eq!(receiver.evict_expired(Duration::from_secs(29)), 0);
    assert_eq!(receiver.evict_expired(Duration::from_secs(1)), 1);

    // The rest of the packet can no longer complete it
    for chunk in &chunks[1..] {
        assert_eq!(receiver.reassemble(chunk).unwrap(), None);
    }
}

/// At most `max_pending_packets` incomplete packets are kept; the oldest goes first.
#[test]
fn test_pending_packet_limit() {
    let config = TetherConfig::default();
    let mut sender = ChunkReassembler::new(&config);
    let mut receiver = ChunkReassembler::new(&config);

    let packets: Vec<Vec<Vec<u8>>> = (0..=config.max_pending_packets)
        .map(|_| sender.fragment(&payload(2000)).unwrap())
        .collect();
    for packet in &packets {
        receiver.reassemble(&packet[0]).unwrap();
    }
    assert_eq!(receiver.pending_packets(), config.max_pending_packets);

    // First packet was evicted; the newest still completes
    assert_eq!(receiver.reassemble(&packets[0][1]).unwrap(), None);
    let newest = packets.last().unwrap();
    assert_eq!(receiver.reassemble(&newest[1]).unwrap(), Some(payload(2000)));
}

/// A declared payload length that disagrees with the datagram is rejected.
#[test]
fn test_length_mismatch_rejected() {
    let mut sender = ChunkReassembler::with_limits(64, Duration::from_secs(30), 64);
    let mut receiver = ChunkReassembler::with_limits(64, Duration::from_secs(30), 64);
    let mut chunk = sender.fragment(&payload(100)).unwrap().remove(0);
    chunk.pop();

    assert!(matches!(
        receiver.reassemble(&chunk),
        Err(Error::InvalidFrame(_))
    ));
    assert_eq!(receiver.pending_packets(), 0);
}

/// More than 65535 chunks cannot be described by the header.
#[test]
fn test_chunk_count_limit() {
    let mut sender =
        ChunkReassembler::with_limits(CHUNK_HEADER_SIZE + 1, Duration::from_secs(30), 64);
    assert!(sender.fragment(&payload(u16::MAX as usize)).is_ok());
    assert!(matches!(
        sender.fragment(&payload(u16::MAX as usize + 1)),
        Err(Error::OutOfBounds {
            field: "chunk count",
            ..
        })
    ));
}
