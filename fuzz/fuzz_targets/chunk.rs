#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use tether_core::ChunkReassembler;

fuzz_target!(|data: &[u8]| {
    // Treat the input as a stream of length-prefixed datagrams
    let mut receiver = ChunkReassembler::with_limits(256, Duration::from_secs(30), 8);
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len());
        let (datagram, next) = tail.split_at(len);
        let _ = receiver.reassemble(datagram);
        assert!(receiver.pending_packets() <= 8);
        rest = next;
    }
    receiver.evict_expired(Duration::from_secs(30));
    assert_eq!(receiver.pending_packets(), 0);
});
