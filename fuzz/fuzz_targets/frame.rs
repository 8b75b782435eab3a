#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_core::frame::{classify, HandshakeMessage};

fuzz_target!(|data: &[u8]| {
    // Must never panic on any input
    let _ = classify(data);

    // A message that parses must serialize back to the same bytes
    if let Ok(message) = HandshakeMessage::parse(data) {
        let serialized = message.serialize().expect("parsed message serializes");
        assert_eq!(serialized, data, "serialization not canonical");
    }
});
