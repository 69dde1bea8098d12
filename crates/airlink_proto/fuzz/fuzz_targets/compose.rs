#![no_main]

use {
    airlink_proto::{
        MacId, Packet,
        header::{FrameType, Header},
        payload::FixedSizePayload,
    },
    libfuzzer_sys::fuzz_target,
};

fuzz_target!(|input: Vec<(Option<Header>, Option<u16>)>| {
    let mut packet = Packet::new();
    let mut expected_bits = 0u32;
    for (header, payload_bits) in input {
        let len = packet.len();
        let bits = packet.bits();
        let message_bits = header.as_ref().map_or(0, Header::bits)
            + payload_bits.map_or(0, u32::from);
        let payload = payload_bits.map(|bits| {
            Box::new(FixedSizePayload(u32::from(bits))) as Box<dyn airlink_proto::Payload>
        });

        if packet.add_message(header, payload).is_ok() {
            assert_eq!(len + 1, packet.len());
            expected_bits += message_bits;
        } else {
            assert_eq!(len, packet.len());
            assert_eq!(bits, packet.bits());
        }
        assert_eq!(expected_bits, packet.bits());
    }

    if let Some(first) = packet.headers().next() {
        assert_eq!(FrameType::Base, first.frame_type());
    }
    let destination = packet.destination();
    if packet.contains(FrameType::Beacon) {
        assert_eq!(MacId::BEACON, destination);
    } else if packet.contains(FrameType::Broadcast) {
        assert_eq!(MacId::BROADCAST, destination);
    }

    let copy = packet.clone();
    assert_eq!(packet.bits(), copy.bits());
    assert_eq!(destination, copy.destination());
    assert_eq!(packet.origin(), copy.origin());
});
