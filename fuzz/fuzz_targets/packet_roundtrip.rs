#![no_main]
use libfuzzer_sys::fuzz_target;

use h806sb_core::ControlPacket;

fuzz_target!(|data: ControlPacket| {
    // run the fields through the clamping constructor first
    let pkt = ControlPacket::new(
        data.counter,
        data.speed as i32,
        data.brightness as i32,
        data.on,
        data.serial,
    );
    pkt.validate();

    let bytes = pkt.pack().unwrap();
    assert_eq!(bytes.len(), ControlPacket::packed_size());

    let parsed = ControlPacket::unpack(&bytes).unwrap();
    assert_eq!(pkt, parsed);
});
