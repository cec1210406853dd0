#![no_main]

use libfuzzer_sys::fuzz_target;
use packetwire::Packet;

fuzz_target!(|data: &[u8]| {
    // parse, then walk and dump the body; errors are fine, panics are not
    if let Ok(packet) = Packet::parse(data) {
        let _ = packet.skip(packet.element_count() as usize);
        packet.rewind();
        let _ = packet.to_string();
        let _ = packet.build();
    }
});
