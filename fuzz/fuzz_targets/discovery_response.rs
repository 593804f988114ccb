#![no_main]
use libfuzzer_sys::fuzz_target;

use h806sb_core::{DiscoveryResponse, RESPONSE_HEADER};

fuzz_target!(|data: &[u8]| {
    // must never panic, whatever a device sends
    if let Ok(resp) = DiscoveryResponse::unpack(data) {
        assert!(data.starts_with(&RESPONSE_HEADER));
        assert!(resp.name.is_ascii());
        assert!(!resp.name.contains('\0'));

        let reparsed = DiscoveryResponse::unpack(&resp.pack()).unwrap();
        assert_eq!(resp, reparsed);
    }
});
