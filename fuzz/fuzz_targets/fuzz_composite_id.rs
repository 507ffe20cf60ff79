//! Fuzz target for composite identifier decoding.
//!
//! Any stored string must either decode into components that encode back to
//! the same string, or be rejected without panicking.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_composite_id -- -max_total_time=600

#![no_main]

use converge_core::CompositeId;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(id) = s.parse::<CompositeId>() {
        assert_eq!(id.as_str(), s);
        let again = CompositeId::encode(id.parts().iter().cloned()).unwrap();
        assert_eq!(again, id);
        assert_eq!(CompositeId::decode(s, id.arity()).unwrap(), id);
    }

    // Fixed arities must never truncate or pad.
    for arity in 1..=3 {
        if let Ok(id) = CompositeId::decode(s, arity) {
            assert_eq!(id.arity(), arity);
        }
    }

    // Components taken from the raw input must be rejected or round-trip.
    let components: Vec<&str> = s.split('\n').collect();
    if let Ok(id) = CompositeId::encode(components.iter().copied()) {
        assert_eq!(id.parts(), components.as_slice());
        assert_eq!(CompositeId::decode(id.as_str(), components.len()).unwrap(), id);
    }
});
