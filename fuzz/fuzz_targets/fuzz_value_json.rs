//! Fuzz target for attribute value conversion and comparison.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_value_json -- -max_total_time=600

#![no_main]

use converge_core::{CompareMode, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Some(value) = Value::from_json(&json) else {
        return;
    };

    assert_eq!(Value::from_json(&value.to_json()), Some(value.clone()));

    let canonical = value.canonical();
    assert_eq!(canonical.canonical(), canonical);
    assert!(value.equivalent(&value, CompareMode::Ordered));
    assert!(value.equivalent(&canonical, CompareMode::Unordered));
    assert!(canonical.equivalent(&value, CompareMode::Unordered));
});
