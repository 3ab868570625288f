#![no_main]

use libfuzzer_sys::fuzz_target;
use streamcache::config::{SizeBudget, parse_size_bytes};

// Fuzz size-string parsing
//
// A successful parse yields a byte count and no error; a failed parse leaves
// the budget it was applied to unchanged.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut budget = SizeBudget::default();
    let before = budget.size_bytes();
    match parse_size_bytes(text) {
        Ok(bytes) => {
            budget.set_size(text).unwrap();
            assert_eq!(budget.size_bytes(), bytes);
        }
        Err(err) => {
            assert!(!err.message().is_empty());
            assert!(budget.set_size(text).is_err());
            assert_eq!(budget.size_bytes(), before);
        }
    }
});
