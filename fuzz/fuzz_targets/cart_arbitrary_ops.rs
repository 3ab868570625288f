#![no_main]

use std::time::Instant;

use libfuzzer_sys::fuzz_target;
use streamcache::policy::cart::CartCore;

// Fuzz arbitrary request/remove/clear sequences on the CART core
//
// The first byte picks the capacity; each following pair is (op, key).
fuzz_target!(|data: &[u8]| {
    let Some((&cap, ops)) = data.split_first() else {
        return;
    };
    let mut core: CartCore<u32> = CartCore::new(usize::from(cap % 16) + 1);

    for (n, pair) in ops.chunks_exact(2).enumerate() {
        let key = (pair[1] % 48).to_string();
        match pair[0] % 8 {
            0..=5 => {
                if let Some(entry) = core.lookup(&key) {
                    entry.reference();
                } else {
                    core.admit(&key, Instant::now(), pair[0] & 0x80 != 0, n as u32, |_| {});
                    assert!(core.contains(&key));
                }
            }
            6 => {
                core.remove(&key);
                assert!(!core.contains(&key));
            }
            _ => {
                if n % 64 == 0 {
                    core.clear();
                    assert!(core.is_empty());
                }
            }
        }
        core.debug_validate_invariants();
    }
});
