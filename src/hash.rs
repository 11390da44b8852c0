//! djb2 fingerprinting, used to key the persistent cache.
//!
//! djb2 is picked deliberately for being cheap and deterministic, not for
//! being cryptographic: the keys are session/host-local, and a collision only
//! costs a cache miss (the engine's `\dump` comparison or PDF bytes will
//! simply not match on reuse). Do not replace this with a cryptographic hash
//! without measuring — see spec §9.

/// Computes the djb2 hash of `data`, returned as a lowercase hex string so it
/// can be used directly as a cache-key path component.
pub fn djb2_hex(data: &str) -> String {
    format!("{:016x}", djb2(data.as_bytes()))
}

/// Raw djb2 hash over bytes.
pub fn djb2(data: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &byte in data {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}
