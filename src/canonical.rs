//! Canonical hashing for run fingerprints.
//!
//! Remap tables and configurations are hashed from their JSON form. Every
//! hashed type uses BTreeMap/Vec so field and entry order are stable, which
//! makes two runs over the same input comparable by fingerprint alone.

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
///
/// Only called on types whose serialization cannot fail (no non-string map
/// keys, no fallible custom impls).
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical serialization of a plain data type")
}

/// xxh64 of the canonical bytes.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// `canonical_hash` as 16 hex digits.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::types::ElementId;

    #[test]
    fn test_map_with_id_keys_hashes_deterministically() {
        let mut a = BTreeMap::new();
        a.insert(ElementId::new(2), ElementId::new(20));
        a.insert(ElementId::new(1), ElementId::new(10));

        let mut b = BTreeMap::new();
        b.insert(ElementId::new(1), ElementId::new(10));
        b.insert(ElementId::new(2), ElementId::new(20));

        assert_eq!(canonical_hash_hex(&a), canonical_hash_hex(&b));
        assert_eq!(canonical_hash_hex(&a).len(), 16);
    }
}
