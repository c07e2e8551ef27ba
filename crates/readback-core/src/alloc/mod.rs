//! Collection types used across the readback crates.
//!
//! Keys in this workspace are small integer ids, where AHash is considerably
//! faster than SipHash.

pub use ahash::AHashMap as HashMap;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashmap_integer_keys() {
        let mut map = HashMap::new();
        map.insert(7u32, "seven");
        assert_eq!(map.get(&7), Some(&"seven"));
        assert_eq!(map.remove(&7), Some("seven"));
        assert!(map.is_empty());
    }
}
