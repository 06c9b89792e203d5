//! crates/wireq-cache/src/filename.rs
//!
//! Derives an on-disk filename for a cache key: split the
//! key at `len/2`, hash each half independently with FNV-1a, and
//! concatenate the decimal forms. Collisions between distinct keys are
//! tolerated by design — a collision surfaces as a framing or key-mismatch
//! read failure, which `DiskCache::get` treats as an ordinary miss plus
//! entry removal.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Computes the cache filename for `key`.
#[must_use]
pub fn filename_for_key(key: &str) -> String {
    let bytes = key.as_bytes();
    let mid = bytes.len() / 2;
    // `mid` always lands on a byte boundary chosen independent of UTF-8
    // char boundaries; that's fine, the halves are hashed as raw bytes.
    let (first, second) = bytes.split_at(mid);
    format!("{}{}", fnv1a_32(first), fnv1a_32(second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_yields_same_filename() {
        assert_eq!(filename_for_key("http://x/a"), filename_for_key("http://x/a"));
    }

    #[test]
    fn different_keys_usually_yield_different_filenames() {
        assert_ne!(filename_for_key("http://x/a"), filename_for_key("http://x/b"));
    }

    #[test]
    fn empty_key_does_not_panic() {
        let name = filename_for_key("");
        assert!(!name.is_empty());
    }

    #[test]
    fn single_byte_key_does_not_panic() {
        let name = filename_for_key("a");
        assert!(!name.is_empty());
    }

    #[test]
    fn filename_is_decimal_digits_only() {
        let name = filename_for_key("http://example.com/resource?id=42");
        assert!(name.chars().all(|c| c.is_ascii_digit()));
    }
}
