//! Password-derived encryption table.
//!
//! The table is a pair of 256-entry byte permutations, mutual inverses,
//! derived deterministically from the password. Derivation is the sole point
//! of wire compatibility with other implementations: MD5 the password, take
//! the first 8 digest bytes as a little-endian u64 `a`, then stable-sort the
//! identity sequence 1023 times keyed by `a % (x + i)`.

use md5::{Digest, Md5};

use crate::crypto::{DERIVE_ROUNDS, TABLE_SIZE};

/// A pair of inverse byte-substitution permutations.
///
/// Immutable once built; share it behind an `Arc`, never behind a lock.
pub struct EncryptTable {
    encode: [u8; TABLE_SIZE],
    decode: [u8; TABLE_SIZE],
}

impl EncryptTable {
    /// Derive the table for a password.
    ///
    /// The 1023 stable sorts dominate the cost; callers that build many
    /// tables should deduplicate by password or use a [`TableCache`].
    ///
    /// [`TableCache`]: crate::crypto::TableCache
    pub fn new(password: &str) -> Self {
        let digest = Md5::digest(password.as_bytes());
        let a = u64::from_le_bytes(digest[..8].try_into().unwrap());

        let mut seq: Vec<u64> = (0..TABLE_SIZE as u64).collect();
        for i in 1..=DERIVE_ROUNDS {
            // Stable sort; ties keep their current order, which makes the
            // permutation fully determined by the key function.
            seq.sort_by_key(|&x| a % (x + i));
        }

        let mut encode = [0u8; TABLE_SIZE];
        for (i, &v) in seq.iter().enumerate() {
            encode[i] = v as u8;
        }
        Self::from_encode(encode).expect("derived sequence is a permutation")
    }

    /// Rebuild a table from a stored encode permutation.
    ///
    /// Returns `None` unless `encode` is a bijection over byte values, so a
    /// corrupted cache entry can never produce a broken cipher.
    pub fn from_encode(encode: [u8; TABLE_SIZE]) -> Option<Self> {
        let mut decode = [0u8; TABLE_SIZE];
        let mut seen = [false; TABLE_SIZE];
        for (i, &v) in encode.iter().enumerate() {
            if seen[v as usize] {
                return None;
            }
            seen[v as usize] = true;
            decode[v as usize] = i as u8;
        }
        Some(Self { encode, decode })
    }

    /// Substitute one plaintext byte.
    #[inline]
    pub fn encode_byte(&self, b: u8) -> u8 {
        self.encode[b as usize]
    }

    /// Substitute one ciphertext byte.
    #[inline]
    pub fn decode_byte(&self, b: u8) -> u8 {
        self.decode[b as usize]
    }

    /// Encode `src` into `dst`. The slices must be the same length.
    pub fn encode_into(&self, src: &[u8], dst: &mut [u8]) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = self.encode[s as usize];
        }
    }

    /// Decode a buffer in place.
    pub fn decode_in_place(&self, buf: &mut [u8]) {
        for b in buf {
            *b = self.decode[*b as usize];
        }
    }

    /// The raw encode permutation (what the cache persists).
    pub fn encode_table(&self) -> &[u8; TABLE_SIZE] {
        &self.encode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_inverse_permutations() {
        let table = EncryptTable::new("foobar!");

        for b in 0..=255u8 {
            assert_eq!(table.decode_byte(table.encode_byte(b)), b);
            assert_eq!(table.encode_byte(table.decode_byte(b)), b);
        }

        let mut seen = [false; TABLE_SIZE];
        for b in 0..=255u8 {
            seen[table.encode_byte(b) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = EncryptTable::new("password");
        let b = EncryptTable::new("password");
        assert_eq!(a.encode_table(), b.encode_table());
    }

    #[test]
    fn test_distinct_passwords_distinct_tables() {
        let a = EncryptTable::new("foobar!");
        let b = EncryptTable::new("barfoo!");
        assert_ne!(a.encode_table(), b.encode_table());
    }

    #[test]
    fn test_not_identity() {
        // A password table that maps every byte to itself would be a
        // derivation bug, not a valid outcome.
        let table = EncryptTable::new("foobar!");
        assert!((0..=255u8).any(|b| table.encode_byte(b) != b));
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let table = EncryptTable::new("foobar!");
        let plain: Vec<u8> = (0..=255u8).collect();

        let mut cipher = vec![0u8; plain.len()];
        table.encode_into(&plain, &mut cipher);
        assert_ne!(cipher, plain);

        let mut back = cipher;
        table.decode_in_place(&mut back);
        assert_eq!(back, plain);
    }

    #[test]
    fn test_from_encode_rejects_non_permutation() {
        let mut broken = *EncryptTable::new("x").encode_table();
        broken[1] = broken[0];
        assert!(EncryptTable::from_encode(broken).is_none());
    }

    #[test]
    fn test_from_encode_roundtrip() {
        let derived = EncryptTable::new("cache me");
        let restored = EncryptTable::from_encode(*derived.encode_table()).unwrap();
        for b in 0..=255u8 {
            assert_eq!(restored.encode_byte(b), derived.encode_byte(b));
            assert_eq!(restored.decode_byte(b), derived.decode_byte(b));
        }
    }
}
