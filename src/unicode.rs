//! Filename normalization and hashing for case- and normalization-
//! insensitive volumes.
//!
//! NFD decomposition is delegated to `unicode-normalization`: Apple's own
//! trie tables are not available outside Darwin, and this crate is the
//! standard ecosystem substitute (see DESIGN.md). Only the APFS-specific
//! case-fold post-processing and the CRC-32C name hash are hand-rolled on
//! top of it.

use crc::{Crc, CRC_32_ISCSI};
use unicode_normalization::UnicodeNormalization;

/// APFS uses the Castagnoli polynomial (the same one used for iSCSI) for
/// its directory-entry name hash.
const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Decompose to NFD and, if `case_fold` is set, fold case the way APFS's
/// case-insensitive volumes do: lowercase every character, then apply the
/// single special-case rule for U+0345 COMBINING GREEK YPOGEGRAMMENI,
/// which folds to U+03B9 GREEK SMALL LETTER IOTA rather than staying a
/// combining mark.
pub fn normalize_name(name: &str, case_fold: bool) -> String {
    let decomposed: String = name.nfd().collect();
    if !case_fold {
        return decomposed;
    }

    decomposed
        .chars()
        .flat_map(|c| {
            if c == '\u{0345}' {
                vec!['\u{03B9}']
            } else {
                c.to_lowercase().collect::<Vec<_>>()
            }
        })
        .collect()
}

/// Hash a (normalized) filename the way a hashed filesystem tree does:
/// CRC-32C over the UTF-8 bytes, packed with the name's byte length
/// (including the trailing nul APFS stores) into the low 10 bits.
pub fn hash_filename(name: &str, case_fold: bool) -> u32 {
    let normalized = normalize_name(name, case_fold);
    let name_len = (normalized.len() + 1).min(0x3FF) as u32; // +1 for the stored nul terminator
    let digest = CRC32C.checksum(normalized.as_bytes());
    ((digest << 10) & 0xFFFF_FC00) | name_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_fold_lowercases_ascii() {
        assert_eq!(normalize_name("HELLO", true), "hello");
        assert_eq!(normalize_name("HELLO", false), "HELLO");
    }

    #[test]
    fn hash_is_stable_for_identical_input() {
        assert_eq!(hash_filename("Documents", true), hash_filename("Documents", true));
    }

    #[test]
    fn case_insensitive_hash_matches_across_case() {
        assert_eq!(hash_filename("Documents", true), hash_filename("documents", true));
        assert_ne!(hash_filename("Documents", false), hash_filename("documents", false));
    }

    #[test]
    fn hash_packs_length_into_low_bits() {
        let packed = hash_filename("abc", false);
        assert_eq!(packed & 0x3FF, 4); // "abc" + nul terminator
    }
}
