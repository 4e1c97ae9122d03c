//! AES-XTS-128 as used for APFS block encryption.
//!
//! This is not standard disk-sector XTS: the tweak is not simply a flat
//! sector counter run through a generic XTS crate. APFS derives its tweak
//! from a per-object crypto id plus a block index within the containing
//! extent (see [`crate::extents`]).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

/// One 16-byte AES-XTS sub-block.
const BLOCK: usize = 16;

pub struct AesXts128 {
    data_key: Aes128,
    tweak_key: Aes128,
}

impl AesXts128 {
    pub fn new(key1: &[u8; 16], key2: &[u8; 16]) -> Self {
        AesXts128 {
            data_key: Aes128::new(GenericArray::from_slice(key1)),
            tweak_key: Aes128::new(GenericArray::from_slice(key2)),
        }
    }

    /// Decrypt `cipher` in place, `unit_no` identifies the first 16-byte
    /// sub-block's tweak (the initial tweak is `AES_encrypt(tweak_key,
    /// little_endian_u128(unit_no))`, then advanced by multiplication by
    /// the GF(2^128) generator for each subsequent sub-block).
    pub fn decrypt(&self, buf: &mut [u8], unit_no: u64) {
        self.crypt(buf, unit_no, false);
    }

    pub fn encrypt(&self, buf: &mut [u8], unit_no: u64) {
        self.crypt(buf, unit_no, true);
    }

    fn crypt(&self, buf: &mut [u8], unit_no: u64, encrypt: bool) {
        assert_eq!(buf.len() % BLOCK, 0, "AES-XTS operates on whole 16-byte blocks");

        let mut tweak_bytes = [0u8; BLOCK];
        tweak_bytes[..8].copy_from_slice(&unit_no.to_le_bytes());
        let mut tweak_block = GenericArray::clone_from_slice(&tweak_bytes);
        self.tweak_key.encrypt_block(&mut tweak_block);
        let mut tweak = u128::from_le_bytes(tweak_block.into());

        for chunk in buf.chunks_mut(BLOCK) {
            let tweak_bytes = tweak.to_le_bytes();
            for i in 0..BLOCK {
                chunk[i] ^= tweak_bytes[i];
            }
            let mut block = GenericArray::clone_from_slice(chunk);
            if encrypt {
                self.data_key.encrypt_block(&mut block);
            } else {
                self.data_key.decrypt_block(&mut block);
            }
            chunk.copy_from_slice(block.as_slice());
            for i in 0..BLOCK {
                chunk[i] ^= tweak_bytes[i];
            }

            tweak = multiply_tweak(tweak);
        }
    }
}

/// Advance the 128-bit XTS tweak by one multiplication with the generator
/// `alpha` of GF(2^128), using the standard reduction polynomial `0x87`.
/// The tweak is treated as a little-endian 128-bit integer, matching the
/// grounding source's two-`u64`-word carry/reduce dance exactly.
fn multiply_tweak(tweak: u128) -> u128 {
    let carry = tweak & (1 << 127) != 0;
    let shifted = tweak << 1;
    if carry {
        shifted ^ 0x87
    } else {
        shifted
    }
}

/// Decrypt `data` (must be a multiple of 512 bytes) as `blocks_512` many
/// 512-byte XTS sectors, with the tweak for sub-block `k` within sector `s`
/// being `base_unit + s`, i.e. one XTS "unit" per 512-byte sector, not per
/// 16-byte sub-block (the per-sub-block tweak multiplication happens inside
/// [`AesXts128::decrypt`]).
pub fn decrypt_sectors(xts: &AesXts128, data: &mut [u8], base_unit: u64) {
    assert_eq!(data.len() % 512, 0);
    for (i, sector) in data.chunks_mut(512).enumerate() {
        xts.decrypt(sector, base_unit + i as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tweak_multiply_known_values() {
        assert_eq!(multiply_tweak(1), 2);
        // top bit set triggers the reduction XOR with 0x87
        let top_bit_set: u128 = 1 << 127;
        assert_eq!(multiply_tweak(top_bit_set), 0x87);
    }

    #[test]
    fn xts_round_trip_identity() {
        let key1 = [0x11u8; 16];
        let key2 = [0x22u8; 16];
        let xts = AesXts128::new(&key1, &key2);

        let plain = [0xAAu8; 512];
        let mut buf = plain;
        xts.encrypt(&mut buf, 42);
        assert_ne!(buf, plain);
        xts.decrypt(&mut buf, 42);
        assert_eq!(buf, plain);
    }

    #[test]
    fn different_units_produce_different_ciphertext() {
        let key1 = [0x01u8; 16];
        let key2 = [0x02u8; 16];
        let xts = AesXts128::new(&key1, &key2);

        let plain = [0x5Au8; 16];
        let mut a = plain;
        let mut b = plain;
        xts.encrypt(&mut a, 0);
        xts.encrypt(&mut b, 1);
        assert_ne!(a, b);
    }
}
