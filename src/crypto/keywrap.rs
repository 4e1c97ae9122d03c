//! RFC 3394 AES key wrap/unwrap, used for KEK-wraps-VEK and
//! password-derived-key-wraps-KEK in the APFS keybag (see
//! [`crate::keybag`]).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};

/// Default initial value defined by RFC 3394 §2.2.3.1.
pub const DEFAULT_IV: u64 = 0xA6A6A6A6A6A6A6A6;

trait WrapCipher {
    fn encrypt_block(&self, block: &mut [u8; 16]);
    fn decrypt_block(&self, block: &mut [u8; 16]);
}

struct Cipher128(Aes128);
struct Cipher256(Aes256);

impl WrapCipher for Cipher128 {
    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let mut b = GenericArray::clone_from_slice(block);
        self.0.encrypt_block(&mut b);
        block.copy_from_slice(&b);
    }
    fn decrypt_block(&self, block: &mut [u8; 16]) {
        let mut b = GenericArray::clone_from_slice(block);
        self.0.decrypt_block(&mut b);
        block.copy_from_slice(&b);
    }
}

impl WrapCipher for Cipher256 {
    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let mut b = GenericArray::clone_from_slice(block);
        self.0.encrypt_block(&mut b);
        block.copy_from_slice(&b);
    }
    fn decrypt_block(&self, block: &mut [u8; 16]) {
        let mut b = GenericArray::clone_from_slice(block);
        self.0.decrypt_block(&mut b);
        block.copy_from_slice(&b);
    }
}

/// Unwraps `wrapped` (a multiple of 8 bytes, at least 16) with a 128-bit KEK.
/// Returns `(plaintext, recovered_iv)`; the caller must compare
/// `recovered_iv` to [`DEFAULT_IV`] to know whether the unwrap actually
/// succeeded — this function does not do that comparison itself, matching
/// the contract callers rely on to detect a wrong password/key.
pub fn unwrap_128(kek: &[u8; 16], wrapped: &[u8]) -> (Vec<u8>, u64) {
    unwrap(&Cipher128(Aes128::new(GenericArray::from_slice(kek))), wrapped)
}

pub fn unwrap_256(kek: &[u8; 32], wrapped: &[u8]) -> (Vec<u8>, u64) {
    unwrap(&Cipher256(Aes256::new(GenericArray::from_slice(kek))), wrapped)
}

pub fn wrap_128(kek: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    wrap(&Cipher128(Aes128::new(GenericArray::from_slice(kek))), plaintext)
}

pub fn wrap_256(kek: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    wrap(&Cipher256(Aes256::new(GenericArray::from_slice(kek))), plaintext)
}

fn unwrap(cipher: &dyn WrapCipher, wrapped: &[u8]) -> (Vec<u8>, u64) {
    assert!(wrapped.len() >= 16 && wrapped.len() % 8 == 0);

    let n = wrapped.len() / 8 - 1;
    let mut a = u64::from_be_bytes(wrapped[0..8].try_into().unwrap());
    let mut r = vec![0u64; n];
    for (i, chunk) in wrapped[8..].chunks(8).enumerate() {
        r[i] = u64::from_be_bytes(chunk.try_into().unwrap());
    }

    for j in (0..6).rev() {
        for i in (1..=n).rev() {
            let t = (n as u64) * (j as u64) + i as u64;
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&(a ^ t).to_be_bytes());
            block[8..].copy_from_slice(&r[i - 1].to_be_bytes());
            cipher.decrypt_block(&mut block);
            a = u64::from_be_bytes(block[..8].try_into().unwrap());
            r[i - 1] = u64::from_be_bytes(block[8..].try_into().unwrap());
        }
    }

    let mut out = Vec::with_capacity(n * 8);
    for word in &r {
        out.extend_from_slice(&word.to_be_bytes());
    }
    (out, a)
}

fn wrap(cipher: &dyn WrapCipher, plaintext: &[u8]) -> Vec<u8> {
    assert!(plaintext.len() % 8 == 0 && !plaintext.is_empty());

    let n = plaintext.len() / 8;
    let mut a = DEFAULT_IV;
    let mut r = vec![0u64; n];
    for (i, chunk) in plaintext.chunks(8).enumerate() {
        r[i] = u64::from_be_bytes(chunk.try_into().unwrap());
    }

    for j in 0..6 {
        for i in 1..=n {
            let t = (n as u64) * (j as u64) + i as u64;
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&a.to_be_bytes());
            block[8..].copy_from_slice(&r[i - 1].to_be_bytes());
            cipher.encrypt_block(&mut block);
            a = u64::from_be_bytes(block[..8].try_into().unwrap()) ^ t;
            r[i - 1] = u64::from_be_bytes(block[8..].try_into().unwrap());
        }
    }

    let mut out = Vec::with_capacity((n + 1) * 8);
    out.extend_from_slice(&a.to_be_bytes());
    for word in &r {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 3394 §4.1: wrap 128 bits of key data with a 128-bit KEK.
    #[test]
    fn rfc3394_128_with_128_test_vector() {
        let kek: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
            0x0E, 0x0F,
        ];
        let plaintext: [u8; 16] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        let expected: [u8; 24] = [
            0x1F, 0xA6, 0x8B, 0x0A, 0x81, 0x12, 0xB4, 0x47, 0xAE, 0xF3, 0x4B, 0xD8, 0xFB, 0x5A,
            0x7B, 0x82, 0x9D, 0x3E, 0x86, 0x23, 0x71, 0xD2, 0xCF, 0xE5,
        ];

        let wrapped = wrap_128(&kek, &plaintext);
        assert_eq!(wrapped, expected);

        let (unwrapped, iv) = unwrap_128(&kek, &wrapped);
        assert_eq!(iv, DEFAULT_IV);
        assert_eq!(unwrapped, plaintext);
    }

    #[test]
    fn unwrap_with_wrong_kek_does_not_recover_default_iv() {
        let kek = [0x00u8; 16];
        let wrong_kek = [0xFFu8; 16];
        let plaintext = [0x42u8; 16];

        let wrapped = wrap_128(&kek, &plaintext);
        let (_, iv) = unwrap_128(&wrong_kek, &wrapped);
        assert_ne!(iv, DEFAULT_IV);
    }

    #[test]
    fn rfc3394_256_round_trip() {
        let kek = [0x5Au8; 32];
        let plaintext = [0xA5u8; 32];
        let wrapped = wrap_256(&kek, &plaintext);
        let (unwrapped, iv) = unwrap_256(&kek, &wrapped);
        assert_eq!(iv, DEFAULT_IV);
        assert_eq!(unwrapped, plaintext);
    }
}
