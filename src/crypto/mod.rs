//! Cryptographic primitives: AES-XTS block decryption, RFC 3394 key
//! wrap/unwrap, and the hash/MAC/KDF building blocks the keybag is built
//! from. All functions here are pure and hold no global state.

pub mod aes_xts;
pub mod hash;
pub mod keywrap;

pub use aes_xts::AesXts128;
