//! Container and volume keybag parsing, and the passphrase-to-VEK
//! derivation pipeline for encrypted volumes.
//!
//! Two keybags are involved in unlocking a volume: the *container*
//! keybag (located via `NxSuperblock.keylocker`), which maps each
//! volume's UUID to the physical location of that volume's own keybag;
//! and the *volume* keybag ("recs"), which holds the password-wrapped
//! volume encryption key (VEK) a caller's passphrase unlocks.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};
use zeroize::Zeroizing;

use crate::crypto::{hash, keywrap};
use crate::error::{ApfsError, Result};
use crate::object::ObjectHeader;

pub const KB_TAG_VOLUME_KEY: u16 = 2;
pub const KB_TAG_VOLUME_UNLOCK_RECORDS: u16 = 3;
pub const KB_TAG_VOLUME_PASSPHRASE_HINT: u16 = 4;

/// One decoded `kb_entry_t`: a UUID-tagged blob inside a keybag locker.
struct KeybagEntry {
    uuid: [u8; 16],
    tag: u16,
    keydata: Vec<u8>,
}

/// Parse a `media_keybag_t` block: obj header, then `kb_locker_t`
/// (version: u16, nkeys: u16, nbytes: u32, 8 bytes padding), then
/// `nkeys` `kb_entry_t` entries, each padded to a 16-byte boundary.
fn parse_keybag(block: &[u8]) -> Result<Vec<KeybagEntry>> {
    let mut cursor = Cursor::new(&block[ObjectHeader::SIZE..]);
    let _version = cursor.read_u16::<LittleEndian>()?;
    let nkeys = cursor.read_u16::<LittleEndian>()?;
    let _nbytes = cursor.read_u32::<LittleEndian>()?;
    cursor.seek(SeekFrom::Current(8))?;

    let mut entries = Vec::with_capacity(nkeys as usize);
    for _ in 0..nkeys {
        let mut uuid = [0u8; 16];
        cursor.read_exact(&mut uuid)?;
        let tag = cursor.read_u16::<LittleEndian>()?;
        let keylen = cursor.read_u16::<LittleEndian>()?;
        cursor.seek(SeekFrom::Current(4))?;

        let mut keydata = vec![0u8; keylen as usize];
        cursor.read_exact(&mut keydata)?;

        // kb_entry_t entries are padded so the next entry starts on a
        // 16-byte boundary relative to the start of the entry array.
        let entry_len = 16 + 2 + 2 + 4 + keylen as usize;
        let padded = (entry_len + 15) / 16 * 16;
        cursor.seek(SeekFrom::Current((padded - entry_len) as i64))?;

        entries.push(KeybagEntry { uuid, tag, keydata });
    }

    Ok(entries)
}

fn read_keybag_block<R: Read + Seek>(reader: &mut R, paddr: u64, block_size: u32) -> Result<Vec<u8>> {
    let block = crate::object::read_block(reader, paddr, block_size)?;
    if !crate::fletcher::verify_object(&block) {
        return Err(ApfsError::ChecksumMismatch { oid: paddr, otype: 0 });
    }
    Ok(block)
}

/// Find, within the container keybag, the physical block range of the
/// given volume's own keybag.
fn find_volume_keybag_location<R: Read + Seek>(
    reader: &mut R,
    keylocker: (u64, u64),
    block_size: u32,
    volume_uuid: &[u8; 16],
) -> Result<(u64, u64)> {
    if keylocker.1 == 0 {
        return Err(ApfsError::NotFound("container has no keybag".into()));
    }

    let block = read_keybag_block(reader, keylocker.0, block_size)?;
    let entries = parse_keybag(&block)?;

    for entry in &entries {
        if entry.tag == KB_TAG_VOLUME_KEY && &entry.uuid == volume_uuid {
            if entry.keydata.len() < 16 {
                return Err(ApfsError::CorruptedData("short volume key locator".into()));
            }
            let mut cursor = Cursor::new(&entry.keydata);
            let start = cursor.read_u64::<LittleEndian>()?;
            let count = cursor.read_u64::<LittleEndian>()?;
            return Ok((start, count));
        }
    }

    Err(ApfsError::NotFound(format!(
        "no container keybag entry for volume uuid {:02x?}",
        volume_uuid
    )))
}

/// An unlock record: a passphrase-derived key wraps the volume key
/// directly (RFC 3394). `salt`/`iterations` feed PBKDF2-HMAC-SHA256.
struct UnlockRecord {
    salt: [u8; 16],
    iterations: u32,
    wrapped: Vec<u8>,
}

fn parse_unlock_record(keydata: &[u8]) -> Result<UnlockRecord> {
    if keydata.len() < 16 + 4 + 24 {
        return Err(ApfsError::CorruptedData("short unlock record".into()));
    }
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&keydata[..16]);
    let iterations = u32::from_le_bytes(keydata[16..20].try_into().unwrap());
    let wrapped = keydata[20..].to_vec();
    Ok(UnlockRecord { salt, iterations, wrapped })
}

/// Derive the volume encryption key (VEK) for `volume_uuid` from a
/// user-supplied passphrase.
///
/// Returns `ApfsError::PermissionDenied` if the passphrase doesn't
/// recover the RFC 3394 default IV, which is how a wrong password
/// manifests in this scheme - there's no separate integrity code to
/// check first.
pub fn derive_vek<R: Read + Seek>(
    reader: &mut R,
    keylocker: (u64, u64),
    block_size: u32,
    volume_uuid: &[u8; 16],
    passphrase: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let recs_location = find_volume_keybag_location(reader, keylocker, block_size, volume_uuid)?;
    let recs_block = read_keybag_block(reader, recs_location.0, block_size)?;
    let entries = parse_keybag(&recs_block)?;

    let unlock_entry = entries
        .iter()
        .find(|e| e.tag == KB_TAG_VOLUME_UNLOCK_RECORDS)
        .ok_or_else(|| ApfsError::NotFound("no unlock record in volume keybag".into()))?;

    let record = parse_unlock_record(&unlock_entry.keydata)?;

    let derived_len = record.wrapped.len().saturating_sub(8);
    let mut derived = Zeroizing::new(vec![0u8; derived_len]);
    hash::pbkdf2_hmac_sha256(passphrase.as_bytes(), &record.salt, record.iterations, &mut derived);

    let (vek, recovered_iv) = match derived_len {
        16 => {
            let kek: [u8; 16] = derived.as_slice().try_into().unwrap();
            keywrap::unwrap_128(&kek, &record.wrapped)
        }
        32 => {
            let kek: [u8; 32] = derived.as_slice().try_into().unwrap();
            keywrap::unwrap_256(&kek, &record.wrapped)
        }
        other => {
            return Err(ApfsError::Unsupported(format!(
                "unsupported wrapped key length {}",
                other
            )))
        }
    };

    if recovered_iv != keywrap::DEFAULT_IV {
        return Err(ApfsError::PermissionDenied("incorrect passphrase".into()));
    }

    Ok(Zeroizing::new(vek))
}

/// Fetch the passphrase hint for a volume, if the keybag carries one.
pub fn get_password_hint<R: Read + Seek>(
    reader: &mut R,
    keylocker: (u64, u64),
    block_size: u32,
    volume_uuid: &[u8; 16],
) -> Result<Option<String>> {
    let recs_location = find_volume_keybag_location(reader, keylocker, block_size, volume_uuid)?;
    let recs_block = read_keybag_block(reader, recs_location.0, block_size)?;
    let entries = parse_keybag(&recs_block)?;

    Ok(entries
        .iter()
        .find(|e| e.tag == KB_TAG_VOLUME_PASSPHRASE_HINT)
        .map(|e| String::from_utf8_lossy(&e.keydata).trim_end_matches('\0').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_entry(uuid: [u8; 16], tag: u16, keydata: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&uuid);
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(keydata.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(keydata);
        let entry_len = 16 + 2 + 2 + 4 + keydata.len();
        let padded = (entry_len + 15) / 16 * 16;
        out.resize(padded, 0);
        out
    }

    fn build_keybag(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut block = vec![0u8; 4096];
        block[24..28].copy_from_slice(&0x06u32.to_le_bytes()); // arbitrary non-checked type
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_le_bytes()); // version
        body.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // nbytes (unused by parser)
        body.extend_from_slice(&[0u8; 8]);
        for e in entries {
            body.extend_from_slice(e);
        }
        block[ObjectHeader::SIZE..ObjectHeader::SIZE + body.len()].copy_from_slice(&body);
        block
    }

    #[test]
    fn parses_volume_key_locator_entry() {
        let uuid = [0xAAu8; 16];
        let mut locator = Vec::new();
        locator.extend_from_slice(&500u64.to_le_bytes());
        locator.extend_from_slice(&1u64.to_le_bytes());
        let entry = build_entry(uuid, KB_TAG_VOLUME_KEY, &locator);
        let block = build_keybag(&[entry]);

        let entries = parse_keybag(&block).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag, KB_TAG_VOLUME_KEY);
        assert_eq!(entries[0].uuid, uuid);
    }

    #[test]
    fn wrong_passphrase_does_not_recover_default_iv() {
        let kek = [0x11u8; 16];
        let vek = [0x22u8; 16];
        let wrapped = keywrap::wrap_128(&kek, &vek);

        let mut keydata = Vec::new();
        keydata.extend_from_slice(&[0u8; 16]); // salt
        keydata.extend_from_slice(&1u32.to_le_bytes()); // iterations
        keydata.extend_from_slice(&wrapped);

        let record = parse_unlock_record(&keydata).unwrap();
        assert_eq!(record.iterations, 1);

        // Deriving with a different password than the one that produced
        // `kek` above must not recover the RFC 3394 default IV.
        let mut derived = [0u8; 16];
        hash::pbkdf2_hmac_sha256(b"wrong password", &record.salt, record.iterations, &mut derived);
        let (_, iv) = keywrap::unwrap_128(&derived, &record.wrapped);
        assert_ne!(iv, keywrap::DEFAULT_IV);
    }
}
