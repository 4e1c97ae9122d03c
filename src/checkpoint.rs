//! Checkpoint-map ring: resolves ephemeral object ids (the space manager,
//! the reaper, ...) to the physical block holding their current copy.
//!
//! The descriptor ring itself (the NX_SUPERBLOCK half) is already handled
//! by `superblock::find_latest_nxsb`; this module covers the other half,
//! the CHECKPOINT_MAP objects interleaved in the same ring, which is the
//! only place an ephemeral object's physical address is recorded.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::error::Result;
use crate::object::{self, ObjectHeader, OBJECT_TYPE_CHECKPOINT_MAP};
use crate::superblock::NxSuperblock;

/// Where an ephemeral object currently lives.
#[derive(Debug, Clone, Copy)]
pub struct EphemeralMapping {
    pub otype: u32,
    pub size: u32,
    pub paddr: u64,
}

/// Walk the checkpoint descriptor ring collecting every checkpoint-map
/// entry keyed by oid. Later (higher-xid) maps overwrite earlier ones for
/// the same oid, matching "most recent mapping wins".
pub fn load_ephemeral_mappings<R: Read + Seek>(
    reader: &mut R,
    nxsb: &NxSuperblock,
) -> Result<HashMap<u64, EphemeralMapping>> {
    let block_size = nxsb.block_size as u64;
    let mut mappings = HashMap::new();

    for i in 0..nxsb.xp_desc_blocks as u64 {
        let block_num = nxsb.xp_desc_base + i;
        let offset = block_num * block_size;

        reader.seek(SeekFrom::Start(offset))?;
        let mut block = vec![0u8; block_size as usize];
        if reader.read_exact(&mut block).is_err() {
            continue;
        }

        if !crate::fletcher::verify_object(&block) {
            continue;
        }

        let header = match ObjectHeader::parse(&block) {
            Ok(h) => h,
            Err(_) => continue,
        };

        if header.object_type() != OBJECT_TYPE_CHECKPOINT_MAP {
            continue;
        }

        if let Err(e) = parse_checkpoint_map(&block, &mut mappings) {
            log::warn!("skipping malformed checkpoint map at block {}: {}", block_num, e);
        }
    }

    Ok(mappings)
}

/// checkpoint_map_phys_t: obj header + cpm_flags(u32) + cpm_count(u32),
/// followed by cpm_count checkpoint_mapping_t entries of 40 bytes each:
/// { cpm_type: u32, cpm_subtype: u32, cpm_size: u32, cpm_pad: u32,
///   cpm_fs_oid: u64, cpm_oid: u64, cpm_paddr: u64 }
fn parse_checkpoint_map(block: &[u8], out: &mut HashMap<u64, EphemeralMapping>) -> Result<()> {
    let mut cursor = Cursor::new(&block[ObjectHeader::SIZE..]);
    let _flags = cursor.read_u32::<LittleEndian>()?;
    let count = cursor.read_u32::<LittleEndian>()?;

    for _ in 0..count {
        let cpm_type = cursor.read_u32::<LittleEndian>()?;
        let _cpm_subtype = cursor.read_u32::<LittleEndian>()?;
        let cpm_size = cursor.read_u32::<LittleEndian>()?;
        let _cpm_pad = cursor.read_u32::<LittleEndian>()?;
        let _cpm_fs_oid = cursor.read_u64::<LittleEndian>()?;
        let cpm_oid = cursor.read_u64::<LittleEndian>()?;
        let cpm_paddr = cursor.read_u64::<LittleEndian>()?;

        out.insert(
            cpm_oid,
            EphemeralMapping {
                otype: cpm_type,
                size: cpm_size,
                paddr: cpm_paddr,
            },
        );
    }

    Ok(())
}

/// Load the space manager's raw block, if its mapping was found. A miss
/// is logged and returned as `Ok(None)` rather than failing the mount:
/// this read-only driver never needs free-space accounting, only the
/// ability to say it tried.
pub fn load_spaceman<R: Read + Seek>(
    reader: &mut R,
    nxsb: &NxSuperblock,
    mappings: &HashMap<u64, EphemeralMapping>,
) -> Result<Option<Vec<u8>>> {
    let Some(mapping) = mappings.get(&nxsb.spaceman_oid) else {
        log::warn!("spaceman oid {:#x} has no checkpoint-map entry", nxsb.spaceman_oid);
        return Ok(None);
    };

    match object::read_block(reader, mapping.paddr, nxsb.block_size) {
        Ok(block) => Ok(Some(block)),
        Err(e) => {
            log::warn!("failed to read spaceman block at {:#x}: {}", mapping.paddr, e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_checkpoint_map_with_one_entry() {
        let mut block = vec![0u8; 128];
        block[24..28].copy_from_slice(&OBJECT_TYPE_CHECKPOINT_MAP.to_le_bytes());
        block[32..36].copy_from_slice(&0u32.to_le_bytes()); // flags
        block[36..40].copy_from_slice(&1u32.to_le_bytes()); // count = 1

        let entry_off = 40;
        block[entry_off..entry_off + 4].copy_from_slice(&0x05u32.to_le_bytes()); // cpm_type = SPACEMAN
        block[entry_off + 4..entry_off + 8].copy_from_slice(&0u32.to_le_bytes());
        block[entry_off + 8..entry_off + 12].copy_from_slice(&4096u32.to_le_bytes());
        block[entry_off + 12..entry_off + 16].copy_from_slice(&0u32.to_le_bytes());
        block[entry_off + 16..entry_off + 24].copy_from_slice(&0u64.to_le_bytes());
        block[entry_off + 24..entry_off + 32].copy_from_slice(&42u64.to_le_bytes()); // cpm_oid
        block[entry_off + 32..entry_off + 40].copy_from_slice(&7u64.to_le_bytes()); // cpm_paddr

        let mut mappings = HashMap::new();
        parse_checkpoint_map(&block, &mut mappings).unwrap();

        let mapping = mappings.get(&42).unwrap();
        assert_eq!(mapping.paddr, 7);
        assert_eq!(mapping.otype, 0x05);
    }
}
