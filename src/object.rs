use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::error::{ApfsError, Result};
use crate::fletcher;

// Object type constants (lower 16 bits of type_and_flags). Only the types
// this read-only driver actually constructs objects for are enumerated;
// unrecognized types are passed through as raw blocks.
pub const OBJECT_TYPE_NX_SUPERBLOCK: u32 = 0x01;
pub const OBJECT_TYPE_BTREE: u32 = 0x02;
pub const OBJECT_TYPE_BTREE_NODE: u32 = 0x03;
pub const OBJECT_TYPE_SPACEMAN: u32 = 0x05;
pub const OBJECT_TYPE_SPACEMAN_CAB: u32 = 0x09;
pub const OBJECT_TYPE_OMAP: u32 = 0x0B;
pub const OBJECT_TYPE_CHECKPOINT_MAP: u32 = 0x0C;
pub const OBJECT_TYPE_FS: u32 = 0x0D;
pub const OBJECT_TYPE_FSTREE: u32 = 0x0E;
pub const OBJECT_TYPE_BLOCKREFTREE: u32 = 0x0F;
pub const OBJECT_TYPE_SNAPMETATREE: u32 = 0x10;
pub const OBJECT_TYPE_NX_REAPER: u32 = 0x11;
pub const OBJECT_TYPE_NX_REAP_LIST: u32 = 0x12;
pub const OBJECT_TYPE_OMAP_SNAPSHOT: u32 = 0x13;
pub const OBJECT_TYPE_FUSION_MIDDLE_TREE: u32 = 0x17;
pub const OBJECT_TYPE_FEXT_TREE: u32 = 0x1E;

// Object flag masks (upper 16 bits of type_and_flags)
pub const OBJ_VIRTUAL: u32 = 0x0000_0000;
pub const OBJ_EPHEMERAL: u32 = 0x8000_0000;
pub const OBJ_PHYSICAL: u32 = 0x4000_0000;
pub const OBJ_NOHEADER: u32 = 0x2000_0000;
pub const OBJ_ENCRYPTED: u32 = 0x1000_0000;
pub const OBJ_NONPERSISTENT: u32 = 0x0800_0000;
pub const OBJ_STORAGE_TYPE_MASK: u32 = 0xC000_0000;
pub const OBJECT_TYPE_MASK: u32 = 0x0000_FFFF;
pub const OBJECT_TYPE_FLAGS_MASK: u32 = 0xFFFF_0000;

/// 32-byte header present on every APFS on-disk object. All fields are little-endian.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub checksum: u64,       // 0x00
    pub oid: u64,            // 0x08
    pub xid: u64,            // 0x10
    pub type_and_flags: u32, // 0x18
    pub subtype: u32,        // 0x1C
}

impl ObjectHeader {
    /// Size of the on-disk header in bytes
    pub const SIZE: usize = 32;

    /// Parse an object header from the first 32 bytes of a block
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ApfsError::CorruptedData(format!(
                "object header too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        Ok(ObjectHeader {
            checksum: cursor.read_u64::<LittleEndian>()?,
            oid: cursor.read_u64::<LittleEndian>()?,
            xid: cursor.read_u64::<LittleEndian>()?,
            type_and_flags: cursor.read_u32::<LittleEndian>()?,
            subtype: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Get the object type (lower 16 bits, no flags)
    pub fn object_type(&self) -> u32 {
        self.type_and_flags & OBJECT_TYPE_MASK
    }

    /// Get the storage type flags (upper 2 bits)
    pub fn storage_type(&self) -> u32 {
        self.type_and_flags & OBJ_STORAGE_TYPE_MASK
    }

    /// Whether this is a physical object (address = block number)
    pub fn is_physical(&self) -> bool {
        self.storage_type() == OBJ_PHYSICAL
    }

    pub fn is_ephemeral(&self) -> bool {
        self.storage_type() == OBJ_EPHEMERAL
    }

    /// Warn (not error) if this header's identity doesn't match what the
    /// cache requested it under - a mismatch is tolerated and logged, never
    /// silently substituted into the request's identity.
    pub fn check_identity(&self, expected_oid: u64, expected_type: u32) {
        if self.oid != expected_oid {
            log::warn!(
                "object header oid mismatch: requested {:#x}, found {:#x}",
                expected_oid,
                self.oid
            );
        }
        if self.object_type() != expected_type && expected_type != 0 {
            log::warn!(
                "object header type mismatch: requested {:#x}, found {:#x}",
                expected_type,
                self.object_type()
            );
        }
    }
}

/// Read a full block at the given block number directly off `reader`, with
/// no Fusion routing and no object-map indirection. Used only for
/// bootstrapping the very first read of a container (block 0, before a
/// `Container` exists to own routed reads) and by free-standing tests.
pub fn read_block<R: Read + Seek>(
    reader: &mut R,
    block_number: u64,
    block_size: u32,
) -> Result<Vec<u8>> {
    let offset = block_number * block_size as u64;
    reader.seek(SeekFrom::Start(offset))?;

    let mut block = vec![0u8; block_size as usize];
    reader.read_exact(&mut block)?;
    Ok(block)
}

/// Read a block and verify its Fletcher-64 checksum, returning the parsed
/// header alongside the raw bytes. Bootstrap-only, see [`read_block`].
pub fn read_object<R: Read + Seek>(
    reader: &mut R,
    block_number: u64,
    block_size: u32,
) -> Result<(ObjectHeader, Vec<u8>)> {
    let block = read_block(reader, block_number, block_size)?;

    if !fletcher::verify_object(&block) {
        let header = ObjectHeader::parse(&block).ok();
        return Err(ApfsError::ChecksumMismatch {
            oid: header.as_ref().map(|h| h.oid).unwrap_or(block_number),
            otype: header.map(|h| h.object_type() as u16).unwrap_or(0),
        });
    }

    let header = ObjectHeader::parse(&block)?;
    Ok((header, block))
}
