//! Container mount: the entry point that owns the NX superblock, the
//! container object map, the ephemeral object cache, and per-volume
//! enumeration. [`Volume`](crate::volume::Volume) borrows a mounted
//! `Container` to resolve a single filesystem's catalog tree.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::rc::Rc;

use crate::cache::{CacheKey, CachedObject, ObjectCache};
use crate::checkpoint::{self, EphemeralMapping};
use crate::config::MountOptions;
use crate::error::{ApfsError, Result};
use crate::object::{self, ObjectHeader, OBJECT_TYPE_FS};
use crate::superblock::{self, ApfsSuperblock, NxSuperblock};
use crate::volume::Volume;

/// A mounted APFS container: one NX superblock, reachable via `reader`,
/// plus everything needed to mount any of its volumes on demand.
pub struct Container<R: Read + Seek> {
    pub(crate) reader: R,
    pub(crate) nxsb: NxSuperblock,
    pub(crate) container_omap_root: u64,
    pub(crate) cache: ObjectCache,
    pub(crate) ephemeral_mappings: HashMap<u64, EphemeralMapping>,
    pub(crate) options: MountOptions,
}

/// Summary of one volume in the container, returned by
/// [`Container::get_volume_info`] without fully mounting it.
#[derive(Debug, Clone)]
pub struct VolumeSummary {
    pub index: usize,
    pub uuid: [u8; 16],
    pub name: String,
    pub encrypted: bool,
    pub num_files: u64,
    pub num_directories: u64,
    pub num_symlinks: u64,
}

impl<R: Read + Seek> Container<R> {
    /// Mount a container: validate the block-0 superblock, scan the
    /// checkpoint descriptor ring for the latest copy (honoring
    /// `options.xid` if pinned), read the container object map, and load
    /// the checkpoint-map ring so ephemeral objects (the space manager)
    /// can be resolved on demand.
    pub fn mount(mut reader: R, options: MountOptions) -> Result<Self> {
        let block0 = superblock::read_nxsb(&mut reader)?;
        let mut nxsb = superblock::find_latest_nxsb(&mut reader, &block0)?;

        if let Some(xid) = options.xid {
            if nxsb.header.xid != xid {
                log::warn!(
                    "pinned xid {:#x} does not match latest checkpoint xid {:#x}; using block-0 superblock",
                    xid,
                    nxsb.header.xid
                );
                nxsb = block0;
            }
        }

        let container_omap_root =
            crate::omap::read_omap_tree_root(&mut reader, nxsb.omap_oid, nxsb.block_size)?;

        let ephemeral_mappings = match checkpoint::load_ephemeral_mappings(&mut reader, &nxsb) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("checkpoint-map scan failed, ephemeral objects unavailable: {}", e);
                HashMap::new()
            }
        };

        let mut container = Container {
            reader,
            nxsb,
            container_omap_root,
            cache: ObjectCache::new(),
            ephemeral_mappings,
            options,
        };

        // Load the space manager immediately, matching the container
        // mount sequence; failure is logged, not fatal, since this
        // read-only driver never needs free-space accounting.
        let _ = container.spaceman_block();

        Ok(container)
    }

    /// Raw bytes of the space manager ephemeral object, if its
    /// checkpoint-map entry and backing block could both be resolved.
    pub fn spaceman_block(&mut self) -> Result<Option<Rc<CachedObject>>> {
        let key = CacheKey::new(self.nxsb.spaceman_oid, crate::object::OBJECT_TYPE_SPACEMAN, None);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Some(cached));
        }

        let Some(mapping) = self.ephemeral_mappings.get(&self.nxsb.spaceman_oid).copied() else {
            return Ok(None);
        };

        let data = match object::read_block(&mut self.reader, mapping.paddr, self.nxsb.block_size) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("failed to read spaceman block: {}", e);
                return Ok(None);
            }
        };
        let header = ObjectHeader::parse(&data).ok();

        let cached = CachedObject {
            data,
            header,
            oid: self.nxsb.spaceman_oid,
            xid: self.nxsb.header.xid,
            otype: mapping.otype,
            subtype: 0,
            paddr: mapping.paddr as i64,
        };
        Ok(Some(self.cache.insert(key, cached, true)))
    }

    pub fn nxsb(&self) -> &NxSuperblock {
        &self.nxsb
    }

    pub fn volume_count(&self) -> usize {
        self.nxsb.fs_oids.len()
    }

    /// Read and cache one volume's superblock by enumeration index.
    fn volume_superblock(&mut self, index: usize) -> Result<(u64, Rc<CachedObject>)> {
        let vol_oid = *self
            .nxsb
            .fs_oids
            .get(index)
            .ok_or_else(|| ApfsError::OutOfRange { offset: index as u64, size: 1, limit: self.nxsb.fs_oids.len() as u64 })?;

        let key = CacheKey::new(vol_oid, OBJECT_TYPE_FS, None);
        if let Some(cached) = self.cache.get(&key) {
            return Ok((vol_oid, cached));
        }

        let vol_block = crate::omap::omap_lookup(
            &mut self.reader,
            self.container_omap_root,
            self.nxsb.block_size,
            vol_oid,
            u64::MAX,
        )?;

        let (header, data) = object::read_object(&mut self.reader, vol_block, self.nxsb.block_size)?;
        header.check_identity(vol_oid, OBJECT_TYPE_FS);

        let cached = CachedObject {
            data,
            header: Some(header),
            oid: vol_oid,
            xid: self.nxsb.header.xid,
            otype: OBJECT_TYPE_FS,
            subtype: 0,
            paddr: vol_block as i64,
        };
        Ok((vol_oid, self.cache.insert(key, cached, false)))
    }

    /// Summarize one volume without mounting it (no omap/catalog walk).
    pub fn get_volume_info(&mut self, index: usize) -> Result<VolumeSummary> {
        let (_vol_oid, cached) = self.volume_superblock(index)?;
        let apsb = ApfsSuperblock::parse(&cached.data)?;

        Ok(VolumeSummary {
            index,
            uuid: apsb.uuid,
            name: apsb.volume_name,
            encrypted: apsb.fs_flags & superblock::APFS_FS_UNENCRYPTED == 0,
            num_files: apsb.num_files,
            num_directories: apsb.num_directories,
            num_symlinks: apsb.num_symlinks,
        })
    }

    /// Mount the volume at `index`, deriving its VEK from
    /// `options.passphrase` if the volume is encrypted.
    pub fn mount_volume(&mut self, index: usize) -> Result<Volume<'_, R>> {
        let (_vol_oid, cached) = self.volume_superblock(index)?;
        let apsb = ApfsSuperblock::parse(&cached.data)?;
        Volume::mount(self, apsb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    /// Requires ../tests/appfs.raw fixture. Run with `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn mount_enumerates_at_least_one_volume() {
        let file = std::fs::File::open("tests/appfs.raw").unwrap();
        let reader = BufReader::new(file);

        let mut container = Container::mount(reader, MountOptions::new()).unwrap();
        assert!(container.volume_count() > 0);

        let info = container.get_volume_info(0).unwrap();
        assert!(!info.name.is_empty());
    }
}
