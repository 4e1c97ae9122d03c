//! A single mounted filesystem (APSB) within a [`Container`]: catalog
//! lookups, directory listing, file reads (transparently decompressing
//! `com.apple.decmpfs` files), extended attributes, and - for encrypted
//! volumes - VEK-backed AES-XTS decryption of file extents.

use std::io::{Read, Seek, Write};

use crate::catalog;
use crate::container::Container;
use crate::crypto::AesXts128;
use crate::error::{ApfsError, Result};
use crate::extents;
use crate::keybag;
use crate::superblock::{self, ApfsSuperblock};
use crate::{DirEntry, EntryKind, FileStat, WalkEntry};

pub struct Volume<'a, R: Read + Seek> {
    container: &'a mut Container<R>,
    apsb: ApfsSuperblock,
    omap_root: u64,
    catalog_root: u64,
    case_fold: bool,
    encrypted: bool,
    xts: Option<AesXts128>,
}

impl<'a, R: Read + Seek> Volume<'a, R> {
    pub(crate) fn mount(container: &'a mut Container<R>, apsb: ApfsSuperblock) -> Result<Self> {
        if container.options.snapshot_xid.is_some() {
            return Err(ApfsError::Unsupported(
                "mounting a snapshot other than the live volume state is not yet supported".into(),
            ));
        }

        let block_size = container.nxsb.block_size;
        let encrypted = apsb.fs_flags & superblock::APFS_FS_UNENCRYPTED == 0;

        let xts = if encrypted {
            match &container.options.passphrase {
                Some(passphrase) => {
                    let vek = keybag::derive_vek(
                        &mut container.reader,
                        container.nxsb.keylocker,
                        block_size,
                        &apsb.uuid,
                        passphrase,
                    )?;
                    if vek.len() == 32 {
                        let key1: [u8; 16] = vek[..16].try_into().unwrap();
                        let key2: [u8; 16] = vek[16..].try_into().unwrap();
                        Some(AesXts128::new(&key1, &key2))
                    } else {
                        log::warn!("recovered VEK is {} bytes, not the 32 needed for AES-XTS-128", vek.len());
                        None
                    }
                }
                None => None,
            }
        } else {
            None
        };

        let omap_root = crate::omap::read_omap_tree_root(&mut container.reader, apsb.omap_oid, block_size)?;
        let catalog_root =
            crate::omap::omap_lookup(&mut container.reader, omap_root, block_size, apsb.root_tree_oid, u64::MAX)?;

        let case_fold = apsb.incompatible_features
            & (superblock::APFS_INCOMPAT_CASE_INSENSITIVE | superblock::APFS_INCOMPAT_NORMALIZATION_INSENSITIVE)
            != 0;

        Ok(Volume { container, apsb, omap_root, catalog_root, case_fold, encrypted, xts })
    }

    fn block_size(&self) -> u32 {
        self.container.nxsb.block_size
    }

    pub fn name(&self) -> &str {
        &self.apsb.volume_name
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Passphrase hint for this volume, if its keybag carries one. Works
    /// whether or not a passphrase was supplied at mount time.
    pub fn password_hint(&mut self) -> Result<Option<String>> {
        if !self.encrypted {
            return Ok(None);
        }
        keybag::get_password_hint(
            &mut self.container.reader,
            self.container.nxsb.keylocker,
            self.block_size(),
            &self.apsb.uuid,
        )
    }

    fn xts_or_err(&self) -> Result<Option<&AesXts128>> {
        if !self.encrypted {
            return Ok(None);
        }
        self.xts
            .as_ref()
            .map(Some)
            .ok_or_else(|| ApfsError::PermissionDenied("volume is encrypted; no valid passphrase was supplied".into()))
    }

    fn resolve(&mut self, path: &str) -> Result<(u64, catalog::InodeVal)> {
        catalog::resolve_path(
            &mut self.container.reader,
            self.catalog_root,
            self.omap_root,
            self.block_size(),
            path,
            self.case_fold,
        )
    }

    pub fn list_directory(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let parent = if path == "/" || path.is_empty() {
            catalog::ROOT_DIR_RECORD
        } else {
            let (oid, inode) = self.resolve(path)?;
            if inode.kind() != catalog::INODE_DIR_TYPE {
                return Err(ApfsError::NotADirectory(path.to_string()));
            }
            oid
        };

        catalog::list_directory(&mut self.container.reader, self.catalog_root, self.omap_root, self.block_size(), parent)
    }

    pub fn stat(&mut self, path: &str) -> Result<FileStat> {
        let (oid, inode) = self.resolve(path)?;
        Ok(FileStat {
            oid,
            kind: match inode.kind() {
                catalog::INODE_DIR_TYPE => EntryKind::Directory,
                catalog::INODE_SYMLINK_TYPE => EntryKind::Symlink,
                _ => EntryKind::File,
            },
            size: inode.size(),
            create_time: inode.create_time,
            modify_time: inode.modify_time,
            uid: inode.uid,
            gid: inode.gid,
            mode: inode.mode,
            nlink: inode.nlink(),
        })
    }

    pub fn exists(&mut self, path: &str) -> Result<bool> {
        match self.resolve(path) {
            Ok(_) => Ok(true),
            Err(ApfsError::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn list_xattr(&mut self, path: &str) -> Result<Vec<String>> {
        let (oid, _inode) = self.resolve(path)?;
        catalog::list_xattr_names(&mut self.container.reader, self.catalog_root, self.omap_root, self.block_size(), oid)
    }

    pub fn get_xattr(&mut self, path: &str, name: &str) -> Result<Vec<u8>> {
        let (oid, _inode) = self.resolve(path)?;
        catalog::get_xattr(&mut self.container.reader, self.catalog_root, self.omap_root, self.block_size(), oid, name)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_file_to(path, &mut buf)?;
        Ok(buf)
    }

    /// Stream a file's contents. Files carrying a `com.apple.decmpfs`
    /// attribute are transparently inflated; everything else is read
    /// straight off its extents, decrypting them first if the volume is
    /// encrypted.
    pub fn read_file_to<W: Write>(&mut self, path: &str, writer: &mut W) -> Result<u64> {
        let (oid, inode) = self.resolve(path)?;

        match catalog::get_xattr(
            &mut self.container.reader,
            self.catalog_root,
            self.omap_root,
            self.block_size(),
            oid,
            catalog::DECMPFS_XATTR_NAME,
        ) {
            Ok(attr) => {
                let decoded = catalog::decode_decmpfs(&attr)?;
                writer.write_all(&decoded)?;
                Ok(decoded.len() as u64)
            }
            Err(ApfsError::NotFound(_)) => self.read_extents_to(&inode, writer),
            Err(e) => Err(e),
        }
    }

    fn read_extents_to<W: Write>(&mut self, inode: &catalog::InodeVal, writer: &mut W) -> Result<u64> {
        let file_extents = catalog::lookup_extents(
            &mut self.container.reader,
            self.catalog_root,
            self.omap_root,
            self.block_size(),
            inode.private_id,
        )?;

        let xts = self.xts_or_err()?;
        extents::read_file_data(&mut self.container.reader, self.block_size(), &file_extents, inode.size(), writer, xts)
    }

    pub fn walk(&mut self) -> Result<Vec<WalkEntry>> {
        let mut entries = Vec::new();
        self.walk_recursive(catalog::ROOT_DIR_RECORD, "", &mut entries)?;
        Ok(entries)
    }

    fn walk_recursive(&mut self, parent_oid: u64, parent_path: &str, entries: &mut Vec<WalkEntry>) -> Result<()> {
        let dir_entries = catalog::list_directory(
            &mut self.container.reader,
            self.catalog_root,
            self.omap_root,
            self.block_size(),
            parent_oid,
        )?;

        for entry in dir_entries {
            let full_path = if parent_path.is_empty() {
                format!("/{}", entry.name)
            } else {
                format!("{}/{}", parent_path, entry.name)
            };

            let is_dir = entry.kind == EntryKind::Directory;
            let oid = entry.oid;

            entries.push(WalkEntry { path: full_path.clone(), entry });

            if is_dir {
                self.walk_recursive(oid, &full_path, entries)?;
            }
        }

        Ok(())
    }
}
