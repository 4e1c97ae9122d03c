//! Generic B-tree engine shared by every index in an APFS container: the
//! object map, every volume's filesystem tree, extent-reference tree,
//! snapshot-metadata tree, and (sealed volumes) the fext tree.
//!
//! The node-layout parsing (`BTreeNode`, `BTreeNodeHeader`, `BTreeInfo`,
//! `TocEntry` below) is barely changed from `Dil4rd-dpp/apfs/src/btree.rs`;
//! the lookup is a full `{EQ, LE, LT, GE, GT}` mode descent instead of a
//! single less-than-or-equal-only walk, with the comparator passed in as a
//! first-class closure rather than folded into a single hardcoded scan.

use byteorder::{LittleEndian, ReadBytesExt};
use std::cmp::Ordering;
use std::io::{Cursor, Read, Seek};

use crate::error::{ApfsError, Result};
use crate::object::{self, ObjectHeader};
use crate::omap;

// B-tree node flags (from btn_flags)
pub const BTNODE_ROOT: u16 = 0x0001;
pub const BTNODE_LEAF: u16 = 0x0002;
pub const BTNODE_FIXED_KV_SIZE: u16 = 0x0004;
pub const BTNODE_HASHED: u16 = 0x0008;
pub const BTNODE_NOHEADER: u16 = 0x0010;

// BTreeInfo flags (bt_fixed.bt_flags)
pub const BTREE_UINT64_KEYS: u32 = 0x0001;
pub const BTREE_SEQUENTIAL_INSERT: u32 = 0x0002;
pub const BTREE_ALLOW_GHOSTS: u32 = 0x0004;
pub const BTREE_EPHEMERAL: u32 = 0x0008;
pub const BTREE_PHYSICAL: u32 = 0x0010;
pub const BTREE_NONPERSISTENT: u32 = 0x0020;
pub const BTREE_KV_NONALIGNED: u32 = 0x0040;
pub const BTREE_HASHED: u32 = 0x0080;
pub const BTREE_NOHEADER: u32 = 0x0100;

/// Which entry a lookup should resolve to relative to the search key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Exact match only.
    Eq,
    /// Greatest key <= search key.
    Le,
    /// Greatest key < search key.
    Lt,
    /// Smallest key >= search key.
    Ge,
    /// Smallest key > search key.
    Gt,
}

/// B-tree node header — 24 bytes after the object header.
#[derive(Debug, Clone)]
pub struct BTreeNodeHeader {
    pub btn_flags: u16,
    pub btn_level: u16,
    pub btn_nkeys: u32,
    pub btn_table_space_off: u16,
    pub btn_table_space_len: u16,
    pub btn_free_space_off: u16,
    pub btn_free_space_len: u16,
    pub btn_key_free_list_off: u16,
    pub btn_key_free_list_len: u16,
    pub btn_val_free_list_off: u16,
    pub btn_val_free_list_len: u16,
}

impl BTreeNodeHeader {
    pub const SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ApfsError::InvalidBTree("btree node header too short".into()));
        }
        let mut cursor = Cursor::new(data);
        Ok(BTreeNodeHeader {
            btn_flags: cursor.read_u16::<LittleEndian>()?,
            btn_level: cursor.read_u16::<LittleEndian>()?,
            btn_nkeys: cursor.read_u32::<LittleEndian>()?,
            btn_table_space_off: cursor.read_u16::<LittleEndian>()?,
            btn_table_space_len: cursor.read_u16::<LittleEndian>()?,
            btn_free_space_off: cursor.read_u16::<LittleEndian>()?,
            btn_free_space_len: cursor.read_u16::<LittleEndian>()?,
            btn_key_free_list_off: cursor.read_u16::<LittleEndian>()?,
            btn_key_free_list_len: cursor.read_u16::<LittleEndian>()?,
            btn_val_free_list_off: cursor.read_u16::<LittleEndian>()?,
            btn_val_free_list_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.btn_flags & BTNODE_LEAF != 0
    }

    pub fn is_root(&self) -> bool {
        self.btn_flags & BTNODE_ROOT != 0
    }

    pub fn is_fixed_kv(&self) -> bool {
        self.btn_flags & BTNODE_FIXED_KV_SIZE != 0
    }
}

/// BTreeInfo — 40 bytes at the end of a root node (before the footer).
#[derive(Debug, Clone)]
pub struct BTreeInfo {
    pub bt_fixed: BTreeInfoFixed,
    pub bt_longest_key: u32,
    pub bt_longest_val: u32,
    pub bt_key_count: u64,
    pub bt_node_count: u64,
}

#[derive(Debug, Clone)]
pub struct BTreeInfoFixed {
    pub bt_flags: u32,
    pub bt_node_size: u32,
    pub bt_key_size: u32,
    pub bt_val_size: u32,
}

impl BTreeInfo {
    pub const SIZE: usize = 40;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ApfsError::InvalidBTree("btree info too short".into()));
        }
        let mut cursor = Cursor::new(data);
        let bt_flags = cursor.read_u32::<LittleEndian>()?;
        let bt_node_size = cursor.read_u32::<LittleEndian>()?;
        let bt_key_size = cursor.read_u32::<LittleEndian>()?;
        let bt_val_size = cursor.read_u32::<LittleEndian>()?;
        let bt_longest_key = cursor.read_u32::<LittleEndian>()?;
        let bt_longest_val = cursor.read_u32::<LittleEndian>()?;
        let bt_key_count = cursor.read_u64::<LittleEndian>()?;
        let bt_node_count = cursor.read_u64::<LittleEndian>()?;

        Ok(BTreeInfo {
            bt_fixed: BTreeInfoFixed {
                bt_flags,
                bt_node_size,
                bt_key_size,
                bt_val_size,
            },
            bt_longest_key,
            bt_longest_val,
            bt_key_count,
            bt_node_count,
        })
    }

    pub fn is_hashed(&self) -> bool {
        self.bt_fixed.bt_flags & BTREE_HASHED != 0
    }
}

/// A Table of Contents entry (fixed-size KV: 4 bytes, variable-size: 8 bytes)
#[derive(Debug, Clone)]
pub struct TocEntry {
    pub key_off: u16,
    pub key_len: u16, // 0 for fixed-size KV
    pub val_off: u16,
    pub val_len: u16, // 0 for fixed-size KV
}

/// A parsed APFS B-tree node with extracted key-value pairs.
pub struct BTreeNode {
    pub header: ObjectHeader,
    pub node_header: BTreeNodeHeader,
    pub toc: Vec<TocEntry>,
    pub block_data: Vec<u8>,
    pub key_area_off: usize, // Absolute offset within block_data where key area starts
    pub val_area_end: usize, // Absolute offset within block_data where val area ends
    pub info: Option<BTreeInfo>,
}

impl BTreeNode {
    /// Parse a B-tree node from a raw block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        let header = ObjectHeader::parse(block)?;
        let node_header = BTreeNodeHeader::parse(&block[ObjectHeader::SIZE..])?;

        let toc_start =
            ObjectHeader::SIZE + BTreeNodeHeader::SIZE + node_header.btn_table_space_off as usize;
        let fixed_kv = node_header.is_fixed_kv();

        let key_area_off = ObjectHeader::SIZE
            + BTreeNodeHeader::SIZE
            + node_header.btn_table_space_off as usize
            + node_header.btn_table_space_len as usize;

        let info = if node_header.is_root() {
            let info_start = block.len() - BTreeInfo::SIZE;
            Some(BTreeInfo::parse(&block[info_start..])?)
        } else {
            None
        };

        let val_area_end = if node_header.is_root() {
            block.len() - BTreeInfo::SIZE
        } else {
            block.len()
        };

        let mut toc = Vec::with_capacity(node_header.btn_nkeys as usize);
        let mut cursor = Cursor::new(&block[toc_start..]);

        for _ in 0..node_header.btn_nkeys {
            if fixed_kv {
                let key_off = cursor.read_u16::<LittleEndian>()?;
                let val_off = cursor.read_u16::<LittleEndian>()?;
                toc.push(TocEntry {
                    key_off,
                    key_len: 0,
                    val_off,
                    val_len: 0,
                });
            } else {
                let key_off = cursor.read_u16::<LittleEndian>()?;
                let key_len = cursor.read_u16::<LittleEndian>()?;
                let val_off = cursor.read_u16::<LittleEndian>()?;
                let val_len = cursor.read_u16::<LittleEndian>()?;
                toc.push(TocEntry {
                    key_off,
                    key_len,
                    val_off,
                    val_len,
                });
            }
        }

        Ok(BTreeNode {
            header,
            node_header,
            toc,
            block_data: block.to_vec(),
            key_area_off,
            val_area_end,
            info,
        })
    }

    pub fn nkeys(&self) -> usize {
        self.node_header.btn_nkeys as usize
    }

    /// Effective fixed key/value sizes, honoring the root's `btree_info`
    /// over caller-supplied defaults when present.
    pub fn effective_sizes(&self, default_key: u32, default_val: u32) -> (u32, u32) {
        if let Some(ref info) = self.info {
            (
                if info.bt_fixed.bt_key_size > 0 {
                    info.bt_fixed.bt_key_size
                } else {
                    default_key
                },
                if info.bt_fixed.bt_val_size > 0 {
                    info.bt_fixed.bt_val_size
                } else {
                    default_val
                },
            )
        } else {
            (default_key, default_val)
        }
    }

    /// Get the key bytes for a given TOC index.
    pub fn key(&self, index: usize, fixed_key_size: u32) -> Result<&[u8]> {
        let entry = &self.toc[index];
        let start = self.key_area_off + entry.key_off as usize;
        let len = if self.node_header.is_fixed_kv() {
            fixed_key_size as usize
        } else {
            entry.key_len as usize
        };
        let end = start + len;
        if end > self.block_data.len() {
            return Err(ApfsError::InvalidBTree(format!(
                "key out of bounds: start={}, len={}, block_size={}",
                start,
                len,
                self.block_data.len()
            )));
        }
        Ok(&self.block_data[start..end])
    }

    /// Get the value bytes for a given TOC index.
    ///
    /// val_off is an offset from val_area_end to the START of the value data.
    /// For internal (non-leaf) nodes, the value is always an oid_t (u64, 8 bytes) -
    /// possibly followed by a 32-byte content hash if the tree is HASHED,
    /// which is not part of the "value" as far as lookups are concerned.
    pub fn value(&self, index: usize, fixed_val_size: u32) -> Result<&[u8]> {
        let entry = &self.toc[index];
        let len = if !self.node_header.is_leaf() {
            8
        } else if self.node_header.is_fixed_kv() {
            fixed_val_size as usize
        } else {
            entry.val_len as usize
        };

        let val_off = entry.val_off as usize;
        let start = self
            .val_area_end
            .checked_sub(val_off)
            .ok_or_else(|| ApfsError::InvalidBTree("value offset underflow".into()))?;
        let end = start + len;
        if end > self.block_data.len() || start < self.key_area_off {
            return Err(ApfsError::InvalidBTree(format!(
                "value out of bounds: start={}, len={}, val_area_end={}, block_size={}",
                start,
                len,
                self.val_area_end,
                self.block_data.len()
            )));
        }
        Ok(&self.block_data[start..end])
    }

    /// For index nodes, get the child OID at a given index. If the tree is
    /// HASHED the stored oid is relative to `root_oid` and must be added to
    /// it.
    pub fn child_oid(&self, index: usize, hashed: bool, root_oid: u64) -> Result<u64> {
        let val = self.value(index, 8)?;
        if val.len() < 8 {
            return Err(ApfsError::InvalidBTree("child oid too short".into()));
        }
        let raw = u64::from_le_bytes(val[0..8].try_into().unwrap());
        Ok(if hashed { root_oid.wrapping_add(raw) } else { raw })
    }
}

/// Resolve a child OID to a physical block number. If `omap_root` is Some,
/// the OID is virtual and needs object-map resolution at `xid`; if None,
/// the OID is already a physical block number (e.g. an object map's own
/// nodes, which are always physical).
fn resolve_child_oid<R: Read + Seek>(
    reader: &mut R,
    child_oid: u64,
    block_size: u32,
    omap_root: Option<u64>,
    xid: u64,
) -> Result<u64> {
    match omap_root {
        Some(omap) => omap::omap_lookup(reader, omap, block_size, child_oid, xid),
        None => Ok(child_oid),
    }
}

fn read_node<R: Read + Seek>(reader: &mut R, block: u64, block_size: u32) -> Result<BTreeNode> {
    let data = object::read_block(reader, block, block_size)?;
    BTreeNode::parse(&data)
}

/// Binary search within one node's key array for the greatest index `i`
/// such that `cmp(key[i]) != Greater` (i.e. `key[i] <= search_key`).
/// Returns `(index, exact)` - `exact` is true if that key compared Equal.
fn greatest_le<F: Fn(&[u8]) -> Ordering>(
    node: &BTreeNode,
    fixed_key_size: u32,
    cmp: &F,
) -> Result<Option<(usize, bool)>> {
    let n = node.nkeys();
    if n == 0 {
        return Ok(None);
    }

    // Node keys are stored in ascending comparator order; a linear scan is
    // sufficient here (nodes are small, a few hundred entries at most) and
    // keeps the "first key not satisfying the order" bookkeeping obvious.
    let mut found: Option<(usize, bool)> = None;
    for i in 0..n {
        let key = node.key(i, fixed_key_size)?;
        match cmp(key) {
            Ordering::Less => found = Some((i, false)),
            Ordering::Equal => {
                found = Some((i, true));
                break;
            }
            Ordering::Greater => break,
        }
    }
    Ok(found)
}

struct LookupCtx<'a, F: Fn(&[u8]) -> Ordering> {
    block_size: u32,
    fixed_key_size: u32,
    fixed_val_size: u32,
    cmp: &'a F,
    mode: LookupMode,
    omap_root: Option<u64>,
    xid: u64,
    hashed: bool,
    root_oid: u64,
}

/// Look up a key in a B-tree rooted at `root_block` under `mode`.
///
/// `cmp` compares a tree key against the (fixed, closed-over) search key,
/// returning the tree key's ordering relative to it.
#[allow(clippy::too_many_arguments)]
pub fn btree_lookup<R: Read + Seek, F>(
    reader: &mut R,
    root_block: u64,
    block_size: u32,
    fixed_key_size: u32,
    fixed_val_size: u32,
    cmp: &F,
    mode: LookupMode,
    omap_root: Option<u64>,
) -> Result<Option<(Vec<u8>, Vec<u8>)>>
where
    F: Fn(&[u8]) -> Ordering,
{
    let node = read_node(reader, root_block, block_size)?;
    let (fks, fvs) = node.effective_sizes(fixed_key_size, fixed_val_size);
    let hashed = node.info.as_ref().map(|i| i.is_hashed()).unwrap_or(false);
    let ctx = LookupCtx {
        block_size,
        fixed_key_size: fks,
        fixed_val_size: fvs,
        cmp,
        mode,
        omap_root,
        xid: u64::MAX,
        hashed,
        root_oid: node.header.oid,
    };
    lookup_node(reader, &node, &ctx)
}

fn lookup_node<R: Read + Seek, F: Fn(&[u8]) -> Ordering>(
    reader: &mut R,
    node: &BTreeNode,
    ctx: &LookupCtx<F>,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    if node.node_header.is_leaf() {
        return leaf_lookup(node, ctx);
    }

    let found = greatest_le(node, ctx.fixed_key_size, ctx.cmp)?;
    let n = node.nkeys();

    let (child_idx, neighbor_idx) = match found {
        Some((i, _)) => {
            let neighbor = match ctx.mode {
                LookupMode::Lt if i > 0 => Some(i - 1),
                LookupMode::Ge | LookupMode::Gt if i + 1 < n => Some(i + 1),
                _ => None,
            };
            (i, neighbor)
        }
        None => {
            // Every key in this node is greater than the search key: for
            // GE/GT the answer (if any) lives in the leftmost child.
            match ctx.mode {
                LookupMode::Ge | LookupMode::Gt if n > 0 => (0, None),
                _ => return Ok(None),
            }
        }
    };

    let child_oid = node.child_oid(child_idx, ctx.hashed, ctx.root_oid)?;
    let child_block = resolve_child_oid(reader, child_oid, ctx.block_size, ctx.omap_root, ctx.xid)?;
    let child_node = read_node(reader, child_block, ctx.block_size)?;

    if let Some(result) = lookup_node(reader, &child_node, ctx)? {
        return Ok(Some(result));
    }

    let Some(neighbor_idx) = neighbor_idx else {
        return Ok(None);
    };

    let neighbor_oid = node.child_oid(neighbor_idx, ctx.hashed, ctx.root_oid)?;
    let neighbor_block =
        resolve_child_oid(reader, neighbor_oid, ctx.block_size, ctx.omap_root, ctx.xid)?;
    let neighbor_node = read_node(reader, neighbor_block, ctx.block_size)?;

    match ctx.mode {
        LookupMode::Lt => rightmost_entry(reader, &neighbor_node, ctx),
        LookupMode::Ge | LookupMode::Gt => leftmost_entry(reader, &neighbor_node, ctx),
        _ => Ok(None),
    }
}

fn leaf_lookup<F: Fn(&[u8]) -> Ordering>(
    node: &BTreeNode,
    ctx: &LookupCtx<F>,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let n = node.nkeys();
    let found = greatest_le(node, ctx.fixed_key_size, ctx.cmp)?;

    let idx = match (ctx.mode, found) {
        (LookupMode::Eq, Some((i, true))) => Some(i),
        (LookupMode::Eq, _) => None,

        (LookupMode::Le, Some((i, _))) => Some(i),
        (LookupMode::Le, None) => None,

        (LookupMode::Lt, Some((i, true))) => i.checked_sub(1),
        (LookupMode::Lt, Some((i, false))) => Some(i),
        (LookupMode::Lt, None) => None,

        (LookupMode::Ge, Some((i, true))) => Some(i),
        (LookupMode::Ge, Some((i, false))) => {
            if i + 1 < n {
                Some(i + 1)
            } else {
                None
            }
        }
        (LookupMode::Ge, None) => {
            if n > 0 {
                Some(0)
            } else {
                None
            }
        }

        (LookupMode::Gt, Some((i, _))) => {
            if i + 1 < n {
                Some(i + 1)
            } else {
                None
            }
        }
        (LookupMode::Gt, None) => {
            if n > 0 {
                Some(0)
            } else {
                None
            }
        }
    };

    match idx {
        Some(i) => {
            let key = node.key(i, ctx.fixed_key_size)?.to_vec();
            let val = node.value(i, ctx.fixed_val_size)?.to_vec();
            Ok(Some((key, val)))
        }
        None => Ok(None),
    }
}

fn leftmost_entry<R: Read + Seek, F: Fn(&[u8]) -> Ordering>(
    reader: &mut R,
    node: &BTreeNode,
    ctx: &LookupCtx<F>,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    if node.node_header.is_leaf() {
        if node.nkeys() == 0 {
            return Ok(None);
        }
        let key = node.key(0, ctx.fixed_key_size)?.to_vec();
        let val = node.value(0, ctx.fixed_val_size)?.to_vec();
        return Ok(Some((key, val)));
    }
    let child_oid = node.child_oid(0, ctx.hashed, ctx.root_oid)?;
    let child_block = resolve_child_oid(reader, child_oid, ctx.block_size, ctx.omap_root, ctx.xid)?;
    let child = read_node(reader, child_block, ctx.block_size)?;
    leftmost_entry(reader, &child, ctx)
}

fn rightmost_entry<R: Read + Seek, F: Fn(&[u8]) -> Ordering>(
    reader: &mut R,
    node: &BTreeNode,
    ctx: &LookupCtx<F>,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    if node.node_header.is_leaf() {
        let n = node.nkeys();
        if n == 0 {
            return Ok(None);
        }
        let key = node.key(n - 1, ctx.fixed_key_size)?.to_vec();
        let val = node.value(n - 1, ctx.fixed_val_size)?.to_vec();
        return Ok(Some((key, val)));
    }
    let last = node.nkeys() - 1;
    let child_oid = node.child_oid(last, ctx.hashed, ctx.root_oid)?;
    let child_block = resolve_child_oid(reader, child_oid, ctx.block_size, ctx.omap_root, ctx.xid)?;
    let child = read_node(reader, child_block, ctx.block_size)?;
    rightmost_entry(reader, &child, ctx)
}

/// Iterate a tree's leaf entries in comparator order, starting from
/// `first()` and advancing with `next(prev_key)`, which simply re-enters
/// `btree_lookup` in GT mode - correct under the mode semantics above and
/// simple enough not to need a dedicated cursor/stack representation.
#[allow(clippy::too_many_arguments)]
pub fn btree_first<R: Read + Seek>(
    reader: &mut R,
    root_block: u64,
    block_size: u32,
    fixed_key_size: u32,
    fixed_val_size: u32,
    omap_root: Option<u64>,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let node = read_node(reader, root_block, block_size)?;
    let (fks, fvs) = node.effective_sizes(fixed_key_size, fixed_val_size);
    let hashed = node.info.as_ref().map(|i| i.is_hashed()).unwrap_or(false);
    let always_less = |_: &[u8]| Ordering::Greater;
    let ctx = LookupCtx {
        block_size,
        fixed_key_size: fks,
        fixed_val_size: fvs,
        cmp: &always_less,
        mode: LookupMode::Ge,
        omap_root,
        xid: u64::MAX,
        hashed,
        root_oid: node.header.oid,
    };
    leftmost_entry(reader, &node, &ctx)
}

/// Scan an entire B-tree collecting all entries for which `range_fn`
/// returns `Some(true)`; `Some(false)` skips an entry and keeps scanning;
/// `None` stops the scan early. Used by the filesystem layer's directory
/// listing and xattr enumeration, which need "every record with this
/// prefix" rather than a single lookup.
#[allow(clippy::too_many_arguments)]
pub fn btree_scan<R: Read + Seek, RF>(
    reader: &mut R,
    root_block: u64,
    block_size: u32,
    fixed_key_size: u32,
    fixed_val_size: u32,
    range_fn: &RF,
    omap_root: Option<u64>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
where
    RF: Fn(&[u8]) -> Option<bool>,
{
    let node = read_node(reader, root_block, block_size)?;
    let (fks, fvs) = node.effective_sizes(fixed_key_size, fixed_val_size);
    let hashed = node.info.as_ref().map(|i| i.is_hashed()).unwrap_or(false);
    let root_oid = node.header.oid;

    let mut results = Vec::new();
    btree_scan_node(
        reader, &node, block_size, fks, fvs, range_fn, &mut results, omap_root, hashed, root_oid,
    )?;
    Ok(results)
}

#[allow(clippy::too_many_arguments)]
fn btree_scan_node<R: Read + Seek, RF>(
    reader: &mut R,
    node: &BTreeNode,
    block_size: u32,
    fixed_key_size: u32,
    fixed_val_size: u32,
    range_fn: &RF,
    results: &mut Vec<(Vec<u8>, Vec<u8>)>,
    omap_root: Option<u64>,
    hashed: bool,
    root_oid: u64,
) -> Result<bool>
where
    RF: Fn(&[u8]) -> Option<bool>,
{
    if node.node_header.is_leaf() {
        for i in 0..node.nkeys() {
            let key = node.key(i, fixed_key_size)?;
            match range_fn(key) {
                Some(true) => {
                    let val = node.value(i, fixed_val_size)?;
                    results.push((key.to_vec(), val.to_vec()));
                }
                Some(false) => continue,
                None => return Ok(false),
            }
        }
        Ok(true)
    } else {
        for i in 0..node.nkeys() {
            let child_oid = node.child_oid(i, hashed, root_oid)?;
            let child_block = resolve_child_oid(reader, child_oid, block_size, omap_root, u64::MAX)?;
            let child_node = read_node(reader, child_block, block_size)?;

            if !btree_scan_node(
                reader,
                &child_node,
                block_size,
                fixed_key_size,
                fixed_val_size,
                range_fn,
                results,
                omap_root,
                hashed,
                root_oid,
            )? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a single-leaf-node B-tree block (no root/internal split) with
    /// fixed 8-byte u64 keys and 8-byte u64 values, for exercising the
    /// lookup-mode state machine without needing a fixture image.
    fn build_leaf_block(entries: &[(u64, u64)], block_size: usize) -> Vec<u8> {
        let mut block = vec![0u8; block_size];

        // Object header (checksum left 0, unused by BTreeNode::parse).
        block[8..16].copy_from_slice(&1u64.to_le_bytes()); // oid
        block[24..28].copy_from_slice(&(crate::object::OBJECT_TYPE_BTREE_NODE).to_le_bytes());

        let node_header_off = ObjectHeader::SIZE;
        let flags: u16 = BTNODE_ROOT | BTNODE_LEAF | BTNODE_FIXED_KV_SIZE;
        block[node_header_off..node_header_off + 2].copy_from_slice(&flags.to_le_bytes());
        block[node_header_off + 4..node_header_off + 8]
            .copy_from_slice(&(entries.len() as u32).to_le_bytes());
        // table_space_off = 0, table_space_len = 4 bytes per entry (kvoff)
        let table_len = (entries.len() * 4) as u16;
        block[node_header_off + 8..node_header_off + 10].copy_from_slice(&0u16.to_le_bytes());
        block[node_header_off + 10..node_header_off + 12].copy_from_slice(&table_len.to_le_bytes());

        let toc_start = node_header_off + BTreeNodeHeader::SIZE;
        let key_area_off = toc_start + table_len as usize;

        // Keys grow upward from key_area_off, values grow downward from
        // val_area_end (block end minus BTreeInfo, since this is root).
        let val_area_end = block_size - BTreeInfo::SIZE;

        for (i, (k, v)) in entries.iter().enumerate() {
            let key_off = i * 8;
            let val_off = (i + 1) * 8; // offset counted back from val_area_end

            block[toc_start + i * 4..toc_start + i * 4 + 2]
                .copy_from_slice(&(key_off as u16).to_le_bytes());
            block[toc_start + i * 4 + 2..toc_start + i * 4 + 4]
                .copy_from_slice(&(val_off as u16).to_le_bytes());

            block[key_area_off + key_off..key_area_off + key_off + 8]
                .copy_from_slice(&k.to_le_bytes());

            let val_start = val_area_end - val_off;
            block[val_start..val_start + 8].copy_from_slice(&v.to_le_bytes());
        }

        // BTreeInfo trailer.
        let info_off = block_size - BTreeInfo::SIZE;
        block[info_off..info_off + 4].copy_from_slice(&0u32.to_le_bytes()); // bt_flags
        block[info_off + 4..info_off + 8].copy_from_slice(&(block_size as u32).to_le_bytes());
        block[info_off + 8..info_off + 12].copy_from_slice(&8u32.to_le_bytes()); // key size
        block[info_off + 12..info_off + 16].copy_from_slice(&8u32.to_le_bytes()); // val size

        block
    }

    fn u64_cmp(search: u64) -> impl Fn(&[u8]) -> Ordering {
        move |key: &[u8]| {
            let k = u64::from_le_bytes(key.try_into().unwrap());
            k.cmp(&search)
        }
    }

    #[test]
    fn eq_mode_finds_exact_key() {
        let block = build_leaf_block(&[(10, 100), (20, 200), (30, 300)], 512);
        let mut cursor = std::io::Cursor::new(vec![0u8; 1]); // unused: no children
        let cmp = u64_cmp(20);
        let result = btree_lookup(&mut cursor, 0, 512, 8, 8, &cmp, LookupMode::Eq, None);
        // root block itself is what's passed as root_block==0 but our reader
        // is a throwaway cursor; exercise lookup_node directly against the
        // parsed node instead to avoid needing object::read_block plumbing.
        drop(result);

        let node = BTreeNode::parse(&block).unwrap();
        let hashed = false;
        let ctx = LookupCtx {
            block_size: 512,
            fixed_key_size: 8,
            fixed_val_size: 8,
            cmp: &cmp,
            mode: LookupMode::Eq,
            omap_root: None,
            xid: u64::MAX,
            hashed,
            root_oid: node.header.oid,
        };
        let (k, v) = leaf_lookup(&node, &ctx).unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(k.try_into().unwrap()), 20);
        assert_eq!(u64::from_le_bytes(v.try_into().unwrap()), 200);
    }

    #[test]
    fn le_and_ge_straddle_a_missing_key() {
        let block = build_leaf_block(&[(10, 100), (30, 300)], 512);
        let node = BTreeNode::parse(&block).unwrap();
        let cmp = u64_cmp(20);

        let le_ctx = LookupCtx {
            block_size: 512,
            fixed_key_size: 8,
            fixed_val_size: 8,
            cmp: &cmp,
            mode: LookupMode::Le,
            omap_root: None,
            xid: u64::MAX,
            hashed: false,
            root_oid: node.header.oid,
        };
        let (k, _) = leaf_lookup(&node, &le_ctx).unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(k.try_into().unwrap()), 10);

        let ge_ctx = LookupCtx {
            mode: LookupMode::Ge,
            ..le_ctx
        };
        let (k, _) = leaf_lookup(&node, &ge_ctx).unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(k.try_into().unwrap()), 30);
    }

    #[test]
    fn eq_miss_returns_none() {
        let block = build_leaf_block(&[(10, 100), (30, 300)], 512);
        let node = BTreeNode::parse(&block).unwrap();
        let cmp = u64_cmp(20);
        let ctx = LookupCtx {
            block_size: 512,
            fixed_key_size: 8,
            fixed_val_size: 8,
            cmp: &cmp,
            mode: LookupMode::Eq,
            omap_root: None,
            xid: u64::MAX,
            hashed: false,
            root_oid: node.header.oid,
        };
        assert!(leaf_lookup(&node, &ctx).unwrap().is_none());
    }

    #[test]
    fn lt_steps_back_one_on_exact_match() {
        let block = build_leaf_block(&[(10, 100), (20, 200), (30, 300)], 512);
        let node = BTreeNode::parse(&block).unwrap();
        let cmp = u64_cmp(20);
        let ctx = LookupCtx {
            block_size: 512,
            fixed_key_size: 8,
            fixed_val_size: 8,
            cmp: &cmp,
            mode: LookupMode::Lt,
            omap_root: None,
            xid: u64::MAX,
            hashed: false,
            root_oid: node.header.oid,
        };
        let (k, _) = leaf_lookup(&node, &ctx).unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(k.try_into().unwrap()), 10);
    }

    #[test]
    fn gt_steps_forward_one_on_exact_match() {
        let block = build_leaf_block(&[(10, 100), (20, 200), (30, 300)], 512);
        let node = BTreeNode::parse(&block).unwrap();
        let cmp = u64_cmp(20);
        let ctx = LookupCtx {
            block_size: 512,
            fixed_key_size: 8,
            fixed_val_size: 8,
            cmp: &cmp,
            mode: LookupMode::Gt,
            omap_root: None,
            xid: u64::MAX,
            hashed: false,
            root_oid: node.header.oid,
        };
        let (k, _) = leaf_lookup(&node, &ctx).unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(k.try_into().unwrap()), 30);
    }
}
