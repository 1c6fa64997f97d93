// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! GDFX: the sector-addressed, name-sorted directory format used inside an
//! SVOD volume. A directory's entry table is a binary search tree keyed by
//! name; reading it out requires an in-order traversal, not a linear scan.

use log::error;
use xcore_err::{Error, Result};
use xcore_io::IndexableMultiFileIo;

use crate::sector::{round_up, sector_to_offset, SECTOR_SIZE};

pub const ATTR_DIRECTORY: u8 = 0x10;
const ENTRY_HEADER_LEN: u64 = 0x11;

/// The 20-byte magic at the head of the GDFX root-volume header.
pub const GDFX_MAGIC: [u8; 20] = *b"MICROSOFT*XBOX*MEDIA";

pub struct GdfxHeader {
    pub root_sector: u32,
    pub root_size: u32,
    pub timestamp: u64,
}

/// Parses the GDFX root-volume header. The caller must have already
/// positioned `io` at `(base_address, file 0)`.
pub fn read_header<IO: IndexableMultiFileIo>(io: &mut IO) -> Result<GdfxHeader> {
    let mut magic = [0u8; 20];
    io.read_bytes(&mut magic)?;
    if magic != GDFX_MAGIC {
        error!("GDFX: bad root-volume header magic {magic:?}");
        return Err(Error::Corrupt("bad GDFX magic"));
    }

    let mut root_sector_bytes = [0u8; 4];
    io.read_bytes(&mut root_sector_bytes)?;
    let root_sector = u32::from_be_bytes(root_sector_bytes);

    let mut root_size_bytes = [0u8; 4];
    io.read_bytes(&mut root_size_bytes)?;
    let root_size = u32::from_be_bytes(root_size_bytes);

    let mut timestamp_bytes = [0u8; 8];
    io.read_bytes(&mut timestamp_bytes)?;
    let timestamp = u64::from_be_bytes(timestamp_bytes);

    Ok(GdfxHeader { root_sector, root_size, timestamp })
}

/// Stable index into a `GdfxVolume`'s entry arena, the SVOD counterpart of
/// `xcore_fatx::EntryId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GdfxEntryId(pub(crate) usize);

pub struct GdfxEntry {
    pub name: String,
    pub attributes: u8,
    pub sector: u32,
    pub size: u32,
    pub address: u64,
    pub file_index: usize,
    pub file_path: String,
    pub(crate) children: Vec<GdfxEntryId>,
    pub(crate) children_listed: bool,
}

impl GdfxEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn children(&self) -> &[GdfxEntryId] {
        &self.children
    }
}

/// The arena of directory entries cached from a GDFX volume, plus the layout
/// parameters (`data_block_offset`, `prologue_offset`) every sector lookup
/// needs.
pub struct GdfxTree {
    entries: Vec<GdfxEntry>,
    root: GdfxEntryId,
    data_block_offset: u32,
    prologue_offset: u64,
}

struct RawEntry {
    left_child: u16,
    right_child: u16,
    sector: u32,
    size: u32,
    attributes: u8,
    name: String,
    /// Offset (in 4-byte units) of this record within the directory table,
    /// doubling as its address once the table's base address is known.
    table_offset: u64,
    record_len: u64,
}

fn parse_entry(buf: &[u8], table_offset: usize) -> Result<RawEntry> {
    if table_offset + ENTRY_HEADER_LEN as usize > buf.len() {
        error!("GDFX: entry header at table offset {table_offset} runs past the directory table");
        return Err(Error::Corrupt("GDFX entry header truncated"));
    }
    let left_child = u16::from_be_bytes([buf[table_offset], buf[table_offset + 1]]);
    let right_child = u16::from_be_bytes([buf[table_offset + 2], buf[table_offset + 3]]);
    let sector = u32::from_be_bytes(buf[table_offset + 4..table_offset + 8].try_into().unwrap());
    let size = u32::from_be_bytes(buf[table_offset + 8..table_offset + 12].try_into().unwrap());
    let attributes = buf[table_offset + 12];
    let name_len = buf[table_offset + 13] as usize;
    let name_start = table_offset + ENTRY_HEADER_LEN as usize;
    if name_start + name_len > buf.len() {
        error!("GDFX: entry name at table offset {table_offset} runs past the directory table");
        return Err(Error::Corrupt("GDFX entry name truncated"));
    }
    let name = String::from_utf8_lossy(&buf[name_start..name_start + name_len]).into_owned();
    let record_len = round_up(ENTRY_HEADER_LEN + name_len as u64, 4);

    Ok(RawEntry {
        left_child,
        right_child,
        sector,
        size,
        attributes,
        name,
        table_offset: table_offset as u64,
        record_len,
    })
}

/// In-order traversal (left, node, right) of the BST rooted at table offset
/// 0, which yields every entry in ascending name order.
fn in_order(buf: &[u8], table_offset: u64, out: &mut Vec<RawEntry>) -> Result<()> {
    let raw = parse_entry(buf, table_offset as usize)?;
    if raw.left_child != 0 {
        in_order(buf, raw.left_child as u64 * 4, out)?;
    }
    let right_child = raw.right_child;
    out.push(raw);
    if right_child != 0 {
        in_order(buf, right_child as u64 * 4, out)?;
    }
    Ok(())
}

impl GdfxTree {
    pub fn new(root_sector: u32, root_size: u32, data_block_offset: u32, prologue_offset: u64) -> Self {
        let root = GdfxEntry {
            name: String::new(),
            attributes: ATTR_DIRECTORY,
            sector: root_sector,
            size: root_size,
            address: 0,
            file_index: 0,
            file_path: "/".to_string(),
            children: Vec::new(),
            children_listed: false,
        };
        Self {
            entries: vec![root],
            root: GdfxEntryId(0),
            data_block_offset,
            prologue_offset,
        }
    }

    pub fn root(&self) -> GdfxEntryId {
        self.root
    }

    pub fn entry(&self, id: GdfxEntryId) -> &GdfxEntry {
        &self.entries[id.0]
    }

    /// Reads `dir`'s entry table (`ceil(size / 0x800)` sectors, starting at
    /// `sector`), reconstructs the BST via an in-order traversal, and
    /// resorts it directories-first/ascending-name for presentation. Caches
    /// the result; subsequent calls are free.
    pub fn list_directory<IO: IndexableMultiFileIo>(&mut self, io: &mut IO, dir: GdfxEntryId) -> Result<&[GdfxEntryId]> {
        if self.entries[dir.0].children_listed {
            return Ok(self.entries[dir.0].children());
        }

        let (sector, size, path) = {
            let e = &self.entries[dir.0];
            (e.sector, e.size as u64, e.file_path.clone())
        };

        if size == 0 {
            self.entries[dir.0].children_listed = true;
            return Ok(self.entries[dir.0].children());
        }

        let sector_count = round_up(size, SECTOR_SIZE) / SECTOR_SIZE;
        let mut buf = vec![0u8; (sector_count * SECTOR_SIZE) as usize];
        let mut table_base_index = None;
        for s in 0..sector_count {
            let (file_index, offset) = sector_to_offset(sector as u64 + s, self.data_block_offset, self.prologue_offset);
            if table_base_index.is_none() {
                table_base_index = Some((file_index, offset));
            }
            io.set_position(offset, Some(file_index))?;
            let chunk = &mut buf[(s * SECTOR_SIZE) as usize..((s + 1) * SECTOR_SIZE) as usize];
            io.read_bytes(chunk)?;
        }
        let (table_file_index, table_base_offset) = table_base_index.unwrap();

        let mut raw_entries = Vec::new();
        in_order(&buf, 0, &mut raw_entries)?;

        let mut children = Vec::with_capacity(raw_entries.len());
        for raw in &raw_entries {
            let child_path = format!("{path}{}/", raw.name);
            let id = GdfxEntryId(self.entries.len());
            self.entries.push(GdfxEntry {
                name: raw.name.clone(),
                attributes: raw.attributes,
                sector: raw.sector,
                size: raw.size,
                address: table_base_offset + raw.table_offset,
                file_index: table_file_index,
                file_path: if raw.attributes & ATTR_DIRECTORY != 0 { child_path } else { path.clone() },
                children: Vec::new(),
                children_listed: false,
            });
            children.push(id);
        }

        children.sort_by(|&a, &b| {
            let ea = &self.entries[a.0];
            let eb = &self.entries[b.0];
            eb.is_directory().cmp(&ea.is_directory()).then_with(|| ea.name.cmp(&eb.name))
        });

        self.entries[dir.0].children = children;
        self.entries[dir.0].children_listed = true;
        Ok(self.entries[dir.0].children())
    }

    /// Descends from the root directory component by component, listing
    /// each directory lazily as it is entered, failing explicitly with
    /// `NotFound` when a component is missing (the source falls off the end
    /// of control flow here instead; see DESIGN.md).
    pub fn resolve<IO: IndexableMultiFileIo>(&mut self, io: &mut IO, path: &str) -> Result<GdfxEntryId> {
        let mut current = self.root;
        for component in path.trim_matches('/').split('/').filter(|c| !c.is_empty()) {
            self.list_directory(io, current)?;
            let children = self.entries[current.0].children.clone();
            let found = children.into_iter().find(|&id| self.entries[id.0].name == component);
            match found {
                Some(id) => current = id,
                None => {
                    error!("GDFX path component not found: {component} (in {path})");
                    return Err(Error::NotFound(path.to_string()));
                }
            }
        }
        Ok(current)
    }
}
