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

//! The in-memory directory graph cached from a mounted volume, and the
//! volume type that owns both the partition and the arena of entries.

use log::error;
use xcore_err::{Error, Result};
use xcore_io::{BlockDevice, SeekFrom};

use crate::partition::{self, Partition};

pub const ENTRY_RECORD_SIZE: u64 = 0x40;
pub const MAX_NAME_LEN: usize = 42;
pub const ENTRY_DELETED: u8 = 0xE5;
pub const ENTRY_END: u8 = 0xFF;
pub const ATTR_DIRECTORY: u8 = 0x10;

/// Stable index into a `FatxVolume`'s entry arena. Entries reference their
/// parent by index, never by owning pointer, so the directory graph has no
/// cycles to manage at the Rust ownership level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) usize);

pub struct FatxEntry {
    pub name: String,
    pub(crate) name_len: u8,
    pub file_attributes: u8,
    pub starting_cluster: u32,
    pub file_size: u32,
    pub created: u32,
    pub written: u32,
    pub accessed: u32,
    pub(crate) address: u64,
    pub cluster_chain: Vec<u32>,
    pub(crate) children: Vec<EntryId>,
    pub parent: Option<EntryId>,
    pub(crate) children_listed: bool,
}

impl FatxEntry {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.name_len == ENTRY_DELETED
    }

    pub fn children(&self) -> &[EntryId] {
        &self.children
    }
}

/// Owns a mounted partition plus the arena of `FatxFileEntry` records cached
/// from it. Directory listing is lazy: a directory's children are read from
/// its cluster chain the first time they are asked for.
pub struct FatxVolume<BD: BlockDevice> {
    pub device: BD,
    pub partition: Partition,
    entries: Vec<FatxEntry>,
    root: EntryId,
}

impl<BD: BlockDevice> FatxVolume<BD> {
    pub fn mount(mut device: BD, partition_address: u64, partition_size: u64) -> Result<Self> {
        let partition = partition::mount(&mut device, partition_address, partition_size)?;
        let root_cluster = partition.root_dir_first_cluster;
        let cluster_chain = partition::read_cluster_chain(&mut device, &partition, root_cluster)?;

        let entries = vec![FatxEntry {
            name: String::new(),
            name_len: 0,
            file_attributes: ATTR_DIRECTORY,
            starting_cluster: root_cluster,
            file_size: 0,
            created: 0,
            written: 0,
            accessed: 0,
            address: 0,
            cluster_chain,
            children: Vec::new(),
            parent: None,
            children_listed: false,
        }];

        Ok(Self {
            device,
            partition,
            entries,
            root: EntryId(0),
        })
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    pub fn entry(&self, id: EntryId) -> &FatxEntry {
        &self.entries[id.0]
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<FatxEntry> {
        &mut self.entries
    }

    /// Lists `dir`'s children, reading its cluster chain the first time this
    /// is called and caching the result thereafter.
    pub fn list_directory(&mut self, dir: EntryId) -> Result<&[EntryId]> {
        if self.entries[dir.0].children_listed {
            return Ok(self.entries[dir.0].children());
        }

        let chain = self.entries[dir.0].cluster_chain.clone();
        let cluster_size = self.partition.cluster_size;
        let records_per_cluster = cluster_size / ENTRY_RECORD_SIZE;
        let mut children = Vec::new();

        'outer: for &cluster in &chain {
            let base = self.partition.cluster_to_offset(cluster);
            for r in 0..records_per_cluster {
                let record_addr = base + r * ENTRY_RECORD_SIZE;
                self.device.set_position(SeekFrom::Start(record_addr as i64))?;

                let name_len = self.device.read_u8()?;
                if name_len == ENTRY_END {
                    break 'outer;
                }
                let attributes = self.device.read_u8()?;
                let mut raw_name = [0u8; MAX_NAME_LEN];
                self.device.read_bytes(&mut raw_name)?;
                let starting_cluster = self.device.read_u32()?;
                let file_size = self.device.read_u32()?;
                // MS-DOS packed timestamps are stored little-endian, unlike
                // every other multi-byte field in the record.
                let created = self.device.read_u32_le()?;
                let written = self.device.read_u32_le()?;
                let accessed = self.device.read_u32_le()?;

                if name_len == ENTRY_DELETED {
                    continue;
                }

                let name_bytes = &raw_name[..(name_len as usize).min(MAX_NAME_LEN)];
                let name = String::from_utf8_lossy(name_bytes).into_owned();

                let cluster_chain = if starting_cluster == 0 {
                    Vec::new()
                } else {
                    partition::read_cluster_chain(&mut self.device, &self.partition, starting_cluster)?
                };

                let id = EntryId(self.entries.len());
                self.entries.push(FatxEntry {
                    name,
                    name_len,
                    file_attributes: attributes,
                    starting_cluster,
                    file_size,
                    created,
                    written,
                    accessed,
                    address: record_addr,
                    cluster_chain,
                    children: Vec::new(),
                    parent: Some(dir),
                    children_listed: false,
                });
                children.push(id);
            }
        }

        self.entries[dir.0].children = children;
        self.entries[dir.0].children_listed = true;
        Ok(self.entries[dir.0].children())
    }

    /// Descends from the root directory component by component, listing each
    /// directory lazily as it is entered.
    pub fn resolve(&mut self, path: &str) -> Result<EntryId> {
        let mut current = self.root;
        for component in path.trim_matches('/').split('/').filter(|c| !c.is_empty()) {
            self.list_directory(current)?;
            let children = self.entries[current.0].children.clone();
            let found = children.into_iter().find(|&id| self.entries[id.0].name == component);
            match found {
                Some(id) => current = id,
                None => {
                    error!("FATX path component not found: {component} (in {path})");
                    return Err(Error::NotFound(path.to_string()));
                }
            }
        }
        Ok(current)
    }

    /// Serializes an entry's fixed-size directory record. If `new_chain` is
    /// given, the entry's previous chain is freed first and the new one
    /// written, in that order.
    pub fn write_entry_to_disk(&mut self, id: EntryId, new_chain: Option<&[u32]>) -> Result<()> {
        let is_deleted = self.entries[id.0].name_len == ENTRY_DELETED;
        let name_len: u8 = if is_deleted {
            ENTRY_DELETED
        } else {
            let len = self.entries[id.0].name.len();
            if len > MAX_NAME_LEN {
                error!("FATX entry name {} exceeds {MAX_NAME_LEN} bytes", self.entries[id.0].name);
                return Err(Error::NameTooLong);
            }
            len as u8
        };
        self.entries[id.0].name_len = name_len;

        if let Some(chain) = new_chain {
            let starting_cluster = self.entries[id.0].starting_cluster;
            if chain.is_empty() || starting_cluster != chain[0] {
                error!("FATX: starting cluster {starting_cluster} does not match new chain head");
                return Err(Error::BadChain("starting cluster mismatch"));
            }
        }

        let e = &self.entries[id.0];
        let address = e.address;
        let attributes = e.file_attributes;
        let name = e.name.clone();
        let starting_cluster = e.starting_cluster;
        let file_size = e.file_size;
        let created = e.created;
        let written = e.written;
        let accessed = e.accessed;
        let old_chain = e.cluster_chain.clone();

        self.device.set_position(SeekFrom::Start(address as i64))?;
        self.device.write_u8(name_len)?;
        self.device.write_u8(attributes)?;
        self.device.write_fixed_ascii(&name, MAX_NAME_LEN, ENTRY_END)?;
        self.device.write_u32(starting_cluster)?;
        self.device.write_u32(file_size)?;
        self.device.write_u32_le(created)?;
        self.device.write_u32_le(written)?;
        self.device.write_u32_le(accessed)?;

        if let Some(chain) = new_chain {
            if !old_chain.is_empty() {
                partition::free_cluster_chain(&mut self.device, &self.partition, &old_chain)?;
            }
            partition::write_cluster_chain(&mut self.device, &self.partition, chain)?;
            self.entries[id.0].cluster_chain = chain.to_vec();
        }

        Ok(())
    }

    /// Marks `id` deleted (`name_len = 0xE5`), leaves the rest of its record
    /// bytes untouched, and frees its cluster chain back into the free list
    /// in ascending order.
    pub fn delete_entry(&mut self, id: EntryId) -> Result<()> {
        self.entries[id.0].name_len = ENTRY_DELETED;
        let address = self.entries[id.0].address;
        self.device.set_position(SeekFrom::Start(address as i64))?;
        self.device.write_u8(ENTRY_DELETED)?;

        let chain = std::mem::take(&mut self.entries[id.0].cluster_chain);
        if !chain.is_empty() {
            partition::free_cluster_chain(&mut self.device, &self.partition, &chain)?;
            for c in chain {
                let pos = self.partition.free_clusters.partition_point(|&x| x < c);
                self.partition.free_clusters.insert(pos, c);
            }
        }
        Ok(())
    }
}
