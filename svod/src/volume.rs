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

//! `SvodVolume`: ties the root descriptor's `XContentHeader`, the data-file
//! address space, and the `GdfxTree` together into the one entry point
//! callers mount.

use std::path::Path;

use xcore_err::Result;
use xcore_io::{BlockDevice, IndexableMultiFileIo, SeekFrom};
use xcore_sign::HeaderSigner;

use crate::gdfx::{self, GdfxEntry, GdfxEntryId, GdfxTree};
use crate::header::XContentHeader;
use crate::io::SvodIo;
use crate::rehash;
use crate::resign;

/// Enhanced GDF layout: prologue only, no separate master hash table region
/// ahead of it.
const ENHANCED_BASE_ADDRESS: u64 = 0x2000;
const ENHANCED_PROLOGUE_OFFSET: u64 = 0x2000;
/// Legacy layout: a 0x10000-byte master hash table region precedes the
/// prologue.
const LEGACY_BASE_ADDRESS: u64 = 0x12000;
const LEGACY_PROLOGUE_OFFSET: u64 = 0x1000;

/// A mounted SVOD volume: the root descriptor's header plus the GDFX
/// directory tree over its data files.
pub struct SvodVolume<BD: BlockDevice, IO: IndexableMultiFileIo> {
    root_device: BD,
    io: IO,
    header: XContentHeader,
    tree: GdfxTree,
}

impl<BD: BlockDevice, IO: IndexableMultiFileIo> SvodVolume<BD, IO> {
    /// Reads the root descriptor's `XContentHeader`, validates it names SVOD
    /// content, derives the layout's base address and prologue offset from
    /// `svod_volume_descriptor.flags`, and parses the GDFX root-volume header
    /// out of `io` to seed the directory tree.
    pub fn open(mut root_device: BD, mut io: IO) -> Result<Self> {
        let header = XContentHeader::read(&mut root_device)?;
        header.require_svod_content()?;

        let enhanced = header.svod_volume_descriptor.is_enhanced_gdf_layout();
        let base_address = if enhanced { ENHANCED_BASE_ADDRESS } else { LEGACY_BASE_ADDRESS };
        let prologue_offset = if enhanced { ENHANCED_PROLOGUE_OFFSET } else { LEGACY_PROLOGUE_OFFSET };

        io.set_position(base_address, Some(0))?;
        let gdfx_header = gdfx::read_header(&mut io)?;

        let data_block_offset = header.svod_volume_descriptor.data_block_offset;
        let tree = GdfxTree::new(gdfx_header.root_sector, gdfx_header.root_size, data_block_offset, prologue_offset);

        Ok(Self { root_device, io, header, tree })
    }

    pub fn header(&self) -> &XContentHeader {
        &self.header
    }

    pub fn root(&self) -> GdfxEntryId {
        self.tree.root()
    }

    pub fn entry(&self, id: GdfxEntryId) -> &GdfxEntry {
        self.tree.entry(id)
    }

    pub fn list_directory(&mut self, dir: GdfxEntryId) -> Result<&[GdfxEntryId]> {
        self.tree.list_directory(&mut self.io, dir)
    }

    /// Resolves a `/`-separated path from the volume root, listing
    /// directories lazily as it descends.
    pub fn resolve(&mut self, path: &str) -> Result<GdfxEntryId> {
        self.tree.resolve(&mut self.io, path)
    }

    /// Opens a file-like view over `entry`, which must not be a directory.
    pub fn open_entry(&mut self, entry: GdfxEntryId) -> Result<SvodIo<'_, IO>> {
        let e = self.tree.entry(entry);
        let (base_sector, size, data_block_offset, prologue_offset) =
            (e.sector, e.size as u64, self.header.svod_volume_descriptor.data_block_offset, self.prologue_offset());
        SvodIo::new(&mut self.io, base_sector, size, data_block_offset, prologue_offset)
    }

    fn prologue_offset(&self) -> u64 {
        if self.header.svod_volume_descriptor.is_enhanced_gdf_layout() {
            ENHANCED_PROLOGUE_OFFSET
        } else {
            LEGACY_PROLOGUE_OFFSET
        }
    }

    /// Rebuilds the three-level hash tree over every data file and
    /// refreshes `header_hash`, reporting `(files_done, files_total)` as it
    /// goes.
    pub fn rehash<H: xcore_hash::Sha1Digest>(&mut self, hasher: &H, progress: impl FnMut(u32, u32)) -> Result<()> {
        rehash::rehash(&mut self.root_device, &mut self.io, &mut self.header, hasher, progress)
    }

    /// Resigns the root descriptor's console signature. Fails with
    /// `NotResignable` unless the header's magic is `CON`.
    pub fn resign<S: HeaderSigner>(&mut self, signer: &S, key_vault_path: &Path) -> Result<()> {
        resign::resign(&mut self.root_device, &self.header, signer, key_vault_path)
    }

    pub fn into_parts(self) -> (BD, IO) {
        (self.root_device, self.io)
    }
}

impl<BD: BlockDevice, IO: IndexableMultiFileIo> Drop for SvodVolume<BD, IO> {
    fn drop(&mut self) {
        let _ = self.root_device.flush();
        let _ = self.io.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcore_err::{Error, Result as XResult};
    use xcore_io::MemoryBlockDevice;

    struct SingleFileMultiIo {
        dev: MemoryBlockDevice,
        pos: u64,
    }

    impl SingleFileMultiIo {
        fn new(len: usize) -> Self {
            Self { dev: MemoryBlockDevice::zeroed(len), pos: 0 }
        }
    }

    impl IndexableMultiFileIo for SingleFileMultiIo {
        fn set_position(&mut self, offset: u64, file_index: Option<usize>) -> XResult<()> {
            if matches!(file_index, Some(i) if i != 0) {
                return Err(Error::OutOfRange);
            }
            self.dev.set_position(SeekFrom::Start(offset as i64))?;
            self.pos = offset;
            Ok(())
        }
        fn position(&self) -> (u64, usize) {
            (self.pos, 0)
        }
        fn read_bytes(&mut self, buf: &mut [u8]) -> XResult<()> {
            self.dev.read_bytes(buf)?;
            self.pos += buf.len() as u64;
            Ok(())
        }
        fn write_bytes(&mut self, buf: &[u8]) -> XResult<()> {
            self.dev.write_bytes(buf)?;
            self.pos += buf.len() as u64;
            Ok(())
        }
        fn current_file_length(&mut self) -> XResult<u64> {
            Ok(self.dev.len() as u64)
        }
        fn file_count(&self) -> usize {
            1
        }
        fn close(&mut self) -> XResult<()> {
            Ok(())
        }
        fn flush(&mut self) -> XResult<()> {
            self.dev.flush()
        }
    }

    fn build_root_device(content_type: u32, enhanced: bool) -> MemoryBlockDevice {
        use crate::header::{
            CONTENT_TYPE_OFFSET, FILE_SYSTEM_OFFSET, HEADER_SIZE_OFFSET, MAGIC_OFFSET, SVOD_DESCRIPTOR_OFFSET, TITLE_ID_OFFSET,
        };
        let mut dev = MemoryBlockDevice::zeroed(0x2000);
        dev.set_position(SeekFrom::Start(MAGIC_OFFSET as i64)).unwrap();
        dev.write_bytes(b"CON ").unwrap();
        dev.set_position(SeekFrom::Start(HEADER_SIZE_OFFSET as i64)).unwrap();
        dev.write_u32(0x344).unwrap();
        dev.set_position(SeekFrom::Start(CONTENT_TYPE_OFFSET as i64)).unwrap();
        dev.write_u32(content_type).unwrap();
        dev.set_position(SeekFrom::Start(FILE_SYSTEM_OFFSET as i64)).unwrap();
        dev.write_u16(1).unwrap();
        dev.set_position(SeekFrom::Start(SVOD_DESCRIPTOR_OFFSET as i64)).unwrap();
        dev.write_u8(if enhanced { crate::header::ENHANCED_GDF_LAYOUT } else { 0 }).unwrap();
        dev.write_u32(0).unwrap();
        dev.write_bytes(&[0u8; 20]).unwrap();
        dev.set_position(SeekFrom::Start(TITLE_ID_OFFSET as i64)).unwrap();
        dev.write_u32(0).unwrap();
        dev
    }

    fn write_gdfx_header(io: &mut SingleFileMultiIo, base_address: u64, root_sector: u32, root_size: u32) {
        io.set_position(base_address, Some(0)).unwrap();
        io.write_bytes(&gdfx::GDFX_MAGIC).unwrap();
        io.write_bytes(&root_sector.to_be_bytes()).unwrap();
        io.write_bytes(&root_size.to_be_bytes()).unwrap();
        io.write_bytes(&0u64.to_be_bytes()).unwrap();
    }

    #[test]
    fn open_parses_enhanced_layout_header_at_its_base_address() {
        let root_device = build_root_device(crate::header::CONTENT_TYPE_GAME_ON_DEMAND, true);
        let mut io = SingleFileMultiIo::new(0x100000);
        write_gdfx_header(&mut io, ENHANCED_BASE_ADDRESS, 3, 0x800);

        let volume = SvodVolume::open(root_device, io).unwrap();
        let root = volume.root();
        assert!(volume.entry(root).is_directory());
    }

    #[test]
    fn open_rejects_non_svod_content() {
        use crate::header::{FILE_SYSTEM_OFFSET, MAGIC_OFFSET};
        let mut root_device = build_root_device(crate::header::CONTENT_TYPE_GAME_ON_DEMAND, true);
        root_device.set_position(SeekFrom::Start(FILE_SYSTEM_OFFSET as i64)).unwrap();
        root_device.write_u16(0).unwrap();
        root_device.set_position(SeekFrom::Start(MAGIC_OFFSET as i64)).unwrap();

        let mut io = SingleFileMultiIo::new(0x100000);
        write_gdfx_header(&mut io, ENHANCED_BASE_ADDRESS, 3, 0x800);

        assert!(matches!(SvodVolume::open(root_device, io), Err(Error::UnsupportedContent(_))));
    }

    #[test]
    fn resolve_and_open_entry_round_trip_file_contents() {
        let root_device = build_root_device(crate::header::CONTENT_TYPE_GAME_ON_DEMAND, true);
        let mut io = SingleFileMultiIo::new(0x200000);

        // Root directory table: one file entry "a.txt" at sector 64, size 0x10.
        let root_sector = 3u32;
        let (file_index, table_offset) = crate::sector::sector_to_offset(root_sector as u64, 0, ENHANCED_PROLOGUE_OFFSET);
        assert_eq!(file_index, 0);
        let mut table = vec![0u8; 0x800];
        table[0..2].copy_from_slice(&0u16.to_be_bytes());
        table[2..4].copy_from_slice(&0u16.to_be_bytes());
        table[4..8].copy_from_slice(&64u32.to_be_bytes());
        table[8..12].copy_from_slice(&0x10u32.to_be_bytes());
        table[12] = 0;
        table[13] = 5;
        table[14..19].copy_from_slice(b"a.txt");
        io.set_position(table_offset, Some(0)).unwrap();
        io.write_bytes(&table).unwrap();

        write_gdfx_header(&mut io, ENHANCED_BASE_ADDRESS, root_sector, 0x800);

        let mut volume = SvodVolume::open(root_device, io).unwrap();
        let entry_id = volume.resolve("a.txt").unwrap();
        assert!(!volume.entry(entry_id).is_directory());

        let pattern: Vec<u8> = (0..0x10u32).map(|i| i as u8).collect();
        {
            let mut file_io = volume.open_entry(entry_id).unwrap();
            file_io.write_bytes(&pattern).unwrap();
        }
        let mut readback = vec![0u8; 0x10];
        {
            let mut file_io = volume.open_entry(entry_id).unwrap();
            file_io.read_bytes(&mut readback).unwrap();
        }
        assert_eq!(readback, pattern);
    }
}
