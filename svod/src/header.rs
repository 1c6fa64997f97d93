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

//! XContentHeader parsing: the packaged-content metadata at the top of an
//! SVOD root descriptor file. Only the fields the core touches are modeled;
//! everything else in the real 0x344+-byte header (signatures, certificate
//! chains, metadata strings, thumbnails) is explicitly out of scope and is
//! never read into a Rust type here — it is only ever passed through as an
//! opaque byte range when the core needs to hash or re-sign it.

use log::error;
use xcore_err::{Error, Result};
use xcore_io::{BlockDevice, SeekFrom};

/// Byte offset of the 4-byte magic.
pub const MAGIC_OFFSET: u64 = 0x0;
/// Byte offset of the 20-byte header hash, deliberately placed before the
/// region it covers.
pub const HEADER_HASH_OFFSET: u64 = 0x32C;
/// Byte offset of the `header_size` field.
pub const HEADER_SIZE_OFFSET: u64 = 0x340;
/// Byte offset of `content_type`, the first field of the hashed region.
pub const CONTENT_TYPE_OFFSET: u64 = 0x344;
/// Byte offset of `file_system`.
pub const FILE_SYSTEM_OFFSET: u64 = 0x3A8;
/// Byte offset of the SVOD volume descriptor (`flags`, `data_block_offset`,
/// `root_hash`).
pub const SVOD_DESCRIPTOR_OFFSET: u64 = 0x3AA;
/// The descriptor is `flags(1) + data_block_offset(4) + root_hash(20)` bytes
/// long; `title_id` immediately follows it.
pub const SVOD_DESCRIPTOR_LEN: u64 = 1 + 4 + 20;
pub const TITLE_ID_OFFSET: u64 = SVOD_DESCRIPTOR_OFFSET + SVOD_DESCRIPTOR_LEN;
/// Start of the region covered by `header_hash`.
pub const HASHED_REGION_START: u64 = CONTENT_TYPE_OFFSET;
/// Byte offset of the RSA signature `resign` overwrites. Immediately follows
/// the 4-byte magic; the `0x118` bytes starting here are the signature
/// `xcore_sign::HeaderSigner` produces over the header hash.
pub const SIGNATURE_OFFSET: u64 = 0x4;

const MAGIC_CON: [u8; 4] = *b"CON ";
const MAGIC_LIVE: [u8; 4] = *b"LIVE";
const MAGIC_PIRS: [u8; 4] = *b"PIRS";

/// Flag bit of `svod_volume_descriptor.flags` selecting the enhanced GDF
/// layout (no separate master hash table region ahead of the prologue).
pub const ENHANCED_GDF_LAYOUT: u8 = 0x40;

const FILE_SYSTEM_STFS: u16 = 0;
const FILE_SYSTEM_SVOD: u16 = 1;

pub const CONTENT_TYPE_GAME_ON_DEMAND: u32 = 0x7000;
pub const CONTENT_TYPE_INSTALLED_GAME: u32 = 0x4000;
pub const CONTENT_TYPE_XBOX_ORIGINAL_GAME: u32 = 0x5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Con,
    Live,
    Pirs,
}

impl Magic {
    fn from_bytes(bytes: [u8; 4]) -> Result<Self> {
        match bytes {
            MAGIC_CON => Ok(Magic::Con),
            MAGIC_LIVE => Ok(Magic::Live),
            MAGIC_PIRS => Ok(Magic::Pirs),
            other => {
                error!("XContent header has an unrecognized magic: {other:?}");
                Err(Error::Corrupt("unrecognized XContent magic"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemKind {
    Stfs,
    Svod,
}

impl FileSystemKind {
    fn from_u16(value: u16) -> Result<Self> {
        match value {
            FILE_SYSTEM_STFS => Ok(FileSystemKind::Stfs),
            FILE_SYSTEM_SVOD => Ok(FileSystemKind::Svod),
            other => {
                error!("XContent header has an unrecognized file_system kind: {other}");
                Err(Error::Corrupt("unrecognized file_system kind"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SvodVolumeDescriptor {
    pub flags: u8,
    pub data_block_offset: u32,
    pub root_hash: [u8; 20],
}

impl SvodVolumeDescriptor {
    pub fn is_enhanced_gdf_layout(&self) -> bool {
        self.flags & ENHANCED_GDF_LAYOUT != 0
    }
}

#[derive(Debug, Clone)]
pub struct XContentHeader {
    pub magic: Magic,
    pub header_hash: [u8; 20],
    pub header_size: u32,
    pub content_type: u32,
    pub file_system: FileSystemKind,
    pub svod_volume_descriptor: SvodVolumeDescriptor,
    pub title_id: u32,
}

impl XContentHeader {
    /// Parses the header fields the core needs, at their fixed offsets in
    /// `device` (the root descriptor file).
    pub fn read<BD: BlockDevice>(device: &mut BD) -> Result<Self> {
        device.set_position(SeekFrom::Start(MAGIC_OFFSET as i64))?;
        let mut magic_bytes = [0u8; 4];
        device.read_bytes(&mut magic_bytes)?;
        let magic = Magic::from_bytes(magic_bytes)?;

        device.set_position(SeekFrom::Start(HEADER_HASH_OFFSET as i64))?;
        let mut header_hash = [0u8; 20];
        device.read_bytes(&mut header_hash)?;

        device.set_position(SeekFrom::Start(HEADER_SIZE_OFFSET as i64))?;
        let header_size = device.read_u32()?;

        device.set_position(SeekFrom::Start(CONTENT_TYPE_OFFSET as i64))?;
        let content_type = device.read_u32()?;

        device.set_position(SeekFrom::Start(FILE_SYSTEM_OFFSET as i64))?;
        let file_system = FileSystemKind::from_u16(device.read_u16()?)?;

        device.set_position(SeekFrom::Start(SVOD_DESCRIPTOR_OFFSET as i64))?;
        let flags = device.read_u8()?;
        let data_block_offset = device.read_u32()?;
        let mut root_hash = [0u8; 20];
        device.read_bytes(&mut root_hash)?;

        device.set_position(SeekFrom::Start(TITLE_ID_OFFSET as i64))?;
        let title_id = device.read_u32()?;

        Ok(Self {
            magic,
            header_hash,
            header_size,
            content_type,
            file_system,
            svod_volume_descriptor: SvodVolumeDescriptor {
                flags,
                data_block_offset,
                root_hash,
            },
            title_id,
        })
    }

    pub fn require_svod_content(&self) -> Result<()> {
        if self.file_system != FileSystemKind::Svod {
            error!("SVOD: root descriptor's file_system is not SVOD");
            return Err(Error::UnsupportedContent("file_system is not SVOD"));
        }
        match self.content_type {
            CONTENT_TYPE_GAME_ON_DEMAND | CONTENT_TYPE_INSTALLED_GAME | CONTENT_TYPE_XBOX_ORIGINAL_GAME => Ok(()),
            other => {
                error!("SVOD: unrecognized content_type {other:#x}");
                Err(Error::UnsupportedContent("unrecognized content_type"))
            }
        }
    }

    /// Writes `flags`, `data_block_offset` and `root_hash` back to the
    /// descriptor's fixed offset.
    pub fn write_volume_descriptor<BD: BlockDevice>(&self, device: &mut BD) -> Result<()> {
        device.set_position(SeekFrom::Start(SVOD_DESCRIPTOR_OFFSET as i64))?;
        device.write_u8(self.svod_volume_descriptor.flags)?;
        device.write_u32(self.svod_volume_descriptor.data_block_offset)?;
        device.write_bytes(&self.svod_volume_descriptor.root_hash)?;
        device.flush()
    }

    /// Writes `header_hash` back to its fixed offset, ahead of the region it
    /// covers.
    pub fn write_header_hash<BD: BlockDevice>(&self, device: &mut BD) -> Result<()> {
        device.set_position(SeekFrom::Start(HEADER_HASH_OFFSET as i64))?;
        device.write_bytes(&self.header_hash)?;
        device.flush()
    }

    /// `[HASHED_REGION_START, round_up(header_size, 0x1000))`, the range
    /// `header_hash` is computed over.
    pub fn hashed_region_len(&self) -> u64 {
        round_up(self.header_size as u64, 0x1000).saturating_sub(HASHED_REGION_START)
    }
}

fn round_up(value: u64, to: u64) -> u64 {
    (value + to - 1) / to * to
}
