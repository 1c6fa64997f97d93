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

//! SVOD (Secure Virtual Optical Disk): the virtualized disc container format
//! used to host Xbox 360 game discs as a directory of data files alongside
//! an XContent root descriptor. This crate mounts that descriptor, exposes
//! its GDFX directory tree and file contents through `xcore_io`'s
//! collaborator traits, and rebuilds/resigns the hash tree that protects it.
//! It touches storage only through `xcore_io::BlockDevice` and
//! `xcore_io::IndexableMultiFileIo`, so it mounts equally well on a native
//! directory (`xcore_io_std::DirectoryMultiFileIo`) or on files hosted
//! inside a FATX volume (`xcore_fatx::FatxIndexableMultiFileIo`).

mod gdfx;
mod header;
mod io;
mod rehash;
mod resign;
mod sector;
mod volume;

pub use gdfx::{GdfxEntry, GdfxEntryId, GdfxHeader, GdfxTree, ATTR_DIRECTORY, GDFX_MAGIC};
pub use header::{
    FileSystemKind, Magic, SvodVolumeDescriptor, XContentHeader, CONTENT_TYPE_GAME_ON_DEMAND, CONTENT_TYPE_INSTALLED_GAME,
    CONTENT_TYPE_XBOX_ORIGINAL_GAME, ENHANCED_GDF_LAYOUT,
};
pub use io::SvodIo;
pub use rehash::rehash;
pub use resign::resign;
pub use sector::{sector_to_offset, SECTORS_PER_DATA_FILE, SECTORS_PER_HASH_GROUP, SECTOR_SIZE};
pub use volume::SvodVolume;
