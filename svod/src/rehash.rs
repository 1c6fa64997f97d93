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

//! Rebuilds the three-level hash tree over an SVOD volume's data files:
//! level-0 tables over 4 KiB data blocks, a master table per data file, and
//! the root hash stored in the XContent header.

use log::debug;
use xcore_err::Result;
use xcore_hash::Sha1Digest;
use xcore_io::{BlockDevice, IndexableMultiFileIo, SeekFrom};

use crate::header::{XContentHeader, HASHED_REGION_START};

const HASH_TABLE_SIZE: u64 = 0x1000;
const DATA_BLOCKS_PER_HASH_TABLE: u64 = 0xCC;
/// `0x1000` level-0 table header + `0xCC` 4 KiB data blocks.
const HASH_GROUP_SIZE: u64 = HASH_TABLE_SIZE + DATA_BLOCKS_PER_HASH_TABLE * HASH_TABLE_SIZE;
const DIGEST_LEN: usize = 20;

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Walks the SVOD volume's data files from highest index to zero, rebuilding
/// each file's level-0 and master hash tables, then rewrites the XContent
/// header's `root_hash` and `header_hash`.
pub fn rehash<BD: BlockDevice, IO: IndexableMultiFileIo, H: Sha1Digest>(
    root_device: &mut BD,
    io: &mut IO,
    header: &mut XContentHeader,
    hasher: &H,
    mut progress: impl FnMut(u32, u32),
) -> Result<()> {
    let file_count = io.file_count();
    let mut prev_hash = [0u8; DIGEST_LEN];

    for i in (0..file_count).rev() {
        io.set_position(0x2000, Some(i))?;
        let file_length = io.current_file_length()?;
        let hash_table_count = div_ceil(file_length - 0x2000, HASH_GROUP_SIZE);
        let mut remaining_blocks = (file_length - 0x1000 - hash_table_count * HASH_TABLE_SIZE) >> 12;

        let mut master = [0u8; HASH_TABLE_SIZE as usize];
        for x in 0..hash_table_count {
            io.set_position(0x2000 + x * HASH_GROUP_SIZE, Some(i))?;
            let block_count = remaining_blocks.min(DATA_BLOCKS_PER_HASH_TABLE);
            remaining_blocks = remaining_blocks.saturating_sub(DATA_BLOCKS_PER_HASH_TABLE);

            let mut level0 = [0u8; HASH_TABLE_SIZE as usize];
            for y in 0..block_count {
                let mut block = [0u8; HASH_TABLE_SIZE as usize];
                io.read_bytes(&mut block)?;
                let digest = hasher.sha1(&block);
                let off = (y as usize) * DIGEST_LEN;
                level0[off..off + DIGEST_LEN].copy_from_slice(&digest);
            }

            io.set_position(0x1000 + x * HASH_GROUP_SIZE, Some(i))?;
            io.write_bytes(&level0)?;

            let table_digest = hasher.sha1(&level0);
            let off = (x as usize) * DIGEST_LEN;
            master[off..off + DIGEST_LEN].copy_from_slice(&table_digest);
        }

        let prev_off = (hash_table_count as usize) * DIGEST_LEN;
        master[prev_off..prev_off + DIGEST_LEN].copy_from_slice(&prev_hash);

        io.set_position(0, Some(i))?;
        io.write_bytes(&master)?;

        prev_hash = hasher.sha1(&master);
        debug!("rehashed data file {i} ({hash_table_count} level-0 tables)");
        progress((file_count - i) as u32, file_count as u32);
    }

    header.svod_volume_descriptor.root_hash = prev_hash;
    header.write_volume_descriptor(root_device)?;

    let hashed_len = header.hashed_region_len();
    root_device.set_position(SeekFrom::Start(HASHED_REGION_START as i64))?;
    let mut hashed_region = vec![0u8; hashed_len as usize];
    root_device.read_bytes(&mut hashed_region)?;
    header.header_hash = hasher.sha1(&hashed_region);
    header.write_header_hash(root_device)
}
