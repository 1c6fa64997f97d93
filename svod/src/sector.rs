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

//! The sector-to-offset mapping shared by GDFX directory traversal, `SvodIO`,
//! and the rehash pipeline: every logical sector of the virtual volume is
//! interleaved with level-0 hash tables and, at the head of each data file, a
//! prologue (and on the enhanced GDF layout, a master hash table too).

pub const SECTOR_SIZE: u64 = 0x800;
pub const SECTORS_PER_DATA_FILE: u64 = 0x14388;
pub const SECTORS_PER_HASH_GROUP: u64 = 0x198;
pub const DATA_BLOCKS_PER_HASH_TABLE: u64 = 0xCC;
pub const HASH_TABLE_SIZE: u64 = 0x1000;

pub fn round_up(value: u64, to: u64) -> u64 {
    (value + to - 1) / to * to
}

/// Maps a logical sector `sector` to `(file_index, offset_in_data_file)`,
/// given the descriptor's `data_block_offset` and the layout's prologue size.
pub fn sector_to_offset(sector: u64, data_block_offset: u32, prologue_offset: u64) -> (usize, u64) {
    let adjusted = sector - 2 * data_block_offset as u64;
    let file_index = (adjusted / SECTORS_PER_DATA_FILE) as usize;
    let true_sector = adjusted % SECTORS_PER_DATA_FILE;
    // A hash table precedes every run of SECTORS_PER_HASH_GROUP sectors, but
    // a sector that lands exactly on a group boundary (other than sector 0)
    // does not pull in another one of its own.
    let extra = if true_sector % SECTORS_PER_HASH_GROUP != 0 || true_sector == 0 { 1 } else { 0 };
    let hash_table_bytes = (true_sector / SECTORS_PER_HASH_GROUP + extra) * HASH_TABLE_SIZE;
    let offset = true_sector * SECTOR_SIZE + prologue_offset + hash_table_bytes;
    (file_index, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_zero_lands_after_prologue_and_first_hash_table() {
        assert_eq!(sector_to_offset(0, 0, 0x2000), (0, 0x3000));
    }

    #[test]
    fn sector_at_next_hash_group_crosses_a_second_table() {
        let (file_index, offset) = sector_to_offset(0x198, 0, 0x2000);
        assert_eq!(file_index, 0);
        assert_eq!(offset, 0x3000 + 0x198 * 0x800);
    }

    #[test]
    fn sector_to_offset_is_injective_within_one_data_file() {
        let mut seen = std::collections::HashSet::new();
        for sector in 0..(SECTORS_PER_DATA_FILE as u64) {
            let mapped = sector_to_offset(sector, 0, 0x2000);
            assert!(seen.insert(mapped), "collision at sector {sector}");
        }
    }

    #[test]
    fn data_block_offset_shifts_the_starting_sector() {
        let (file_index_a, offset_a) = sector_to_offset(10, 5, 0x2000);
        let (file_index_b, offset_b) = sector_to_offset(0, 0, 0x2000);
        assert_eq!(file_index_a, file_index_b);
        assert_eq!(offset_a, offset_b);
    }
}
