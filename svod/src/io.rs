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

//! `SvodIo`: a file-like view over one `GdfxEntry`, hiding the data-file
//! boundaries, the per-0x198-sector hash-table interleaving, and the
//! 0x1000/0x2000 prologue from the caller.

use log::error;
use xcore_err::{Error, Result};
use xcore_io::IndexableMultiFileIo;

use crate::sector::{sector_to_offset, SECTORS_PER_DATA_FILE, SECTORS_PER_HASH_GROUP, SECTOR_SIZE};

pub struct SvodIo<'a, IO: IndexableMultiFileIo> {
    io: &'a mut IO,
    base_sector: u32,
    size: u64,
    data_block_offset: u32,
    prologue_offset: u64,
    pos: u64,
    max_consecutive: u64,
}

/// Bytes available starting at `offset_in_sector` within `logical_sector`
/// before either the current 0x198-sector hash group or the current data
/// file runs out (whichever comes first).
fn bytes_until_next_gap(logical_sector: u64, data_block_offset: u32, offset_in_sector: u64) -> u64 {
    let adjusted = logical_sector - 2 * data_block_offset as u64;
    let true_sector = adjusted % SECTORS_PER_DATA_FILE;

    let sectors_left_in_group = SECTORS_PER_HASH_GROUP - (true_sector % SECTORS_PER_HASH_GROUP);
    let sectors_left_in_file = SECTORS_PER_DATA_FILE - true_sector;
    let sectors_contiguous = sectors_left_in_group.min(sectors_left_in_file);

    sectors_contiguous * SECTOR_SIZE - offset_in_sector
}

impl<'a, IO: IndexableMultiFileIo> SvodIo<'a, IO> {
    pub fn new(io: &'a mut IO, base_sector: u32, size: u64, data_block_offset: u32, prologue_offset: u64) -> Result<Self> {
        let mut svod_io = Self {
            io,
            base_sector,
            size,
            data_block_offset,
            prologue_offset,
            pos: 0,
            max_consecutive: 0,
        };
        svod_io.set_position(0)?;
        Ok(svod_io)
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    /// Seeking to exactly `size` is permitted; subsequent reads/writes then
    /// fail since no bytes remain.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        if position > self.size {
            error!("SvodIo: seek {position} exceeds entry size {}", self.size);
            return Err(Error::OutOfRange);
        }
        self.pos = position;
        if position == self.size {
            return Ok(());
        }

        let logical_sector = self.base_sector as u64 + position / SECTOR_SIZE;
        let offset_in_sector = position % SECTOR_SIZE;
        let (file_index, file_offset) = sector_to_offset(logical_sector, self.data_block_offset, self.prologue_offset);
        self.io.set_position(file_offset + offset_in_sector, Some(file_index))?;
        self.max_consecutive = bytes_until_next_gap(logical_sector, self.data_block_offset, offset_in_sector);
        Ok(())
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() as u64 > self.size - self.pos {
            error!("SvodIo: read of {} bytes exceeds remaining entry bytes", buf.len());
            return Err(Error::OutOfRange);
        }
        let mut written = 0usize;
        let mut remaining = buf.len() as u64;
        while remaining > 0 {
            let chunk = remaining.min(self.max_consecutive);
            self.io.read_bytes(&mut buf[written..written + chunk as usize])?;
            written += chunk as usize;
            remaining -= chunk;
            self.set_position(self.pos + chunk)?;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        if buf.len() as u64 > self.size - self.pos {
            error!("SvodIo: write of {} bytes exceeds remaining entry bytes", buf.len());
            return Err(Error::OutOfRange);
        }
        let mut read = 0usize;
        let mut remaining = buf.len() as u64;
        while remaining > 0 {
            let chunk = remaining.min(self.max_consecutive);
            self.io.write_bytes(&buf[read..read + chunk as usize])?;
            read += chunk as usize;
            remaining -= chunk;
            self.set_position(self.pos + chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcore_io::{IndexableMultiFileIo, MemoryBlockDevice};

    /// A single-data-file `IndexableMultiFileIo` backed by one
    /// `MemoryBlockDevice`, standing in for a directory with one data file
    /// in these unit tests.
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
        fn set_position(&mut self, offset: u64, file_index: Option<usize>) -> Result<()> {
            if matches!(file_index, Some(i) if i != 0) {
                return Err(Error::OutOfRange);
            }
            self.dev.set_position(xcore_io::SeekFrom::Start(offset as i64))?;
            self.pos = offset;
            Ok(())
        }
        fn position(&self) -> (u64, usize) {
            (self.pos, 0)
        }
        fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
            self.dev.read_bytes(buf)?;
            self.pos += buf.len() as u64;
            Ok(())
        }
        fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
            self.dev.write_bytes(buf)?;
            self.pos += buf.len() as u64;
            Ok(())
        }
        fn current_file_length(&mut self) -> Result<u64> {
            Ok(self.dev.len() as u64)
        }
        fn file_count(&self) -> usize {
            1
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            self.dev.flush()
        }
    }

    #[test]
    fn read_write_symmetry_within_one_hash_group() {
        let mut multi = SingleFileMultiIo::new(0x20000);
        let pattern: Vec<u8> = (0..0x1000u32).map(|i| (i % 251) as u8).collect();

        {
            let mut io = SvodIo::new(&mut multi, 0, 0x1000, 0, 0x2000).unwrap();
            io.write_bytes(&pattern).unwrap();
        }

        let mut io = SvodIo::new(&mut multi, 0, 0x1000, 0, 0x2000).unwrap();
        let mut readback = vec![0u8; 0x1000];
        io.read_bytes(&mut readback).unwrap();
        assert_eq!(readback, pattern);
    }

    #[test]
    fn set_position_to_exactly_size_is_permitted() {
        let mut multi = SingleFileMultiIo::new(0x10000);
        let mut io = SvodIo::new(&mut multi, 0, 0x800, 0, 0x2000).unwrap();
        io.set_position(0x800).unwrap();
        assert_eq!(io.position(), 0x800);
    }

    #[test]
    fn seek_past_end_fails() {
        let mut multi = SingleFileMultiIo::new(0x10000);
        let mut io = SvodIo::new(&mut multi, 0, 0x800, 0, 0x2000).unwrap();
        assert!(matches!(io.set_position(0x801), Err(Error::OutOfRange)));
    }

    #[test]
    fn read_spans_a_hash_group_boundary() {
        let total_sectors = SECTORS_PER_HASH_GROUP + 4;
        let size = total_sectors * SECTOR_SIZE;
        let mut multi = SingleFileMultiIo::new(0x1000000);
        let pattern: Vec<u8> = (0..size as u32).map(|i| (i % 251) as u8).collect();

        {
            let mut io = SvodIo::new(&mut multi, 0, size, 0, 0x2000).unwrap();
            io.write_bytes(&pattern).unwrap();
        }

        let mut io = SvodIo::new(&mut multi, 0, size, 0, 0x2000).unwrap();
        let mut readback = vec![0u8; size as usize];
        io.read_bytes(&mut readback).unwrap();
        assert_eq!(readback, pattern);
    }
}
