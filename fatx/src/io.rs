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

//! `FatxIo`: a file-like view over one entry that hides cluster boundaries.

use log::error;
use xcore_err::{Error, Result};
use xcore_io::{BlockDevice, SeekFrom};

use crate::entry::{EntryId, FatxVolume};
use crate::partition;

pub struct FatxIo<'a, BD: BlockDevice> {
    volume: &'a mut FatxVolume<BD>,
    entry: EntryId,
    pos: u64,
    max_read_consecutive: u64,
}

impl<'a, BD: BlockDevice> FatxIo<'a, BD> {
    pub fn new(volume: &'a mut FatxVolume<BD>, entry: EntryId) -> Result<Self> {
        let mut io = Self {
            volume,
            entry,
            pos: 0,
            max_read_consecutive: 0,
        };
        io.set_position(0)?;
        Ok(io)
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Translates a file-relative offset into an absolute device offset and
    /// precomputes the consecutive-byte budget before the chain has to be
    /// re-indexed. Seeking to exactly `file_size` is permitted for files
    /// (subsequent reads then fail); directories may seek past their
    /// recorded size since it only reflects initial chain growth.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        let (file_size, is_dir, cluster_size) = {
            let e = self.volume.entry(self.entry);
            (e.file_size as u64, e.is_directory(), self.volume.partition.cluster_size)
        };

        if position > file_size && !is_dir {
            error!("FATX: seek {position} exceeds file size {file_size}");
            return Err(Error::OutOfRange);
        }

        self.pos = position;

        if position == file_size && !is_dir {
            return Ok(());
        }

        let cluster_index = (position / cluster_size) as usize;
        let chain_len = self.volume.entry(self.entry).cluster_chain.len();
        if cluster_index >= chain_len {
            error!("FATX: cluster chain (len {chain_len}) too short for position {position}");
            return Err(Error::BadChain("chain shorter than requested position"));
        }
        let cluster = self.volume.entry(self.entry).cluster_chain[cluster_index];

        let start_in_cluster = position % cluster_size;
        let drive_offset = self.volume.partition.cluster_to_offset(cluster) + start_in_cluster;
        self.max_read_consecutive = cluster_size - start_in_cluster;
        self.volume.device.set_position(SeekFrom::Start(drive_offset as i64))?;
        Ok(())
    }

    /// Rejects a read/write of `len` bytes at the current position if it
    /// would run past `file_size` (directories are exempt, matching
    /// `set_position`'s own rule, since their recorded size only reflects
    /// initial chain growth). Without this check a read issued right after
    /// seeking to exactly `file_size` would silently reuse whatever stale
    /// `max_read_consecutive`/device position was left over from the seek
    /// that landed there, instead of failing as the contract requires.
    fn check_in_bounds(&self, len: u64) -> Result<()> {
        let e = self.volume.entry(self.entry);
        if e.is_directory() {
            return Ok(());
        }
        if len > e.file_size as u64 - self.pos {
            error!(
                "FATX: access of {len} bytes at position {} exceeds file size {}",
                self.pos, e.file_size
            );
            return Err(Error::OutOfRange);
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_in_bounds(buf.len() as u64)?;
        let cluster_size = self.volume.partition.cluster_size;
        let mut written = 0usize;
        let mut remaining = buf.len() as u64;

        let first = remaining.min(self.max_read_consecutive);
        if first > 0 {
            self.volume.device.read_bytes(&mut buf[written..written + first as usize])?;
            written += first as usize;
            remaining -= first;
            self.set_position(self.pos + first)?;
        }

        while remaining >= cluster_size {
            let chunk = self.max_read_consecutive.min(remaining);
            self.volume.device.read_bytes(&mut buf[written..written + chunk as usize])?;
            written += chunk as usize;
            remaining -= chunk;
            self.set_position(self.pos + chunk)?;
        }

        if remaining > 0 {
            self.volume.device.read_bytes(&mut buf[written..written + remaining as usize])?;
            self.pos += remaining;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.check_in_bounds(buf.len() as u64)?;
        let cluster_size = self.volume.partition.cluster_size;
        let mut read = 0usize;
        let mut remaining = buf.len() as u64;

        let first = remaining.min(self.max_read_consecutive);
        if first > 0 {
            self.volume.device.write_bytes(&buf[read..read + first as usize])?;
            read += first as usize;
            remaining -= first;
            self.set_position(self.pos + first)?;
        }

        while remaining >= cluster_size {
            let chunk = self.max_read_consecutive.min(remaining);
            self.volume.device.write_bytes(&buf[read..read + chunk as usize])?;
            read += chunk as usize;
            remaining -= chunk;
            self.set_position(self.pos + chunk)?;
        }

        if remaining > 0 {
            self.volume.device.write_bytes(&buf[read..read + remaining as usize])?;
            self.pos += remaining;
        }
        Ok(())
    }

    /// Extends the entry by whole clusters, allocating from the head of
    /// `partition.free_clusters`, writing the new chain linkage, and (for
    /// regular files) growing `file_size` and rewriting the entry record.
    /// Returns the number of clusters allocated.
    pub fn allocate_memory(&mut self, byte_amount: u64) -> Result<u32> {
        let cluster_size = self.volume.partition.cluster_size;
        let (file_size, is_dir, chain_len) = {
            let e = self.volume.entry(self.entry);
            (e.file_size as u64, e.is_directory(), e.cluster_chain.len())
        };
        let file_was_empty = chain_len == 0;

        if byte_amount == 0 {
            return Ok(0);
        }

        let total_needed = div_ceil(file_size + byte_amount, cluster_size) as usize;
        let clusters_needed = total_needed.saturating_sub(chain_len);

        if clusters_needed > 0 {
            if self.volume.partition.free_clusters.len() < clusters_needed {
                error!(
                    "FATX: cannot find {clusters_needed} free clusters (have {})",
                    self.volume.partition.free_clusters.len()
                );
                return Err(Error::OutOfSpace);
            }
            let new_clusters: Vec<u32> = self
                .volume
                .partition
                .free_clusters
                .drain(0..clusters_needed)
                .collect();

            let entry = &mut self.volume.entries_mut()[self.entry.0];
            entry.cluster_chain.extend_from_slice(&new_clusters);
            if file_was_empty {
                entry.starting_cluster = entry.cluster_chain[0];
            }

            let chain_snapshot = entry.cluster_chain.clone();
            partition::write_cluster_chain(&mut self.volume.device, &self.volume.partition, &chain_snapshot)?;
        }

        if !is_dir {
            self.volume.entries_mut()[self.entry.0].file_size += byte_amount as u32;
            self.volume.write_entry_to_disk(self.entry, None)?;
        }

        Ok(clusters_needed as u32)
    }

    /// Streams the file out by coalescing physically contiguous clusters
    /// into read ranges capped at a computed buffer size, writing each range
    /// to `out` with one device read. `progress(step, total)` is invoked at
    /// no more than 100 evenly spaced steps and always once at completion.
    pub fn save_file<Out: BlockDevice>(
        &mut self,
        out: &mut Out,
        mut progress: impl FnMut(u32, u32),
    ) -> Result<()> {
        let (file_size, chain) = {
            let e = self.volume.entry(self.entry);
            (e.file_size as u64, e.cluster_chain.clone())
        };
        let cluster_size = self.volume.partition.cluster_size;

        if chain.is_empty() {
            progress(1, 1);
            return Ok(());
        }

        let buffer_size = (file_size / 16).clamp(0x10000, 0x100000);

        let mut ranges: Vec<(u64, u64)> = Vec::new();
        let mut i = 0usize;
        while i + 1 < chain.len() {
            let start = self.volume.partition.cluster_to_offset(chain[i]);
            let mut len = cluster_size;
            while i + 1 < chain.len() - 1
                && chain[i + 1] == chain[i] + 1
                && len + cluster_size <= buffer_size
            {
                len += cluster_size;
                i += 1;
            }
            ranges.push((start, len));
            i += 1;
        }

        let last_cluster = *chain.last().unwrap();
        let tail_len = file_size % cluster_size;
        let tail_len = if tail_len == 0 { cluster_size } else { tail_len };
        ranges.push((self.volume.partition.cluster_to_offset(last_cluster), tail_len));

        let total = ranges.len();
        let modulus = (total / 100).max(1);

        for (idx, (start, len)) in ranges.iter().enumerate() {
            self.volume.device.set_position(SeekFrom::Start(*start as i64))?;
            let mut buf = vec![0u8; *len as usize];
            self.volume.device.read_bytes(&mut buf)?;
            out.write_bytes(&buf)?;

            if idx % modulus == 0 {
                progress(idx as u32 + 1, total as u32);
            }
        }
        progress(total as u32, total as u32);
        out.flush()
    }
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{FatxEntry, ENTRY_END};
    use xcore_io::MemoryBlockDevice;

    fn round_up(value: u64, to: u64) -> u64 {
        (value + to - 1) / to * to
    }

    fn empty_file_volume(cluster_count: u32, sectors_per_cluster: u32) -> (FatxVolume<MemoryBlockDevice>, EntryId) {
        let cluster_entry_size = if cluster_count < 0xFFF0 { 2u64 } else { 4 };
        let chain_map_size = round_up(cluster_count as u64 * cluster_entry_size, 0x1000);
        let cluster_size = sectors_per_cluster as u64 * partition::SECTOR_SIZE;
        let total = 0x1000 + chain_map_size + cluster_count as u64 * cluster_size;

        let mut dev = MemoryBlockDevice::zeroed(total as usize);
        dev.set_position(SeekFrom::Start(0)).unwrap();
        dev.write_u32(0x58544146).unwrap();
        dev.write_u32(0).unwrap();
        dev.write_u32(sectors_per_cluster).unwrap();
        dev.write_u32(1).unwrap();
        dev.write_u32(cluster_count).unwrap();

        let mut volume = FatxVolume::mount(dev, 0, total).unwrap();
        let root_offset = volume.partition.cluster_to_offset(1);
        volume.device.set_position(SeekFrom::Start(root_offset as i64)).unwrap();
        volume
            .device
            .write_bytes(&vec![ENTRY_END; volume.partition.cluster_size as usize])
            .unwrap();
        volume.partition.free_clusters.retain(|&c| c != 1);
        volume.entries_mut()[0].cluster_chain = vec![1];

        let root = volume.root();
        let id = EntryId(volume.entries_mut().len());
        volume.entries_mut().push(FatxEntry {
            name: "a".to_string(),
            name_len: 1,
            file_attributes: 0,
            starting_cluster: 0,
            file_size: 0,
            created: 0,
            written: 0,
            accessed: 0,
            address: root_offset,
            cluster_chain: Vec::new(),
            children: Vec::new(),
            parent: Some(root),
            children_listed: false,
        });
        (volume, id)
    }

    #[test]
    fn allocate_memory_and_write_round_trips() {
        let (mut volume, id) = empty_file_volume(0x8000, 8); // cluster_size = 0x1000
        let mut io = FatxIo::new(&mut volume, id).unwrap();
        let allocated = io.allocate_memory(0x4000).unwrap();
        assert_eq!(allocated, 1);

        io.set_position(0).unwrap();
        io.write_bytes(&[0xAB; 0x4000]).unwrap();

        io.set_position(0).unwrap();
        let mut buf = [0u8; 0x4000];
        io.read_bytes(&mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn allocate_memory_fails_when_out_of_space() {
        let (mut volume, id) = empty_file_volume(1, 8);
        volume.partition.free_clusters.clear();
        let mut io = FatxIo::new(&mut volume, id).unwrap();
        assert!(matches!(io.allocate_memory(0x1000), Err(Error::OutOfSpace)));
    }

    #[test]
    fn set_position_past_end_of_file_fails() {
        let (mut volume, id) = empty_file_volume(0x8000, 8);
        let mut io = FatxIo::new(&mut volume, id).unwrap();
        io.allocate_memory(0x1000).unwrap();
        assert!(matches!(io.set_position(0x2000), Err(Error::OutOfRange)));
    }

    #[test]
    fn read_at_exactly_file_size_fails_instead_of_reusing_stale_state() {
        let (mut volume, id) = empty_file_volume(0x8000, 8);
        let mut io = FatxIo::new(&mut volume, id).unwrap();
        io.allocate_memory(0x1000).unwrap();

        io.set_position(0).unwrap();
        io.write_bytes(&[0xCD; 0x1000]).unwrap();

        io.set_position(0x1000).unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(io.read_bytes(&mut buf), Err(Error::OutOfRange)));
    }

    #[test]
    fn save_file_matches_read_bytes() {
        let (mut volume, id) = empty_file_volume(0x8000, 8);
        {
            let mut io = FatxIo::new(&mut volume, id).unwrap();
            io.allocate_memory(0x3000).unwrap();
            io.set_position(0).unwrap();
            let pattern: Vec<u8> = (0..0x3000u32).map(|i| (i % 251) as u8).collect();
            io.write_bytes(&pattern).unwrap();
        }

        let mut out = MemoryBlockDevice::zeroed(0);
        {
            let mut io = FatxIo::new(&mut volume, id).unwrap();
            io.save_file(&mut out, |_, _| {}).unwrap();
        }

        let mut io = FatxIo::new(&mut volume, id).unwrap();
        io.set_position(0).unwrap();
        let mut expected = vec![0u8; 0x3000];
        io.read_bytes(&mut expected).unwrap();
        assert_eq!(out.into_inner(), expected);
    }
}
