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

//! `FatxIndexableMultiFileIo`: presents a directory of FATX-hosted files as
//! one `IndexableMultiFileIo` address space, the FATX-backed twin of
//! `xcore_io_std::DirectoryMultiFileIo` that SVOD can sit on interchangeably.

use xcore_err::{Error, Result};
use xcore_io::{BlockDevice, IndexableMultiFileIo};

use crate::entry::{EntryId, FatxVolume};
use crate::io::FatxIo;

pub struct FatxIndexableMultiFileIo<BD: BlockDevice> {
    volume: FatxVolume<BD>,
    files: Vec<EntryId>,
    current_index: usize,
    current_offset: u64,
}

impl<BD: BlockDevice> FatxIndexableMultiFileIo<BD> {
    /// Enumerates the non-directory, non-deleted children of `directory_path`
    /// (resolved from the volume's root), sorted by name, as the multi-file
    /// sequence.
    pub fn open(mut volume: FatxVolume<BD>, directory_path: &str) -> Result<Self> {
        let dir = volume.resolve(directory_path)?;
        volume.list_directory(dir)?;

        let mut files: Vec<EntryId> = volume
            .entry(dir)
            .children()
            .iter()
            .copied()
            .filter(|&id| {
                let e = volume.entry(id);
                !e.is_directory() && !e.is_deleted()
            })
            .collect();
        files.sort_by(|&a, &b| volume.entry(a).name.cmp(&volume.entry(b).name));

        if files.is_empty() {
            return Err(Error::EmptyVolume);
        }

        Ok(Self {
            volume,
            files,
            current_index: 0,
            current_offset: 0,
        })
    }

    pub fn into_volume(self) -> FatxVolume<BD> {
        self.volume
    }
}

impl<BD: BlockDevice> IndexableMultiFileIo for FatxIndexableMultiFileIo<BD> {
    fn set_position(&mut self, offset: u64, file_index: Option<usize>) -> Result<()> {
        if let Some(idx) = file_index {
            if idx >= self.files.len() {
                return Err(Error::OutOfRange);
            }
            self.current_index = idx;
        }
        let len = self.current_file_length()?;
        if offset > len {
            return Err(Error::OutOfRange);
        }
        self.current_offset = offset;
        Ok(())
    }

    fn position(&self) -> (u64, usize) {
        (self.current_offset, self.current_index)
    }

    fn read_bytes(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let remaining = self.current_file_length()? - self.current_offset;
            let to_read = remaining.min(buf.len() as u64) as usize;

            if to_read == 0 {
                if self.current_index + 1 >= self.files.len() {
                    return Err(Error::OutOfRange);
                }
                self.set_position(0, Some(self.current_index + 1))?;
                continue;
            }

            let entry = self.files[self.current_index];
            let mut io = FatxIo::new(&mut self.volume, entry)?;
            io.set_position(self.current_offset)?;
            let (head, tail) = buf.split_at_mut(to_read);
            io.read_bytes(head)?;
            self.current_offset += to_read as u64;
            buf = tail;
        }
        Ok(())
    }

    fn write_bytes(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let remaining = self.current_file_length()? - self.current_offset;
            let to_write = remaining.min(buf.len() as u64) as usize;

            if to_write == 0 {
                if self.current_index + 1 >= self.files.len() {
                    return Err(Error::OutOfRange);
                }
                self.set_position(0, Some(self.current_index + 1))?;
                continue;
            }

            let entry = self.files[self.current_index];
            let mut io = FatxIo::new(&mut self.volume, entry)?;
            io.set_position(self.current_offset)?;
            let (head, tail) = buf.split_at(to_write);
            io.write_bytes(head)?;
            self.current_offset += to_write as u64;
            buf = tail;
        }
        Ok(())
    }

    fn current_file_length(&mut self) -> Result<u64> {
        Ok(self.volume.entry(self.files[self.current_index]).file_size as u64)
    }

    fn file_count(&self) -> usize {
        self.files.len()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.volume.device.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{FatxEntry, ENTRY_END};
    use crate::io::FatxIo;
    use crate::partition;
    use xcore_io::{MemoryBlockDevice, SeekFrom};

    fn round_up(value: u64, to: u64) -> u64 {
        (value + to - 1) / to * to
    }

    fn volume_with_two_files() -> FatxVolume<MemoryBlockDevice> {
        let cluster_count = 0x100u32;
        let sectors_per_cluster = 8u32;
        let cluster_entry_size = 2u64;
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
        for (i, name) in ["Data0000", "Data0001"].iter().enumerate() {
            let id = EntryId(volume.entries_mut().len());
            volume.entries_mut().push(FatxEntry {
                name: name.to_string(),
                name_len: name.len() as u8,
                file_attributes: 0,
                starting_cluster: 0,
                file_size: 0,
                created: 0,
                written: 0,
                accessed: 0,
                address: root_offset + i as u64 * crate::entry::ENTRY_RECORD_SIZE,
                cluster_chain: Vec::new(),
                children: Vec::new(),
                parent: Some(root),
                children_listed: false,
            });
            volume.write_entry_to_disk(id, None).unwrap();

            let mut io = FatxIo::new(&mut volume, id).unwrap();
            io.allocate_memory(cluster_size).unwrap();
            io.set_position(0).unwrap();
            let fill = if *name == "Data0000" { 0x11u8 } else { 0x22u8 };
            io.write_bytes(&vec![fill; cluster_size as usize]).unwrap();
        }

        volume.entries_mut()[root.0].children_listed = false;
        volume
    }

    #[test]
    fn reads_span_across_files() {
        let volume = volume_with_two_files();
        let mut multi = FatxIndexableMultiFileIo::open(volume, "/").unwrap();
        assert_eq!(multi.file_count(), 2);

        let file_len = multi.current_file_length().unwrap();
        multi.set_position(file_len - 4, Some(0)).unwrap();

        let mut buf = [0u8; 8];
        multi.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf[..4], &[0x11; 4]);
        assert_eq!(&buf[4..], &[0x22; 4]);
        assert_eq!(multi.position(), (4, 1));
    }

    #[test]
    fn reading_past_last_file_fails() {
        let volume = volume_with_two_files();
        let mut multi = FatxIndexableMultiFileIo::open(volume, "/").unwrap();
        let total_len = multi.current_file_length().unwrap() * 2;
        multi.set_position(0, Some(0)).unwrap();

        let mut buf = vec![0u8; (total_len + 1) as usize];
        assert!(matches!(multi.read_bytes(&mut buf), Err(Error::OutOfRange)));
    }
}
