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

//! Partition header parsing and the chain-map primitives built on it.

use log::{debug, error};
use xcore_err::{Error, Result};
use xcore_io::{BlockDevice, SeekFrom};

pub const SECTOR_SIZE: u64 = 0x200;
pub const CHAIN_MAP_OFFSET: u64 = 0x1000;
pub const CHAIN_MAP_CHUNK: u64 = 0x10000;

const FATX_MAGIC: u32 = 0x58544146; // "XTAF"

pub const FAT_CLUSTER_AVAILABLE: u32 = 0;
const FAT_CLUSTER_LAST_32: u32 = 0xFFFFFFFF;
const FAT_CLUSTER_LAST_16: u32 = 0xFFFF;
const FAT16_END_MIN: u32 = 0xFFF8;
const FAT32_END_MIN: u32 = 0xFFFFFFF8;

/// A mounted FATX partition: header fields plus the free-cluster index built
/// by the mount-time chain-map scan.
pub struct Partition {
    pub address: u64,
    pub size: u64,
    pub cluster_size: u64,
    pub cluster_count: u32,
    pub cluster_starting_address: u64,
    pub cluster_entry_size: u8,
    pub root_dir_first_cluster: u32,
    pub free_clusters: Vec<u32>,
}

impl Partition {
    pub fn is_fat16(&self) -> bool {
        self.cluster_entry_size == 2
    }

    pub fn last_sentinel(&self) -> u32 {
        if self.is_fat16() {
            FAT_CLUSTER_LAST_16
        } else {
            FAT_CLUSTER_LAST_32
        }
    }

    pub fn is_end_of_chain(&self, cell: u32) -> bool {
        if self.is_fat16() {
            cell >= FAT16_END_MIN
        } else {
            cell >= FAT32_END_MIN
        }
    }

    /// Byte offset of cluster `cluster`'s cell in the chain map.
    pub fn chain_map_cell_address(&self, cluster: u32) -> u64 {
        self.address + CHAIN_MAP_OFFSET + cluster as u64 * self.cluster_entry_size as u64
    }

    /// Byte offset of the first byte of `cluster`'s data (cluster indices
    /// start at 1).
    pub fn cluster_to_offset(&self, cluster: u32) -> u64 {
        self.cluster_starting_address + (cluster as u64 - 1) * self.cluster_size
    }
}

fn round_up(value: u64, to: u64) -> u64 {
    (value + to - 1) / to * to
}

/// Parses the partition header at `address` and scans the chain map to build
/// the free-cluster index.
pub fn mount<BD: BlockDevice>(device: &mut BD, address: u64, size: u64) -> Result<Partition> {
    device.set_position(SeekFrom::Start(address as i64))?;
    let magic = device.read_u32()?;
    if magic != FATX_MAGIC {
        error!("partition at {address:#x}: bad FATX magic {magic:#010x}");
        return Err(Error::Corrupt("bad FATX magic"));
    }
    let _serial = device.read_u32()?;
    let sectors_per_cluster = device.read_u32()?;
    let root_dir_first_cluster = device.read_u32()?;
    let cluster_count = device.read_u32()?;

    if sectors_per_cluster == 0 {
        error!("partition at {address:#x}: sectors_per_cluster is zero");
        return Err(Error::Corrupt("sectors_per_cluster is zero"));
    }

    let cluster_size = sectors_per_cluster as u64 * SECTOR_SIZE;
    let cluster_entry_size: u8 = if cluster_count < 0xFFF0 { 2 } else { 4 };
    let chain_map_size = round_up(cluster_count as u64 * cluster_entry_size as u64, 0x1000);
    let cluster_starting_address = address + CHAIN_MAP_OFFSET + chain_map_size;

    let mut partition = Partition {
        address,
        size,
        cluster_size,
        cluster_count,
        cluster_starting_address,
        cluster_entry_size,
        root_dir_first_cluster,
        free_clusters: Vec::new(),
    };

    scan_free_clusters(device, &mut partition)?;
    debug!(
        "mounted FATX partition at {address:#x}: {cluster_count} clusters of {cluster_size:#x} bytes, {} free",
        partition.free_clusters.len()
    );
    Ok(partition)
}

fn scan_free_clusters<BD: BlockDevice>(device: &mut BD, partition: &mut Partition) -> Result<()> {
    device.set_position(SeekFrom::Start((partition.address + CHAIN_MAP_OFFSET) as i64))?;
    for cluster in 1..=partition.cluster_count {
        let cell = if partition.is_fat16() {
            device.read_u16()? as u32
        } else {
            device.read_u32()?
        };
        if cell == FAT_CLUSTER_AVAILABLE {
            partition.free_clusters.push(cluster);
        }
    }
    Ok(())
}

/// Reads the single chain-map cell for `cluster`.
pub fn read_cell<BD: BlockDevice>(device: &mut BD, partition: &Partition, cluster: u32) -> Result<u32> {
    device.set_position(SeekFrom::Start(partition.chain_map_cell_address(cluster) as i64))?;
    if partition.is_fat16() {
        Ok(device.read_u16()? as u32)
    } else {
        device.read_u32()
    }
}

/// Writes `edits` (cluster -> new cell value) to the chain map, batching I/O
/// per enclosing 64 KiB chunk so a fragmented chain costs one read-modify-write
/// per chunk rather than one per cell.
pub fn write_cells_batched<BD: BlockDevice>(
    device: &mut BD,
    partition: &Partition,
    mut edits: Vec<(u32, u32)>,
) -> Result<()> {
    if edits.is_empty() {
        return Ok(());
    }
    edits.sort_by_key(|(cluster, _)| *cluster);

    let mut i = 0;
    while i < edits.len() {
        let (cluster, _) = edits[i];
        let cell_addr = partition.chain_map_cell_address(cluster);
        let chunk_start = (cell_addr / CHAIN_MAP_CHUNK) * CHAIN_MAP_CHUNK;

        device.set_position(SeekFrom::Start(chunk_start as i64))?;
        let mut buf = vec![0u8; CHAIN_MAP_CHUNK as usize];
        device.read_bytes(&mut buf)?;

        while i < edits.len() {
            let (cluster, value) = edits[i];
            let addr = partition.chain_map_cell_address(cluster);
            if addr < chunk_start || addr - chunk_start >= CHAIN_MAP_CHUNK {
                break;
            }
            let off = (addr - chunk_start) as usize;
            if partition.is_fat16() {
                buf[off..off + 2].copy_from_slice(&(value as u16).to_be_bytes());
            } else {
                buf[off..off + 4].copy_from_slice(&value.to_be_bytes());
            }
            i += 1;
        }

        device.set_position(SeekFrom::Start(chunk_start as i64))?;
        device.write_bytes(&buf)?;
    }
    device.flush()
}

/// Writes a cluster chain's linkage (each cell points at the next cluster;
/// the last cell stores the end-of-chain sentinel).
pub fn write_cluster_chain<BD: BlockDevice>(
    device: &mut BD,
    partition: &Partition,
    chain: &[u32],
) -> Result<()> {
    if chain.is_empty() {
        return Ok(());
    }
    let mut edits = Vec::with_capacity(chain.len());
    for i in 0..chain.len() - 1 {
        edits.push((chain[i], chain[i + 1]));
    }
    edits.push((*chain.last().unwrap(), partition.last_sentinel()));
    write_cells_batched(device, partition, edits)
}

/// Zeros every cell of `chain`, returning it to `FAT_CLUSTER_AVAILABLE`.
pub fn free_cluster_chain<BD: BlockDevice>(
    device: &mut BD,
    partition: &Partition,
    chain: &[u32],
) -> Result<()> {
    let edits = chain.iter().map(|&c| (c, FAT_CLUSTER_AVAILABLE)).collect();
    write_cells_batched(device, partition, edits)
}

/// Walks the chain map from `starting_cluster` until the end-of-chain
/// sentinel, detecting cycles and out-of-range cluster indices.
pub fn read_cluster_chain<BD: BlockDevice>(
    device: &mut BD,
    partition: &Partition,
    starting_cluster: u32,
) -> Result<Vec<u32>> {
    if starting_cluster == 0 {
        return Ok(Vec::new());
    }
    let mut chain = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut current = starting_cluster;
    loop {
        if current == 0 || partition.is_end_of_chain(current) {
            break;
        }
        if current > partition.cluster_count {
            error!(
                "cluster chain references invalid cluster {current} (count {})",
                partition.cluster_count
            );
            return Err(Error::BadChain("cluster index out of range"));
        }
        if !seen.insert(current) {
            error!("cluster chain contains a cycle at cluster {current}");
            return Err(Error::BadChain("cycle detected"));
        }
        chain.push(current);
        current = read_cell(device, partition, current)?;
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcore_io::MemoryBlockDevice;

    fn build_image(cluster_count: u32, sectors_per_cluster: u32, root_cluster: u32) -> MemoryBlockDevice {
        let cluster_entry_size: u64 = if cluster_count < 0xFFF0 { 2 } else { 4 };
        let chain_map_size = round_up(cluster_count as u64 * cluster_entry_size, 0x1000);
        let data_size = cluster_count as u64 * sectors_per_cluster as u64 * SECTOR_SIZE;
        let total = CHAIN_MAP_OFFSET + chain_map_size + data_size;

        let mut dev = MemoryBlockDevice::zeroed(total as usize);
        dev.set_position(SeekFrom::Start(0)).unwrap();
        dev.write_u32(FATX_MAGIC).unwrap();
        dev.write_u32(0xCAFEBABE).unwrap();
        dev.write_u32(sectors_per_cluster).unwrap();
        dev.write_u32(root_cluster).unwrap();
        dev.write_u32(cluster_count).unwrap();
        dev
    }

    #[test]
    fn mount_rejects_bad_magic() {
        let mut dev = MemoryBlockDevice::zeroed(0x2000);
        let result = mount(&mut dev, 0, 0x2000);
        assert!(matches!(result, Err(Error::Corrupt(_))));
    }

    #[test]
    fn mount_builds_free_cluster_list() {
        let mut dev = build_image(16, 1, 1);
        let partition = mount(&mut dev, 0, dev.len() as u64).unwrap();
        assert_eq!(partition.cluster_entry_size, 2);
        assert_eq!(partition.free_clusters, (1..=16).collect::<Vec<_>>());
    }

    #[test]
    fn write_and_read_cluster_chain_round_trips() {
        let mut dev = build_image(16, 1, 1);
        let partition = mount(&mut dev, 0, dev.len() as u64).unwrap();

        write_cluster_chain(&mut dev, &partition, &[3, 5, 7]).unwrap();
        let chain = read_cluster_chain(&mut dev, &partition, 3).unwrap();
        assert_eq!(chain, vec![3, 5, 7]);

        let last_cell = read_cell(&mut dev, &partition, 7).unwrap();
        assert_eq!(last_cell, partition.last_sentinel());
    }

    #[test]
    fn cycle_in_chain_map_is_detected() {
        let mut dev = build_image(16, 1, 1);
        let partition = mount(&mut dev, 0, dev.len() as u64).unwrap();

        write_cells_batched(&mut dev, &partition, vec![(3, 5), (5, 3)]).unwrap();
        let result = read_cluster_chain(&mut dev, &partition, 3);
        assert!(matches!(result, Err(Error::BadChain(_))));
    }

    #[test]
    fn free_cluster_chain_zeros_every_cell() {
        let mut dev = build_image(16, 1, 1);
        let partition = mount(&mut dev, 0, dev.len() as u64).unwrap();

        write_cluster_chain(&mut dev, &partition, &[3, 5, 7]).unwrap();
        free_cluster_chain(&mut dev, &partition, &[3, 5, 7]).unwrap();

        for cluster in [3, 5, 7] {
            assert_eq!(read_cell(&mut dev, &partition, cluster).unwrap(), FAT_CLUSTER_AVAILABLE);
        }
    }
}
