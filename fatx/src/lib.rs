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

//! FATX: the Xbox 360 filesystem variant used on hard drives and memory
//! units. This crate mounts a partition, maintains its free-cluster index
//! and directory graph, and exposes file-like views over individual
//! entries. It touches a storage medium only through `xcore_io::BlockDevice`
//! and never assumes the caller is on a particular OS.

mod entry;
mod io;
mod multi;
mod partition;

pub use entry::{EntryId, FatxEntry, FatxVolume};
pub use io::FatxIo;
pub use multi::FatxIndexableMultiFileIo;
pub use partition::{Partition, FAT_CLUSTER_AVAILABLE};
