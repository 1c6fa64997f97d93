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

//! The SHA-1 primitive the rehash pipeline is built against. The core never
//! picks a SHA-1 implementation itself; it calls whatever `Sha1Digest` its
//! caller supplies (see `xcore_hash_std` for the default, `sha1`-crate-backed
//! implementation).

/// A SHA-1 primitive over a byte range, returning the raw 20-byte digest.
pub trait Sha1Digest {
    fn sha1(&self, data: &[u8]) -> [u8; 20];
}
