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

//! The RSA signing primitive `xcore_svod::resign` is built against. The
//! header-signing *flow* (certificate chains, console identity, which key
//! vault applies to which title) is explicitly out of scope for this crate;
//! the core only ever hands a finished 0x118-byte buffer to whatever
//! `HeaderSigner` its caller supplies and writes back the signature it gets.

use std::path::Path;

use xcore_err::Result;

/// Header size, in bytes, that `resign` signs: the region of an XContent
/// header covered by the console signature.
pub const HEADER_SIGN_LENGTH: usize = 0x118;

/// An RSA signing primitive applied to an already-assembled header buffer,
/// keyed by a path to a key-vault blob.
pub trait HeaderSigner {
    fn sign(&self, header: &[u8; HEADER_SIGN_LENGTH], key_vault_path: &Path) -> Result<Vec<u8>>;
}
