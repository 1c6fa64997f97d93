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

//! Resigns an XContent header's console signature after `rehash` has
//! updated `header_hash`.

use std::path::Path;

use log::error;
use xcore_err::{Error, Result};
use xcore_io::{BlockDevice, SeekFrom};
use xcore_sign::{HeaderSigner, HEADER_SIGN_LENGTH};

use crate::header::{Magic, XContentHeader, HEADER_HASH_OFFSET, SIGNATURE_OFFSET};

/// Signs the `HEADER_SIGN_LENGTH` bytes starting at `header_hash` with
/// `signer`, then writes the resulting signature back at `SIGNATURE_OFFSET`.
///
/// Only `CON`-magic content carries a resignable console signature; `LIVE`
/// and `PIRS` content is signed by a remote service the core has no access
/// to, so this fails with `NotResignable` for anything but `Magic::Con`.
pub fn resign<BD: BlockDevice, S: HeaderSigner>(
    root_device: &mut BD,
    header: &XContentHeader,
    signer: &S,
    key_vault_path: &Path,
) -> Result<()> {
    if header.magic != Magic::Con {
        error!("resign: {:?} content has no resignable console signature", header.magic);
        return Err(Error::NotResignable);
    }

    root_device.set_position(SeekFrom::Start(HEADER_HASH_OFFSET as i64))?;
    let mut signed_region = [0u8; HEADER_SIGN_LENGTH];
    root_device.read_bytes(&mut signed_region)?;

    let signature = signer.sign(&signed_region, key_vault_path)?;

    root_device.set_position(SeekFrom::Start(SIGNATURE_OFFSET as i64))?;
    root_device.write_bytes(&signature)?;
    root_device.flush()
}
