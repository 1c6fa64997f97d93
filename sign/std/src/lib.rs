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

//! Default `HeaderSigner`: reads a PKCS#1-DER RSA private key from the
//! key-vault path and signs the SHA-1 digest of the header buffer with
//! PKCS#1 v1.5 padding. The real Xbox 360 key-vault blob format wraps its
//! RSA key in console-specific obfuscation that is part of the
//! out-of-scope signing flow; this collaborator assumes the blob has
//! already been unwrapped to a bare PKCS#1 key, which is as far as the core
//! needs to see.

use std::fs;
use std::path::Path;

use log::error;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};
use xcore_err::{Error, Result};
use xcore_sign::{HeaderSigner, HEADER_SIGN_LENGTH};

#[derive(Debug, Default, Clone, Copy)]
pub struct RsaHeaderSigner;

impl HeaderSigner for RsaHeaderSigner {
    fn sign(&self, header: &[u8; HEADER_SIGN_LENGTH], key_vault_path: &Path) -> Result<Vec<u8>> {
        let key_bytes = fs::read(key_vault_path).map_err(|e| {
            error!("cannot read key vault blob {}: {e}", key_vault_path.display());
            Error::IoFailure(e)
        })?;

        let private_key = RsaPrivateKey::from_pkcs1_der(&key_bytes).map_err(|e| {
            error!("key vault blob {} is not a PKCS#1 RSA key: {e}", key_vault_path.display());
            Error::IoFailure(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let mut hasher = Sha1::new();
        hasher.update(header);
        let digest = hasher.finalize();

        private_key
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .map_err(|e| {
                error!("RSA signing failed: {e}");
                Error::IoFailure(std::io::Error::new(std::io::ErrorKind::Other, e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn signs_with_a_generated_key() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let der = key.to_pkcs1_der().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.bin");
        fs::write(&path, der.as_bytes()).unwrap();

        let header = [0x42u8; HEADER_SIGN_LENGTH];
        let signature = RsaHeaderSigner.sign(&header, &path).unwrap();
        assert_eq!(signature.len(), key.size());
    }

    #[test]
    fn missing_key_vault_fails() {
        let header = [0u8; HEADER_SIGN_LENGTH];
        assert!(matches!(
            RsaHeaderSigner.sign(&header, Path::new("/nonexistent/kv.bin")),
            Err(Error::IoFailure(_))
        ));
    }
}
