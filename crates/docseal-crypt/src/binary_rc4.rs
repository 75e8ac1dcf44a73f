//! Binary RC4 encryption (`EncryptionInfo` version 1.1).
//!
//! The header carries no algorithm fields: the cipher is always RC4 with a 40-bit key derived
//! through MD5. The record after the version is just the 16-byte salt, the encrypted verifier
//! and the encrypted verifier hash.

use md5::{Digest as _, Md5};
use zeroize::Zeroizing;

use crate::crypto::block_hash;
use crate::error::CryptError;
use crate::rc4::Rc4;
use crate::util::{ct_eq, password_to_utf16le, Reader, MAX_LEGACY_PASSWORD_LEN};
use crate::HashAlgorithm;

pub(crate) const BASE_KEY_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryRc4Verifier {
    salt: [u8; 16],
    encrypted_verifier: [u8; 16],
    encrypted_verifier_hash: [u8; 16],
}

impl BinaryRc4Verifier {
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Self, CryptError> {
        Ok(Self {
            salt: r.take_array("RC4 salt")?,
            encrypted_verifier: r.take_array("RC4 encryptedVerifier")?,
            encrypted_verifier_hash: r.take_array("RC4 encryptedVerifierHash")?,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.encrypted_verifier);
        out.extend_from_slice(&self.encrypted_verifier_hash);
    }

    /// Encrypt `verifier` and its MD5 hash with the block-0 key for `password`.
    pub(crate) fn create(
        password: &str,
        salt: [u8; 16],
        verifier: [u8; 16],
    ) -> (Self, Zeroizing<Vec<u8>>) {
        let base_key = derive_base_key(password, &salt);
        let mut rc4 = Rc4::new(&block_key(&base_key, 0));

        let mut encrypted_verifier = verifier;
        rc4.apply_keystream(&mut encrypted_verifier);
        let mut encrypted_verifier_hash = [0u8; 16];
        encrypted_verifier_hash.copy_from_slice(&Md5::digest(verifier));
        rc4.apply_keystream(&mut encrypted_verifier_hash);

        (
            Self {
                salt,
                encrypted_verifier,
                encrypted_verifier_hash,
            },
            base_key,
        )
    }

    pub fn salt(&self) -> &[u8; 16] {
        &self.salt
    }

    pub fn encrypted_verifier(&self) -> &[u8; 16] {
        &self.encrypted_verifier
    }

    pub fn encrypted_verifier_hash(&self) -> &[u8; 16] {
        &self.encrypted_verifier_hash
    }

    /// Check `password`, returning the 5-byte base key when it matches.
    pub(crate) fn verify_password(&self, password: &str) -> Option<Zeroizing<Vec<u8>>> {
        let base_key = derive_base_key(password, &self.salt);
        let mut rc4 = Rc4::new(&block_key(&base_key, 0));

        // The verifier and its hash are one continuous keystream.
        let mut verifier = Zeroizing::new(self.encrypted_verifier);
        rc4.apply_keystream(&mut verifier[..]);
        let mut verifier_hash = Zeroizing::new(self.encrypted_verifier_hash);
        rc4.apply_keystream(&mut verifier_hash[..]);

        let expected = Md5::digest(&verifier[..]);
        ct_eq(&expected, &verifier_hash[..]).then_some(base_key)
    }
}

/// Derive the 40-bit base key.
///
/// `H0 = MD5(password)`, then one MD5 context absorbs `H0[..5] || salt` sixteen times; the first
/// five bytes of that digest are the key.
pub(crate) fn derive_base_key(password: &str, salt: &[u8]) -> Zeroizing<Vec<u8>> {
    let password = password_to_utf16le(password, Some(MAX_LEGACY_PASSWORD_LEN));
    let h0 = Zeroizing::new(Md5::digest(&password[..]).to_vec());

    let mut md5 = Md5::new();
    for _ in 0..16 {
        md5.update(&h0[..BASE_KEY_LEN]);
        md5.update(salt);
    }
    let mut key = Zeroizing::new(md5.finalize().to_vec());
    key.truncate(BASE_KEY_LEN);
    key
}

/// Per-block RC4 key: `MD5(base_key || LE32(block))`, all 16 bytes.
pub(crate) fn block_key(base_key: &[u8], block: u32) -> Zeroizing<Vec<u8>> {
    block_hash(base_key, block, HashAlgorithm::Md5)
}
