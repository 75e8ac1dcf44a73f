use std::fmt;
use std::io::Read;

use zeroize::Zeroizing;

use crate::agile;
use crate::algorithm::HashAlgorithm;
use crate::chunk::PackageKey;
use crate::cryptoapi;
use crate::error::CryptError;
use crate::info::{EncryptionInfo, EncryptionVariant};
use crate::standard;
use crate::stream::{from_io_error, read_full, DecryptReader, SIZE_PREFIX_LEN};
use crate::util::{checked_vec_len, ct_eq};

struct IntegrityKeys {
    hash: HashAlgorithm,
    hmac_key: Zeroizing<Vec<u8>>,
    hmac_value: Zeroizing<Vec<u8>>,
}

/// Decrypts packages protected by one `EncryptionInfo`.
///
/// Holds the package key once [`Decryptor::verify_password`] succeeds.
pub struct Decryptor {
    info: EncryptionInfo,
    key: Option<PackageKey>,
    integrity: Option<IntegrityKeys>,
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("mode", &self.info.mode())
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

impl Decryptor {
    pub fn new(info: EncryptionInfo) -> Self {
        Self {
            info,
            key: None,
            integrity: None,
        }
    }

    pub fn encryption_info(&self) -> &EncryptionInfo {
        &self.info
    }

    /// Check `password`. On success the package key is retained; a wrong password returns
    /// `Ok(false)` and clears any previously retained key.
    pub fn verify_password(&mut self, password: &str) -> Result<bool, CryptError> {
        self.key = None;
        self.integrity = None;

        match self.info.variant() {
            EncryptionVariant::BinaryRc4(verifier) => {
                if let Some(base_key) = verifier.verify_password(password) {
                    self.key = Some(PackageKey::BinaryRc4 { base_key });
                }
            }
            EncryptionVariant::CryptoApi { header, verifier } => {
                if let Some(password_hash) =
                    cryptoapi::verify_password(header, verifier, password)?
                {
                    self.key = Some(PackageKey::CryptoApi {
                        hash: header.hash_algorithm(),
                        password_hash,
                        key_bits: header.key_bits(),
                    });
                }
            }
            EncryptionVariant::Standard { header, verifier } => {
                let key = standard::derive_key(header, verifier.salt(), password)?;
                if standard::verify_key(header, verifier, &key)? {
                    self.key = Some(PackageKey::Standard { key });
                }
            }
            EncryptionVariant::Agile { header, verifier } => {
                if let Some(secrets) = agile::verify_password(header, verifier, password)? {
                    self.key = Some(PackageKey::Agile {
                        key: secrets.secret_key,
                        hash: header.hash_algorithm(),
                        chaining: header.chaining_mode(),
                        key_data_salt: header.key_data_salt().to_vec(),
                        block_size: header.block_size(),
                    });
                    self.integrity = Some(IntegrityKeys {
                        hash: header.hash_algorithm(),
                        hmac_key: secrets.hmac_key,
                        hmac_value: secrets.hmac_value,
                    });
                }
            }
        }

        Ok(self.key.is_some())
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    fn package_key(&self) -> Result<&PackageKey, CryptError> {
        self.key
            .as_ref()
            .ok_or(CryptError::InvalidState("password has not been verified"))
    }

    /// Open a lazily decrypting reader over an `EncryptedPackage` stream.
    pub fn data_stream<R: Read>(&self, inner: R) -> Result<DecryptReader<'_, R>, CryptError> {
        DecryptReader::new(inner, self.package_key()?)
    }

    /// Check the Agile data-integrity HMAC over a complete `EncryptedPackage` stream.
    ///
    /// Always `true` for the other modes, which carry no integrity information.
    pub fn verify_integrity<R: Read>(&self, mut encrypted_package: R) -> Result<bool, CryptError> {
        self.package_key()?;
        let Some(integrity) = &self.integrity else {
            return Ok(true);
        };

        let mut mac = integrity.hash.hmac(&integrity.hmac_key)?;
        let mut buf = [0u8; 4096];
        loop {
            let n = read_full(&mut encrypted_package, &mut buf)?;
            if n == 0 {
                break;
            }
            mac.update(&buf[..n]);
        }
        let computed = mac.finalize();
        let ok = ct_eq(&computed, &integrity.hmac_value);
        if !ok {
            log::warn!("Agile data integrity HMAC mismatch; EncryptedPackage was modified");
        }
        Ok(ok)
    }

    /// Decrypt a complete `EncryptedPackage` stream held in memory.
    ///
    /// Fails with [`CryptError::IntegrityCheckFailed`] when the Agile HMAC does not match.
    pub fn decrypt_package(&self, encrypted_package: &[u8]) -> Result<Vec<u8>, CryptError> {
        let key = self.package_key()?;
        if encrypted_package.len() < SIZE_PREFIX_LEN {
            return Err(CryptError::format(format!(
                "EncryptedPackage stream is {} bytes, too short for the size prefix",
                encrypted_package.len()
            )));
        }
        let (prefix, ciphertext) = encrypted_package.split_at(SIZE_PREFIX_LEN);
        let mut size_bytes = [0u8; SIZE_PREFIX_LEN];
        size_bytes.copy_from_slice(prefix);
        let total_size = u64::from_le_bytes(size_bytes);
        let len = checked_vec_len(total_size)?;
        if len > ciphertext.len() {
            return Err(CryptError::format(format!(
                "EncryptedPackage declares {total_size} bytes but carries only {} bytes of ciphertext",
                ciphertext.len()
            )));
        }
        if !self.verify_integrity(encrypted_package)? {
            return Err(CryptError::IntegrityCheckFailed);
        }

        let mut out = Vec::with_capacity(len);
        DecryptReader::new(encrypted_package, key)?
            .read_to_end(&mut out)
            .map_err(from_io_error)?;
        Ok(out)
    }
}
