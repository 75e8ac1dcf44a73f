//! Password encryption for Office document packages (MS-OFFCRYPTO).
//!
//! An encrypted document is an OLE/CFB container holding two streams:
//! - `EncryptionInfo`: version, flags and the scheme's header/verifier
//! - `EncryptedPackage`: an 8-byte plaintext size followed by chunk-encrypted data
//!
//! Supported schemes:
//! - Binary RC4 (version 1.1, 40-bit MD5 keys)
//! - CryptoAPI RC4 (versions 2.2/3.2/4.2 with an RC4 cipher)
//! - ECMA-376 Standard encryption (versions 2.2/3.2/4.2 with AES-ECB)
//! - ECMA-376 Agile encryption (version 4.4, XML descriptor, HMAC data integrity)
//!
//! Decryption starts from [`EncryptionInfo::parse`] and a [`Decryptor`]; encryption starts from
//! an [`EncryptionInfoBuilder`]. [`decrypt_ole`] and [`encrypt_to_ole`] wrap both around a whole
//! OLE container.

mod agile;
mod algorithm;
mod binary_rc4;
mod builder;
mod chunk;
mod crypto;
mod cryptoapi;
mod decryptor;
mod encryptor;
mod error;
mod info;
mod rc4;
mod standard;
mod stream;
mod util;


use std::io::{Cursor, Read, Seek, Write};

pub use crate::agile::{AgileHeader, AgileVerifier, MAX_SPIN_COUNT};
pub use crate::algorithm::{ChainingMode, CipherAlgorithm, CipherProvider, HashAlgorithm};
pub use crate::binary_rc4::BinaryRc4Verifier;
pub use crate::builder::{EncryptionInfoBuilder, AGILE_DEFAULT_SPIN_COUNT};
pub use crate::cryptoapi::CRYPTOAPI_SPIN_COUNT;
pub use crate::decryptor::Decryptor;
pub use crate::encryptor::Encryptor;
pub use crate::error::CryptError;
pub use crate::info::{EncryptionInfo, EncryptionMode, EncryptionVariant};
pub use crate::standard::{
    StandardHeader, StandardVerifier, FLAG_AES, FLAG_AGILE, FLAG_CRYPTOAPI, FLAG_DOC_PROPS,
    FLAG_EXTERNAL, STANDARD_SPIN_COUNT,
};
pub use crate::stream::{DecryptReader, EncryptWriter};

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

/// Parameters for [`encrypt_to_ole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOptions {
    pub mode: EncryptionMode,
    pub key_bits: u32,
    pub hash_algorithm: HashAlgorithm,
    pub spin_count: u32,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self::for_mode(EncryptionMode::Agile)
    }
}

impl EncryptOptions {
    /// The defaults of `mode`.
    pub fn for_mode(mode: EncryptionMode) -> Self {
        let (key_bits, hash_algorithm, spin_count) = match mode {
            EncryptionMode::BinaryRc4 => (40, HashAlgorithm::Md5, 0),
            EncryptionMode::CryptoApi => (128, HashAlgorithm::Sha1, CRYPTOAPI_SPIN_COUNT),
            EncryptionMode::Standard => (128, HashAlgorithm::Sha1, STANDARD_SPIN_COUNT),
            EncryptionMode::Agile => (256, HashAlgorithm::Sha512, AGILE_DEFAULT_SPIN_COUNT),
        };
        Self {
            mode,
            key_bits,
            hash_algorithm,
            spin_count,
        }
    }

    pub fn builder(&self) -> EncryptionInfoBuilder {
        EncryptionInfoBuilder::new(self.mode)
            .key_bits(self.key_bits)
            .hash_algorithm(self.hash_algorithm)
            .spin_count(self.spin_count)
    }
}

/// Returns true if `bytes` look like an OLE/CFB container holding a password-encrypted package
/// (streams `EncryptionInfo` and `EncryptedPackage`).
pub fn is_encrypted_ole(bytes: &[u8]) -> bool {
    if bytes.len() < OLE_MAGIC.len() || bytes[..OLE_MAGIC.len()] != OLE_MAGIC {
        return false;
    }

    let Ok(mut ole) = cfb::CompoundFile::open(Cursor::new(bytes)) else {
        return false;
    };
    stream_exists(&mut ole, ENCRYPTION_INFO_STREAM)
        && stream_exists(&mut ole, ENCRYPTED_PACKAGE_STREAM)
}

/// Decrypt the package inside an encrypted OLE/CFB container.
///
/// A wrong password is reported as [`CryptError::InvalidPassword`].
pub fn decrypt_ole(bytes: &[u8], password: &str) -> Result<Vec<u8>, CryptError> {
    let mut ole = cfb::CompoundFile::open(Cursor::new(bytes))?;

    let mut encryption_info = Vec::new();
    ole.open_stream(ENCRYPTION_INFO_STREAM)?
        .read_to_end(&mut encryption_info)?;
    let mut encrypted_package = Vec::new();
    ole.open_stream(ENCRYPTED_PACKAGE_STREAM)?
        .read_to_end(&mut encrypted_package)?;

    let info = EncryptionInfo::parse(&encryption_info)?;
    log::debug!(
        "decrypting {:?} package ({} bytes of EncryptedPackage)",
        info.mode(),
        encrypted_package.len()
    );
    let mut decryptor = info.decryptor();
    if !decryptor.verify_password(password)? {
        return Err(CryptError::InvalidPassword);
    }
    decryptor.decrypt_package(&encrypted_package)
}

/// Encrypt `plaintext` into a new OLE/CFB container with `EncryptionInfo` and `EncryptedPackage`
/// streams.
pub fn encrypt_to_ole(
    plaintext: &[u8],
    password: &str,
    opts: &EncryptOptions,
) -> Result<Vec<u8>, CryptError> {
    let mut encryptor = opts.builder().build()?;
    encryptor.confirm_password(password)?;
    let encrypted_package = encryptor.encrypt_package(plaintext)?;
    let encryption_info = encryptor.encryption_info()?.to_bytes()?;

    let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new()))?;
    ole.create_stream(ENCRYPTION_INFO_STREAM)?
        .write_all(&encryption_info)?;
    ole.create_stream(ENCRYPTED_PACKAGE_STREAM)?
        .write_all(&encrypted_package)?;
    Ok(ole.into_inner().into_inner())
}

fn stream_exists<R: Read + Seek>(ole: &mut cfb::CompoundFile<R>, name: &str) -> bool {
    ole.open_stream(name).is_ok()
}
