use crate::agile::MAX_SPIN_COUNT;
use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::crypto::AES_BLOCK_SIZE;
use crate::cryptoapi::CRYPTOAPI_SPIN_COUNT;
use crate::encryptor::Encryptor;
use crate::error::CryptError;
use crate::info::EncryptionMode;
use crate::standard::STANDARD_SPIN_COUNT;

/// Default Agile password hash iterations.
pub const AGILE_DEFAULT_SPIN_COUNT: u32 = 100_000;

/// Validated parameters for new encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncryptionParams {
    pub(crate) mode: EncryptionMode,
    pub(crate) cipher: CipherAlgorithm,
    pub(crate) hash: HashAlgorithm,
    pub(crate) key_bits: u32,
    pub(crate) chaining: Option<ChainingMode>,
    pub(crate) spin_count: u32,
}

/// Configures new encryption for one [`EncryptionMode`].
///
/// Unset parameters take the mode's defaults. `build()` rejects combinations the mode cannot
/// express instead of silently substituting something else.
///
/// ```
/// use docseal_crypt::{ChainingMode, EncryptionInfoBuilder, EncryptionMode, HashAlgorithm};
///
/// let encryptor = EncryptionInfoBuilder::new(EncryptionMode::Agile)
///     .hash_algorithm(HashAlgorithm::Sha256)
///     .chaining_mode(ChainingMode::Cfb)
///     .build()
///     .unwrap();
/// assert_eq!(encryptor.mode(), EncryptionMode::Agile);
///
/// assert!(EncryptionInfoBuilder::new(EncryptionMode::Standard)
///     .chaining_mode(ChainingMode::Cbc)
///     .build()
///     .is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfoBuilder {
    mode: EncryptionMode,
    cipher: Option<CipherAlgorithm>,
    hash: Option<HashAlgorithm>,
    key_bits: Option<u32>,
    block_size: Option<usize>,
    chaining: Option<ChainingMode>,
    spin_count: Option<u32>,
}

impl EncryptionInfoBuilder {
    pub fn new(mode: EncryptionMode) -> Self {
        Self {
            mode,
            cipher: None,
            hash: None,
            key_bits: None,
            block_size: None,
            chaining: None,
            spin_count: None,
        }
    }

    pub fn cipher_algorithm(mut self, cipher: CipherAlgorithm) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn hash_algorithm(mut self, hash: HashAlgorithm) -> Self {
        self.hash = Some(hash);
        self
    }

    pub fn key_bits(mut self, key_bits: u32) -> Self {
        self.key_bits = Some(key_bits);
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn chaining_mode(mut self, chaining: ChainingMode) -> Self {
        self.chaining = Some(chaining);
        self
    }

    /// Password hash iterations. Only Agile lets this vary.
    pub fn spin_count(mut self, spin_count: u32) -> Self {
        self.spin_count = Some(spin_count);
        self
    }

    pub fn build(&self) -> Result<Encryptor, CryptError> {
        Ok(Encryptor::new(self.validate()?))
    }

    fn unsupported(&self, what: impl std::fmt::Display) -> CryptError {
        CryptError::InvalidOptions(format!("{:?} encryption does not support {what}", self.mode))
    }

    pub(crate) fn validate(&self) -> Result<EncryptionParams, CryptError> {
        match self.mode {
            EncryptionMode::BinaryRc4 => {
                let cipher = self.rc4_cipher()?;
                let hash = self.hash.unwrap_or(HashAlgorithm::Md5);
                if hash != HashAlgorithm::Md5 {
                    return Err(self.unsupported(format_args!("hash {}", hash.xml_name())));
                }
                let key_bits = self.key_bits.unwrap_or(40);
                if key_bits != 40 {
                    return Err(self.unsupported(format_args!("{key_bits}-bit keys")));
                }
                self.fixed_spin_count(0)?;
                self.stream_block_size()?;
                Ok(self.params(cipher, hash, key_bits, None, 0))
            }
            EncryptionMode::CryptoApi => {
                let cipher = self.rc4_cipher()?;
                let hash = self.hash.unwrap_or(HashAlgorithm::Sha1);
                if !matches!(hash, HashAlgorithm::Sha1 | HashAlgorithm::Md5) {
                    return Err(self.unsupported(format_args!("hash {}", hash.xml_name())));
                }
                let key_bits = self.key_bits.unwrap_or(128);
                if !cipher.allowed_key_bits().contains(&key_bits) {
                    return Err(self.unsupported(format_args!("{key_bits}-bit RC4 keys")));
                }
                self.fixed_spin_count(CRYPTOAPI_SPIN_COUNT)?;
                self.stream_block_size()?;
                Ok(self.params(cipher, hash, key_bits, None, CRYPTOAPI_SPIN_COUNT))
            }
            EncryptionMode::Standard => {
                let cipher = self.aes_cipher(CipherAlgorithm::Aes128)?;
                let hash = self.hash.unwrap_or(HashAlgorithm::Sha1);
                if hash != HashAlgorithm::Sha1 {
                    return Err(self.unsupported(format_args!("hash {}", hash.xml_name())));
                }
                let chaining = self.chaining.unwrap_or(ChainingMode::Ecb);
                if chaining != ChainingMode::Ecb {
                    return Err(self.unsupported(format_args!("chaining {}", chaining.xml_name())));
                }
                self.fixed_spin_count(STANDARD_SPIN_COUNT)?;
                self.aes_block_size()?;
                Ok(self.params(
                    cipher,
                    hash,
                    cipher.default_key_bits(),
                    Some(chaining),
                    STANDARD_SPIN_COUNT,
                ))
            }
            EncryptionMode::Agile => {
                let cipher = self.aes_cipher(CipherAlgorithm::Aes256)?;
                let hash = self.hash.unwrap_or(HashAlgorithm::Sha512);
                let chaining = self.chaining.unwrap_or(ChainingMode::Cbc);
                if chaining == ChainingMode::Ecb {
                    return Err(self.unsupported(format_args!("chaining {}", chaining.xml_name())));
                }
                let spin_count = self.spin_count.unwrap_or(AGILE_DEFAULT_SPIN_COUNT);
                if spin_count > MAX_SPIN_COUNT {
                    return Err(self.unsupported(format_args!(
                        "spin count {spin_count} (maximum {MAX_SPIN_COUNT})"
                    )));
                }
                self.aes_block_size()?;
                Ok(self.params(
                    cipher,
                    hash,
                    cipher.default_key_bits(),
                    Some(chaining),
                    spin_count,
                ))
            }
        }
    }

    fn params(
        &self,
        cipher: CipherAlgorithm,
        hash: HashAlgorithm,
        key_bits: u32,
        chaining: Option<ChainingMode>,
        spin_count: u32,
    ) -> EncryptionParams {
        EncryptionParams {
            mode: self.mode,
            cipher,
            hash,
            key_bits,
            chaining,
            spin_count,
        }
    }

    fn rc4_cipher(&self) -> Result<CipherAlgorithm, CryptError> {
        match self.cipher.unwrap_or(CipherAlgorithm::Rc4) {
            CipherAlgorithm::Rc4 => {}
            other => return Err(self.unsupported(format_args!("cipher {other:?}"))),
        }
        if let Some(chaining) = self.chaining {
            return Err(self.unsupported(format_args!("chaining {}", chaining.xml_name())));
        }
        Ok(CipherAlgorithm::Rc4)
    }

    /// Resolve the AES variant from the cipher and/or key size, which must agree when both are
    /// given.
    fn aes_cipher(&self, default: CipherAlgorithm) -> Result<CipherAlgorithm, CryptError> {
        let cipher = match (self.cipher, self.key_bits) {
            (None, None) => default,
            (Some(cipher), None) => cipher,
            (None, Some(key_bits)) => CipherAlgorithm::aes_for_key_bits(key_bits)
                .map_err(|_| self.unsupported(format_args!("{key_bits}-bit keys")))?,
            (Some(cipher), Some(key_bits)) => {
                if !cipher.allowed_key_bits().contains(&key_bits) {
                    return Err(self.unsupported(format_args!(
                        "{key_bits}-bit keys with cipher {cipher:?}"
                    )));
                }
                cipher
            }
        };
        if !cipher.is_aes() {
            return Err(self.unsupported(format_args!("cipher {cipher:?}")));
        }
        Ok(cipher)
    }

    fn fixed_spin_count(&self, required: u32) -> Result<(), CryptError> {
        match self.spin_count {
            Some(spin_count) if spin_count != required => {
                Err(self.unsupported(format_args!("spin count {spin_count}")))
            }
            _ => Ok(()),
        }
    }

    fn stream_block_size(&self) -> Result<(), CryptError> {
        match self.block_size {
            Some(block_size) if block_size != 1 => {
                Err(self.unsupported(format_args!("block size {block_size}")))
            }
            _ => Ok(()),
        }
    }

    fn aes_block_size(&self) -> Result<(), CryptError> {
        match self.block_size {
            Some(block_size) if block_size != AES_BLOCK_SIZE => {
                Err(self.unsupported(format_args!("block size {block_size}")))
            }
            _ => Ok(()),
        }
    }
}
