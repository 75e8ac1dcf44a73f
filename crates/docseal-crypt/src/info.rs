use std::io::Read;
use std::str::FromStr;

use crate::agile::{self, AgileHeader, AgileVerifier};
use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::binary_rc4::BinaryRc4Verifier;
use crate::cryptoapi::CRYPTOAPI_SPIN_COUNT;
use crate::decryptor::Decryptor;
use crate::error::CryptError;
use crate::standard::{
    StandardHeader, StandardVerifier, FLAG_AES, FLAG_AGILE, FLAG_CRYPTOAPI, STANDARD_SPIN_COUNT,
};
use crate::util::Reader;

/// The four password-based encryption schemes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EncryptionMode {
    /// RC4 with a 40-bit MD5-derived key (version 1.1).
    BinaryRc4,
    /// RC4 through the CryptoAPI key derivation (versions 2.2/3.2/4.2).
    CryptoApi,
    /// ECMA-376 Standard encryption: AES-ECB (versions 2.2/3.2/4.2).
    Standard,
    /// ECMA-376 Agile encryption with an XML descriptor (version 4.4).
    Agile,
}

impl EncryptionMode {
    /// `(versionMajor, versionMinor)` written for new files.
    pub const fn version(self) -> (u16, u16) {
        match self {
            EncryptionMode::BinaryRc4 => (1, 1),
            EncryptionMode::CryptoApi | EncryptionMode::Standard => (4, 2),
            EncryptionMode::Agile => (4, 4),
        }
    }

    /// Encryption flags written for new files.
    pub const fn flags(self) -> u32 {
        match self {
            EncryptionMode::BinaryRc4 => 0,
            EncryptionMode::CryptoApi => FLAG_CRYPTOAPI,
            EncryptionMode::Standard => FLAG_CRYPTOAPI | FLAG_AES,
            EncryptionMode::Agile => FLAG_AGILE,
        }
    }
}

impl FromStr for EncryptionMode {
    type Err = CryptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binaryrc4" | "binary-rc4" | "rc4" => Ok(EncryptionMode::BinaryRc4),
            "cryptoapi" => Ok(EncryptionMode::CryptoApi),
            "standard" => Ok(EncryptionMode::Standard),
            "agile" => Ok(EncryptionMode::Agile),
            other => Err(CryptError::InvalidOptions(format!(
                "unknown encryption mode {other:?}"
            ))),
        }
    }
}

/// Header and verifier of one scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionVariant {
    BinaryRc4(BinaryRc4Verifier),
    CryptoApi {
        header: StandardHeader,
        verifier: StandardVerifier,
    },
    Standard {
        header: StandardHeader,
        verifier: StandardVerifier,
    },
    Agile {
        header: AgileHeader,
        verifier: AgileVerifier,
    },
}

impl EncryptionVariant {
    pub fn mode(&self) -> EncryptionMode {
        match self {
            EncryptionVariant::BinaryRc4(_) => EncryptionMode::BinaryRc4,
            EncryptionVariant::CryptoApi { .. } => EncryptionMode::CryptoApi,
            EncryptionVariant::Standard { .. } => EncryptionMode::Standard,
            EncryptionVariant::Agile { .. } => EncryptionMode::Agile,
        }
    }
}

/// Parsed `EncryptionInfo` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    version_major: u16,
    version_minor: u16,
    flags: u32,
    variant: EncryptionVariant,
}

impl EncryptionInfo {
    /// Wrap a freshly generated variant with its mode's default version and flags.
    pub(crate) fn from_variant(variant: EncryptionVariant) -> Self {
        let mode = variant.mode();
        let (version_major, version_minor) = mode.version();
        Self {
            version_major,
            version_minor,
            flags: mode.flags(),
            variant,
        }
    }

    /// Parse an `EncryptionInfo` stream.
    ///
    /// Versions 2.2, 3.2 and 4.2 share one binary layout; the header's cipher decides between
    /// CryptoAPI RC4 and Standard AES.
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptError> {
        let mut r = Reader::new(bytes);
        let version_major = r.read_u16_le("EncryptionVersionInfo.major")?;
        let version_minor = r.read_u16_le("EncryptionVersionInfo.minor")?;

        let (flags, variant) = match (version_major, version_minor) {
            (1, 1) => (0, EncryptionVariant::BinaryRc4(BinaryRc4Verifier::parse(&mut r)?)),
            (2..=4, 2) => {
                let flags = r.read_u32_le("EncryptionInfo.flags")?;
                let header = StandardHeader::parse(&mut r)?;
                let verifier = StandardVerifier::parse(&mut r, header.cipher_algorithm())?;
                let variant = if header.cipher_algorithm().is_aes() {
                    EncryptionVariant::Standard { header, verifier }
                } else {
                    EncryptionVariant::CryptoApi { header, verifier }
                };
                (flags, variant)
            }
            (4, 4) => {
                let flags = r.read_u32_le("EncryptionInfo.flags")?;
                if flags != FLAG_AGILE {
                    log::debug!("Agile EncryptionInfo has unusual flags {flags:#010x}");
                }
                let (header, verifier) = agile::parse_descriptor(r.remaining())?;
                (flags, EncryptionVariant::Agile { header, verifier })
            }
            (major, minor) => {
                return Err(CryptError::UnsupportedEncryption(format!(
                    "unsupported EncryptionInfo version {major}.{minor}"
                )))
            }
        };

        log::debug!(
            "EncryptionInfo version {version_major}.{version_minor} dispatched to {:?}",
            variant.mode()
        );
        Ok(Self {
            version_major,
            version_minor,
            flags,
            variant,
        })
    }

    /// Read and parse a whole `EncryptionInfo` stream.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, CryptError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::parse(&bytes)
    }

    /// Serialize to the `EncryptionInfo` stream layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptError> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version_major.to_le_bytes());
        out.extend_from_slice(&self.version_minor.to_le_bytes());
        match &self.variant {
            EncryptionVariant::BinaryRc4(verifier) => verifier.write(&mut out),
            EncryptionVariant::CryptoApi { header, verifier }
            | EncryptionVariant::Standard { header, verifier } => {
                out.extend_from_slice(&self.flags.to_le_bytes());
                header.write(&mut out);
                verifier.write(&mut out);
            }
            EncryptionVariant::Agile { header, verifier } => {
                out.extend_from_slice(&self.flags.to_le_bytes());
                out.extend_from_slice(&agile::write_descriptor(header, verifier)?);
            }
        }
        Ok(out)
    }

    pub fn version_major(&self) -> u16 {
        self.version_major
    }

    pub fn version_minor(&self) -> u16 {
        self.version_minor
    }

    /// Encryption flags; always 0 for Binary RC4, which has no flags field.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn variant(&self) -> &EncryptionVariant {
        &self.variant
    }

    pub(crate) fn variant_mut(&mut self) -> &mut EncryptionVariant {
        &mut self.variant
    }

    pub fn mode(&self) -> EncryptionMode {
        self.variant.mode()
    }

    pub fn cipher_algorithm(&self) -> CipherAlgorithm {
        match &self.variant {
            EncryptionVariant::BinaryRc4(_) => CipherAlgorithm::Rc4,
            EncryptionVariant::CryptoApi { header, .. }
            | EncryptionVariant::Standard { header, .. } => header.cipher_algorithm(),
            EncryptionVariant::Agile { header, .. } => header.cipher_algorithm(),
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match &self.variant {
            EncryptionVariant::BinaryRc4(_) => HashAlgorithm::Md5,
            EncryptionVariant::CryptoApi { header, .. }
            | EncryptionVariant::Standard { header, .. } => header.hash_algorithm(),
            EncryptionVariant::Agile { header, .. } => header.hash_algorithm(),
        }
    }

    /// Size of the key that encrypts the package.
    pub fn key_bits(&self) -> u32 {
        match &self.variant {
            EncryptionVariant::BinaryRc4(_) => 40,
            EncryptionVariant::CryptoApi { header, .. }
            | EncryptionVariant::Standard { header, .. } => header.key_bits(),
            EncryptionVariant::Agile { header, .. } => header.key_bits(),
        }
    }

    pub fn chaining_mode(&self) -> Option<ChainingMode> {
        match &self.variant {
            EncryptionVariant::BinaryRc4(_) | EncryptionVariant::CryptoApi { .. } => None,
            EncryptionVariant::Standard { header, .. } => header.chaining_mode(),
            EncryptionVariant::Agile { header, .. } => Some(header.chaining_mode()),
        }
    }

    /// Password hash iterations.
    pub fn spin_count(&self) -> u32 {
        match &self.variant {
            EncryptionVariant::BinaryRc4(_) => 0,
            EncryptionVariant::CryptoApi { .. } => CRYPTOAPI_SPIN_COUNT,
            EncryptionVariant::Standard { .. } => STANDARD_SPIN_COUNT,
            EncryptionVariant::Agile { verifier, .. } => verifier.spin_count(),
        }
    }

    pub fn decryptor(&self) -> Decryptor {
        Decryptor::new(self.clone())
    }
}
