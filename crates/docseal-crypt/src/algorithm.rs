//! Algorithm identifiers shared by the binary (CryptoAPI `ALG_ID`) and XML descriptors.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::CryptError;

pub(crate) const CALG_RC4: u32 = 0x0000_6801;
pub(crate) const CALG_AES_128: u32 = 0x0000_660E;
pub(crate) const CALG_AES_192: u32 = 0x0000_660F;
pub(crate) const CALG_AES_256: u32 = 0x0000_6610;

pub(crate) const CALG_MD5: u32 = 0x0000_8003;
pub(crate) const CALG_SHA1: u32 = 0x0000_8004;
pub(crate) const CALG_SHA_256: u32 = 0x0000_800C;
pub(crate) const CALG_SHA_384: u32 = 0x0000_800D;
pub(crate) const CALG_SHA_512: u32 = 0x0000_800E;

pub(crate) const PROV_RSA_FULL: u32 = 0x0000_0001;
pub(crate) const PROV_RSA_AES: u32 = 0x0000_0018;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub const fn cryptoapi_alg_id(self) -> u32 {
        match self {
            HashAlgorithm::Md5 => CALG_MD5,
            HashAlgorithm::Sha1 => CALG_SHA1,
            HashAlgorithm::Sha256 => CALG_SHA_256,
            HashAlgorithm::Sha384 => CALG_SHA_384,
            HashAlgorithm::Sha512 => CALG_SHA_512,
        }
    }

    /// Resolve an `EncryptionHeader.algIdHash`. Zero means SHA-1.
    pub fn from_cryptoapi_alg_id(alg_id_hash: u32) -> Result<Self, CryptError> {
        match alg_id_hash {
            0 | CALG_SHA1 => Ok(HashAlgorithm::Sha1),
            CALG_MD5 => Ok(HashAlgorithm::Md5),
            CALG_SHA_256 => Ok(HashAlgorithm::Sha256),
            CALG_SHA_384 => Ok(HashAlgorithm::Sha384),
            CALG_SHA_512 => Ok(HashAlgorithm::Sha512),
            other => Err(CryptError::UnsupportedEncryption(format!(
                "unsupported hash AlgID {other:#010x}"
            ))),
        }
    }

    pub const fn xml_name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    pub fn from_xml_name(name: &str) -> Result<Self, CryptError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "MD5" => Ok(HashAlgorithm::Md5),
            "SHA1" | "SHA-1" => Ok(HashAlgorithm::Sha1),
            "SHA256" | "SHA-256" => Ok(HashAlgorithm::Sha256),
            "SHA384" | "SHA-384" => Ok(HashAlgorithm::Sha384),
            "SHA512" | "SHA-512" => Ok(HashAlgorithm::Sha512),
            other => Err(CryptError::UnsupportedEncryption(format!(
                "unsupported hashAlgorithm {other}"
            ))),
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash the concatenation of `parts` without building it.
    pub(crate) fn digest_parts(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: sha1::Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            HashAlgorithm::Md5 => run::<Md5>(parts),
            HashAlgorithm::Sha1 => run::<Sha1>(parts),
            HashAlgorithm::Sha256 => run::<Sha256>(parts),
            HashAlgorithm::Sha384 => run::<Sha384>(parts),
            HashAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }

    pub(crate) fn hmac(self, key: &[u8]) -> Result<HmacState, CryptError> {
        fn new_mac<M: Mac + hmac::digest::KeyInit>(key: &[u8]) -> Result<M, CryptError> {
            <M as Mac>::new_from_slice(key)
                .map_err(|_| CryptError::format("invalid HMAC key length"))
        }

        Ok(match self {
            HashAlgorithm::Md5 => HmacState::Md5(new_mac(key)?),
            HashAlgorithm::Sha1 => HmacState::Sha1(new_mac(key)?),
            HashAlgorithm::Sha256 => HmacState::Sha256(new_mac(key)?),
            HashAlgorithm::Sha384 => HmacState::Sha384(new_mac(key)?),
            HashAlgorithm::Sha512 => HmacState::Sha512(new_mac(key)?),
        })
    }
}

/// Incremental HMAC over one of the supported digests.
pub(crate) enum HmacState {
    Md5(Hmac<Md5>),
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl HmacState {
    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            HmacState::Md5(mac) => mac.update(data),
            HmacState::Sha1(mac) => mac.update(data),
            HmacState::Sha256(mac) => mac.update(data),
            HmacState::Sha384(mac) => mac.update(data),
            HmacState::Sha512(mac) => mac.update(data),
        }
    }

    pub(crate) fn finalize(self) -> Vec<u8> {
        match self {
            HmacState::Md5(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha1(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Rc4,
    Aes128,
    Aes192,
    Aes256,
}

impl CipherAlgorithm {
    pub const fn cryptoapi_alg_id(self) -> u32 {
        match self {
            CipherAlgorithm::Rc4 => CALG_RC4,
            CipherAlgorithm::Aes128 => CALG_AES_128,
            CipherAlgorithm::Aes192 => CALG_AES_192,
            CipherAlgorithm::Aes256 => CALG_AES_256,
        }
    }

    pub fn from_cryptoapi_alg_id(alg_id: u32) -> Result<Self, CryptError> {
        match alg_id {
            CALG_RC4 => Ok(CipherAlgorithm::Rc4),
            CALG_AES_128 => Ok(CipherAlgorithm::Aes128),
            CALG_AES_192 => Ok(CipherAlgorithm::Aes192),
            CALG_AES_256 => Ok(CipherAlgorithm::Aes256),
            other => Err(CryptError::UnsupportedEncryption(format!(
                "unsupported cipher AlgID {other:#010x}"
            ))),
        }
    }

    pub fn aes_for_key_bits(key_bits: u32) -> Result<Self, CryptError> {
        match key_bits {
            128 => Ok(CipherAlgorithm::Aes128),
            192 => Ok(CipherAlgorithm::Aes192),
            256 => Ok(CipherAlgorithm::Aes256),
            other => Err(CryptError::UnsupportedEncryption(format!(
                "unsupported AES key size {other} bits"
            ))),
        }
    }

    /// Key sizes (in bits) the cipher accepts.
    pub fn allowed_key_bits(self) -> &'static [u32] {
        match self {
            CipherAlgorithm::Rc4 => &[40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128],
            CipherAlgorithm::Aes128 => &[128],
            CipherAlgorithm::Aes192 => &[192],
            CipherAlgorithm::Aes256 => &[256],
        }
    }

    pub const fn default_key_bits(self) -> u32 {
        match self {
            CipherAlgorithm::Rc4 => 40,
            CipherAlgorithm::Aes128 => 128,
            CipherAlgorithm::Aes192 => 192,
            CipherAlgorithm::Aes256 => 256,
        }
    }

    /// Cipher block size in bytes. RC4 is a stream cipher and works on single bytes.
    pub const fn block_size(self) -> usize {
        match self {
            CipherAlgorithm::Rc4 => 1,
            _ => 16,
        }
    }

    pub const fn provider(self) -> CipherProvider {
        match self {
            CipherAlgorithm::Rc4 => CipherProvider::Rc4,
            _ => CipherProvider::Aes,
        }
    }

    pub const fn xml_name(self) -> &'static str {
        match self {
            CipherAlgorithm::Rc4 => "RC4",
            _ => "AES",
        }
    }

    pub fn is_aes(self) -> bool {
        self != CipherAlgorithm::Rc4
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChainingMode {
    Ecb,
    Cbc,
    /// 8-bit cipher feedback (`ChainingModeCFB` in Agile descriptors).
    Cfb,
}

impl ChainingMode {
    pub const fn xml_name(self) -> &'static str {
        match self {
            ChainingMode::Ecb => "ChainingModeECB",
            ChainingMode::Cbc => "ChainingModeCBC",
            ChainingMode::Cfb => "ChainingModeCFB",
        }
    }

    pub fn from_xml_name(name: &str) -> Result<Self, CryptError> {
        match name.trim() {
            "ChainingModeCBC" => Ok(ChainingMode::Cbc),
            "ChainingModeCFB" => Ok(ChainingMode::Cfb),
            other => Err(CryptError::UnsupportedEncryption(format!(
                "unsupported cipherChaining {other}"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CipherProvider {
    Rc4,
    Aes,
}

impl CipherProvider {
    /// CryptoAPI provider type written to `EncryptionHeader.providerType`.
    pub const fn provider_type(self) -> u32 {
        match self {
            CipherProvider::Rc4 => PROV_RSA_FULL,
            CipherProvider::Aes => PROV_RSA_AES,
        }
    }

    pub const fn default_csp_name(self) -> &'static str {
        match self {
            CipherProvider::Rc4 => "Microsoft Base Cryptographic Provider v1.0",
            CipherProvider::Aes => "Microsoft Enhanced RSA and AES Cryptographic Provider",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_names_and_ids_round_trip() {
        for alg in [
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            assert_eq!(HashAlgorithm::from_xml_name(alg.xml_name()).unwrap(), alg);
            assert_eq!(
                HashAlgorithm::from_cryptoapi_alg_id(alg.cryptoapi_alg_id()).unwrap(),
                alg
            );
            assert_eq!(alg.digest(b"abc").len(), alg.digest_len());
        }
        assert_eq!(HashAlgorithm::from_cryptoapi_alg_id(0).unwrap(), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::from_xml_name("sha-512").unwrap(), HashAlgorithm::Sha512);
    }

    #[test]
    fn sha1_digest_vector() {
        assert_eq!(
            HashAlgorithm::Sha1.digest(b"abc"),
            hex::decode("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap()
        );
        assert_eq!(
            HashAlgorithm::Sha1.digest_parts(&[b"a", b"bc"]),
            HashAlgorithm::Sha1.digest(b"abc")
        );
    }

    #[test]
    fn hmac_sha256_vector() {
        // RFC 4231 test case 2.
        let mut mac = HashAlgorithm::Sha256.hmac(b"Jefe").unwrap();
        mac.update(b"what do ya want ");
        mac.update(b"for nothing?");
        assert_eq!(
            mac.finalize(),
            hex::decode("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap()
        );
    }

    #[test]
    fn unknown_ids_are_unsupported() {
        assert!(matches!(
            CipherAlgorithm::from_cryptoapi_alg_id(0x1234),
            Err(CryptError::UnsupportedEncryption(_))
        ));
        assert!(matches!(
            ChainingMode::from_xml_name("ChainingModeECB"),
            Err(CryptError::UnsupportedEncryption(_))
        ));
    }
}
