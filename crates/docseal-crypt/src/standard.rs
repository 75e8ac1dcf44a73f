//! Binary `EncryptionHeader`/`EncryptionVerifier` records shared by CryptoAPI RC4 and Standard
//! AES, plus the Standard (AES-ECB) key derivation.

use zeroize::Zeroizing;

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::crypto::{
    aes_ecb_decrypt_in_place, aes_ecb_encrypt_in_place, block_hash, crypt_derive_key, get_block0,
    hash_password,
};
use crate::error::CryptError;
use crate::util::{
    encode_utf16le_nul_terminated, password_to_utf16le, verifier_hash_matches, Reader,
    MAX_LEGACY_PASSWORD_LEN,
};

pub const FLAG_CRYPTOAPI: u32 = 0x0000_0004;
pub const FLAG_DOC_PROPS: u32 = 0x0000_0008;
pub const FLAG_EXTERNAL: u32 = 0x0000_0010;
pub const FLAG_AES: u32 = 0x0000_0020;
pub const FLAG_AGILE: u32 = 0x0000_0040;

/// Standard encryption always iterates the password hash 50,000 times.
pub const STANDARD_SPIN_COUNT: u32 = 50_000;

const SALT_SIZE: u32 = 16;
const RC4_ENCRYPTED_VERIFIER_HASH_LEN: usize = 20;
const AES_ENCRYPTED_VERIFIER_HASH_LEN: usize = 32;

/// `EncryptionHeader` (MS-OFFCRYPTO 2.3.2).
///
/// The raw `algId`, `algIdHash` and `keySize` fields are kept next to the resolved algorithms so
/// that a parsed header is written back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardHeader {
    flags: u32,
    size_extra: u32,
    alg_id: u32,
    alg_id_hash: u32,
    key_size: u32,
    provider_type: u32,
    reserved1: u32,
    reserved2: u32,
    csp_name: Option<String>,
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
    key_bits: u32,
}

impl StandardHeader {
    pub(crate) fn new(
        flags: u32,
        cipher: CipherAlgorithm,
        hash: HashAlgorithm,
        key_bits: u32,
    ) -> Self {
        Self {
            flags,
            size_extra: 0,
            alg_id: cipher.cryptoapi_alg_id(),
            alg_id_hash: hash.cryptoapi_alg_id(),
            key_size: key_bits,
            provider_type: cipher.provider().provider_type(),
            reserved1: 0,
            reserved2: 0,
            csp_name: Some(cipher.provider().default_csp_name().to_string()),
            cipher,
            hash,
            key_bits,
        }
    }

    /// Parse the `headerSize`-prefixed header.
    ///
    /// `CSPName` is optional in practice: when the four bytes following `reserved2` read as `16`
    /// (the verifier's `saltSize`) the name is taken to be absent.
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Self, CryptError> {
        let header_size = r.read_u32_le("EncryptionInfo.headerSize")? as usize;
        let start = r.position();

        let flags = r.read_u32_le("EncryptionHeader.flags")?;
        let size_extra = r.read_u32_le("EncryptionHeader.sizeExtra")?;
        let alg_id = r.read_u32_le("EncryptionHeader.algId")?;
        let alg_id_hash = r.read_u32_le("EncryptionHeader.algIdHash")?;
        let key_size = r.read_u32_le("EncryptionHeader.keySize")?;
        let provider_type = r.read_u32_le("EncryptionHeader.providerType")?;
        let reserved1 = r.read_u32_le("EncryptionHeader.reserved1")?;
        let reserved2 = r.read_u32_le("EncryptionHeader.reserved2")?;

        let csp_name = if r.peek_u32_le() == Some(SALT_SIZE) {
            log::debug!("EncryptionHeader.CSPName absent; verifier follows reserved2");
            None
        } else {
            Some(read_utf16le_until_nul(r)?)
        };

        let consumed = r.position() - start;
        if consumed < header_size && csp_name.is_some() {
            // Writers sometimes pad CSPName past its terminator; headerSize frames the header.
            r.take(header_size - consumed, "EncryptionHeader.CSPName padding")?;
        } else if consumed != header_size {
            log::warn!(
                "EncryptionHeader declares {header_size} bytes but {consumed} were consumed; \
                 continuing with the verifier at the current position"
            );
        }

        let cipher = if alg_id == 0 {
            if flags & FLAG_AES != 0 {
                CipherAlgorithm::Aes128
            } else {
                CipherAlgorithm::Rc4
            }
        } else {
            CipherAlgorithm::from_cryptoapi_alg_id(alg_id)?
        };
        let hash = HashAlgorithm::from_cryptoapi_alg_id(alg_id_hash)?;
        let key_bits = if key_size == 0 {
            cipher.default_key_bits()
        } else {
            key_size
        };
        if !cipher.allowed_key_bits().contains(&key_bits) {
            return Err(CryptError::UnsupportedEncryption(format!(
                "unsupported key size {key_bits} bits for {cipher:?}"
            )));
        }

        Ok(Self {
            flags,
            size_extra,
            alg_id,
            alg_id_hash,
            key_size,
            provider_type,
            reserved1,
            reserved2,
            csp_name,
            cipher,
            hash,
            key_bits,
        })
    }

    /// Append `headerSize` and the header to `out`.
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        let csp = self
            .csp_name
            .as_deref()
            .map(encode_utf16le_nul_terminated)
            .unwrap_or_default();
        let header_size = (8 * 4 + csp.len()) as u32;

        out.extend_from_slice(&header_size.to_le_bytes());
        for field in [
            self.flags,
            self.size_extra,
            self.alg_id,
            self.alg_id_hash,
            self.key_size,
            self.provider_type,
            self.reserved1,
            self.reserved2,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&csp);
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn size_extra(&self) -> u32 {
        self.size_extra
    }

    pub fn cipher_algorithm(&self) -> CipherAlgorithm {
        self.cipher
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    /// Effective key size; a stored `keySize` of zero resolves to the cipher default.
    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    /// `None` for RC4, ECB for AES.
    pub fn chaining_mode(&self) -> Option<ChainingMode> {
        self.cipher.is_aes().then_some(ChainingMode::Ecb)
    }

    pub fn provider_type(&self) -> u32 {
        self.provider_type
    }

    pub fn csp_name(&self) -> Option<&str> {
        self.csp_name.as_deref()
    }
}

fn read_utf16le_until_nul(r: &mut Reader<'_>) -> Result<String, CryptError> {
    let mut units = Vec::new();
    loop {
        let unit = r.read_u16_le("EncryptionHeader.CSPName")?;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    String::from_utf16(&units)
        .map_err(|_| CryptError::format("EncryptionHeader.CSPName is not valid UTF-16"))
}

/// `EncryptionVerifier` (MS-OFFCRYPTO 2.3.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardVerifier {
    salt: [u8; 16],
    encrypted_verifier: [u8; 16],
    verifier_hash_size: u32,
    encrypted_verifier_hash: Vec<u8>,
}

impl StandardVerifier {
    /// The encrypted hash is 20 bytes under RC4 and 32 bytes (two AES blocks) under AES.
    pub(crate) fn parse(r: &mut Reader<'_>, cipher: CipherAlgorithm) -> Result<Self, CryptError> {
        let salt_size = r.read_u32_le("EncryptionVerifier.saltSize")?;
        if salt_size != SALT_SIZE {
            return Err(CryptError::format(format!(
                "EncryptionVerifier.saltSize must be {SALT_SIZE}, got {salt_size}"
            )));
        }
        let salt = r.take_array("EncryptionVerifier.salt")?;
        let encrypted_verifier = r.take_array("EncryptionVerifier.encryptedVerifier")?;
        let verifier_hash_size = r.read_u32_le("EncryptionVerifier.verifierHashSize")?;

        let hash_len = encrypted_verifier_hash_len(cipher);
        if verifier_hash_size as usize > hash_len {
            return Err(CryptError::format(format!(
                "EncryptionVerifier.verifierHashSize {verifier_hash_size} exceeds the \
                 {hash_len}-byte encrypted hash"
            )));
        }
        let encrypted_verifier_hash = r
            .take(hash_len, "EncryptionVerifier.encryptedVerifierHash")?
            .to_vec();

        Ok(Self {
            salt,
            encrypted_verifier,
            verifier_hash_size,
            encrypted_verifier_hash,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SALT_SIZE.to_le_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.encrypted_verifier);
        out.extend_from_slice(&self.verifier_hash_size.to_le_bytes());
        out.extend_from_slice(&self.encrypted_verifier_hash);
    }

    pub(crate) fn from_parts(
        salt: [u8; 16],
        encrypted_verifier: [u8; 16],
        verifier_hash_size: u32,
        encrypted_verifier_hash: Vec<u8>,
    ) -> Self {
        Self {
            salt,
            encrypted_verifier,
            verifier_hash_size,
            encrypted_verifier_hash,
        }
    }

    pub fn salt(&self) -> &[u8; 16] {
        &self.salt
    }

    pub fn encrypted_verifier(&self) -> &[u8; 16] {
        &self.encrypted_verifier
    }

    pub fn verifier_hash_size(&self) -> u32 {
        self.verifier_hash_size
    }

    pub fn encrypted_verifier_hash(&self) -> &[u8] {
        &self.encrypted_verifier_hash
    }
}

pub(crate) fn encrypted_verifier_hash_len(cipher: CipherAlgorithm) -> usize {
    if cipher.is_aes() {
        AES_ENCRYPTED_VERIFIER_HASH_LEN
    } else {
        RC4_ENCRYPTED_VERIFIER_HASH_LEN
    }
}

/// Derive the AES key for `password` (MS-OFFCRYPTO 2.3.4.7).
pub(crate) fn derive_key(
    header: &StandardHeader,
    salt: &[u8],
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptError> {
    let password = password_to_utf16le(password, Some(MAX_LEGACY_PASSWORD_LEN));
    let h = hash_password(&password, salt, header.hash, STANDARD_SPIN_COUNT);
    let final_hash = block_hash(&h, 0, header.hash);
    crypt_derive_key(&final_hash, header.hash, (header.key_bits / 8) as usize)
}

/// Check a derived key against the verifier (MS-OFFCRYPTO 2.3.4.8).
pub(crate) fn verify_key(
    header: &StandardHeader,
    verifier: &StandardVerifier,
    key: &[u8],
) -> Result<bool, CryptError> {
    let mut decrypted_verifier = Zeroizing::new(verifier.encrypted_verifier);
    aes_ecb_decrypt_in_place(key, &mut decrypted_verifier[..])?;
    let mut decrypted_hash = Zeroizing::new(verifier.encrypted_verifier_hash.clone());
    aes_ecb_decrypt_in_place(key, &mut decrypted_hash)?;

    let expected = header.hash.digest(&decrypted_verifier[..]);
    Ok(verifier_hash_matches(
        &expected,
        &decrypted_hash,
        verifier.verifier_hash_size as usize,
    ))
}

/// Build a verifier whose plaintext is `verifier`, encrypted under `key`.
pub(crate) fn create_verifier(
    header: &StandardHeader,
    key: &[u8],
    salt: [u8; 16],
    verifier: [u8; 16],
) -> Result<StandardVerifier, CryptError> {
    let mut encrypted_verifier = verifier;
    aes_ecb_encrypt_in_place(key, &mut encrypted_verifier)?;

    let verifier_hash = header.hash.digest(&verifier);
    let mut encrypted_verifier_hash = get_block0(&verifier_hash, AES_ENCRYPTED_VERIFIER_HASH_LEN);
    aes_ecb_encrypt_in_place(key, &mut encrypted_verifier_hash)?;

    Ok(StandardVerifier::from_parts(
        salt,
        encrypted_verifier,
        verifier_hash.len() as u32,
        encrypted_verifier_hash,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_fields(flags: u32, alg_id: u32, alg_id_hash: u32, key_size: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [flags, 0, alg_id, alg_id_hash, key_size, 0x18, 0, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    #[test]
    fn header_without_csp_name_is_detected_by_salt_size() {
        let mut bytes = 32u32.to_le_bytes().to_vec();
        bytes.extend(header_fields(0x24, 0x660E, 0x8004, 128));
        bytes.extend_from_slice(&16u32.to_le_bytes());

        let mut r = Reader::new(&bytes);
        let header = StandardHeader::parse(&mut r).unwrap();
        assert_eq!(header.csp_name(), None);
        assert_eq!(r.position(), 36);
        assert_eq!(header.cipher_algorithm(), CipherAlgorithm::Aes128);

        let mut out = Vec::new();
        header.write(&mut out);
        assert_eq!(out, bytes[..36]);
    }

    #[test]
    fn padded_csp_name_is_framed_by_header_size() {
        let mut csp = encode_utf16le_nul_terminated("Microsoft Enhanced RSA and AES Cryptographic Provider");
        csp.extend_from_slice(&[0; 6]);
        let mut bytes = ((32 + csp.len()) as u32).to_le_bytes().to_vec();
        bytes.extend(header_fields(0x24, 0x660E, 0x8004, 128));
        bytes.extend_from_slice(&csp);
        bytes.extend_from_slice(&16u32.to_le_bytes());

        let mut r = Reader::new(&bytes);
        let header = StandardHeader::parse(&mut r).unwrap();
        assert_eq!(
            header.csp_name(),
            Some("Microsoft Enhanced RSA and AES Cryptographic Provider")
        );
        assert_eq!(r.peek_u32_le(), Some(16));
        assert_eq!(r.position(), bytes.len() - 4);
    }

    #[test]
    fn understated_header_size_continues_after_csp_name() {
        let csp = encode_utf16le_nul_terminated("Provider");
        let mut bytes = 32u32.to_le_bytes().to_vec();
        bytes.extend(header_fields(0x24, 0x660E, 0x8004, 128));
        bytes.extend_from_slice(&csp);

        let mut r = Reader::new(&bytes);
        let header = StandardHeader::parse(&mut r).unwrap();
        assert_eq!(header.csp_name(), Some("Provider"));
        assert_eq!(r.position(), bytes.len());
    }

    #[test]
    fn header_with_csp_name_round_trips() {
        let csp = encode_utf16le_nul_terminated("Microsoft Enhanced RSA and AES Cryptographic Provider");
        let mut bytes = ((32 + csp.len()) as u32).to_le_bytes().to_vec();
        bytes.extend(header_fields(0x24, 0x6610, 0, 256));
        bytes.extend_from_slice(&csp);

        let header = StandardHeader::parse(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(
            header.csp_name(),
            Some("Microsoft Enhanced RSA and AES Cryptographic Provider")
        );
        assert_eq!(header.hash_algorithm(), HashAlgorithm::Sha1);
        assert_eq!(header.key_bits(), 256);

        let mut out = Vec::new();
        header.write(&mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn zero_alg_id_falls_back_to_flags() {
        let mut bytes = 32u32.to_le_bytes().to_vec();
        bytes.extend(header_fields(FLAG_CRYPTOAPI, 0, 0, 0));
        bytes.extend_from_slice(&16u32.to_le_bytes());
        let header = StandardHeader::parse(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(header.cipher_algorithm(), CipherAlgorithm::Rc4);
        assert_eq!(header.key_bits(), 40);
        assert_eq!(header.chaining_mode(), None);
    }

    #[test]
    fn verifier_rejects_unexpected_salt_size() {
        let mut bytes = 8u32.to_le_bytes().to_vec();
        bytes.resize(4 + 8 + 16 + 4 + 32, 0);
        let err = StandardVerifier::parse(&mut Reader::new(&bytes), CipherAlgorithm::Aes128)
            .expect_err("salt size 8");
        assert!(matches!(err, CryptError::InvalidFormat(_)));
    }

    #[test]
    fn created_verifier_verifies_with_its_key_only() {
        let header = StandardHeader::new(
            FLAG_CRYPTOAPI | FLAG_AES,
            CipherAlgorithm::Aes128,
            HashAlgorithm::Sha1,
            128,
        );
        let salt = [5u8; 16];
        let key = derive_key(&header, &salt, "Password1234_").unwrap();
        let verifier = create_verifier(&header, &key, salt, [0xA5; 16]).unwrap();

        assert!(verify_key(&header, &verifier, &key).unwrap());
        let other = derive_key(&header, verifier.salt(), "password1234_").unwrap();
        assert!(!verify_key(&header, &verifier, &other).unwrap());
    }
}
