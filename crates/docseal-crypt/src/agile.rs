//! Agile encryption (`EncryptionInfo` version 4.4).
//!
//! The descriptor is an XML document. `<keyData>` describes how the package itself is
//! encrypted, `<dataIntegrity>` carries the encrypted HMAC key and value, and each password
//! `<keyEncryptor>` wraps the package key under a key derived from the password.
//!
//! Every wrapped field uses its own intermediate key, `getBlock36(Hash(pwHash || blockKey))`,
//! selected by one of the fixed block keys below.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::crypto::{
    aes_decrypt_in_place, aes_encrypt_in_place, generate_iv, generate_key, get_block0,
    hash_password, round_up_to_block, AES_BLOCK_SIZE,
};
use crate::error::CryptError;
use crate::util::{ct_eq, decode_b64_attr, encode_b64, password_to_utf16le};

pub(crate) const ENCRYPTION_NS: &str = "http://schemas.microsoft.com/office/2006/encryption";
pub(crate) const PASSWORD_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";
pub(crate) const CERTIFICATE_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/certificate";

const VERIFIER_HASH_INPUT_BLOCK: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
const VERIFIER_HASH_VALUE_BLOCK: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
const KEY_VALUE_BLOCK: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
const INTEGRITY_KEY_BLOCK: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
const INTEGRITY_VALUE_BLOCK: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

/// Upper bound on `spinCount` accepted from a descriptor.
pub const MAX_SPIN_COUNT: u32 = 10_000_000;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Cipher attributes shared by `<keyData>` and `<p:encryptedKey>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CipherParams {
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
    key_bits: u32,
    block_size: usize,
    chaining: ChainingMode,
    salt: Vec<u8>,
}

impl CipherParams {
    fn key_len(&self) -> usize {
        (self.key_bits / 8) as usize
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("saltSize", self.salt.len().to_string()),
            ("blockSize", self.block_size.to_string()),
            ("keyBits", self.key_bits.to_string()),
            ("hashSize", self.hash.digest_len().to_string()),
            ("cipherAlgorithm", self.cipher.xml_name().to_string()),
            ("cipherChaining", self.chaining.xml_name().to_string()),
            ("hashAlgorithm", self.hash.xml_name().to_string()),
            ("saltValue", encode_b64(&self.salt)),
        ]
    }
}

/// `<keyData>` and `<dataIntegrity>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileHeader {
    params: CipherParams,
    encrypted_hmac_key: Vec<u8>,
    encrypted_hmac_value: Vec<u8>,
}

impl AgileHeader {
    pub fn cipher_algorithm(&self) -> CipherAlgorithm {
        self.params.cipher
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.params.hash
    }

    pub fn key_bits(&self) -> u32 {
        self.params.key_bits
    }

    pub fn block_size(&self) -> usize {
        self.params.block_size
    }

    pub fn chaining_mode(&self) -> ChainingMode {
        self.params.chaining
    }

    /// `keyData/@saltValue`, which seeds the per-segment IVs.
    pub fn key_data_salt(&self) -> &[u8] {
        &self.params.salt
    }

    pub fn encrypted_hmac_key(&self) -> &[u8] {
        &self.encrypted_hmac_key
    }

    pub fn encrypted_hmac_value(&self) -> &[u8] {
        &self.encrypted_hmac_value
    }
}

/// The password `<p:encryptedKey>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileVerifier {
    params: CipherParams,
    spin_count: u32,
    encrypted_verifier_hash_input: Vec<u8>,
    encrypted_verifier_hash_value: Vec<u8>,
    encrypted_key_value: Vec<u8>,
}

impl AgileVerifier {
    pub fn cipher_algorithm(&self) -> CipherAlgorithm {
        self.params.cipher
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.params.hash
    }

    pub fn key_bits(&self) -> u32 {
        self.params.key_bits
    }

    pub fn block_size(&self) -> usize {
        self.params.block_size
    }

    pub fn chaining_mode(&self) -> ChainingMode {
        self.params.chaining
    }

    pub fn salt(&self) -> &[u8] {
        &self.params.salt
    }

    pub fn spin_count(&self) -> u32 {
        self.spin_count
    }

    pub fn encrypted_verifier_hash_input(&self) -> &[u8] {
        &self.encrypted_verifier_hash_input
    }

    pub fn encrypted_verifier_hash_value(&self) -> &[u8] {
        &self.encrypted_verifier_hash_value
    }

    pub fn encrypted_key_value(&self) -> &[u8] {
        &self.encrypted_key_value
    }
}

/// Keys recovered from a verified password.
pub(crate) struct AgileSecrets {
    pub(crate) secret_key: Zeroizing<Vec<u8>>,
    pub(crate) hmac_key: Zeroizing<Vec<u8>>,
    pub(crate) hmac_value: Zeroizing<Vec<u8>>,
}

/// Freshly generated descriptor plus the keys needed to encrypt a package under it.
///
/// `header.encrypted_hmac_value` stays empty until [`seal_hmac_value`] runs.
pub(crate) struct NewAgile {
    pub(crate) header: AgileHeader,
    pub(crate) verifier: AgileVerifier,
    pub(crate) secret_key: Zeroizing<Vec<u8>>,
    pub(crate) hmac_key: Zeroizing<Vec<u8>>,
}

// ---------------------------------------------------------------------------------------------
// Descriptor parsing
// ---------------------------------------------------------------------------------------------

/// `xmlns` bindings in scope at the current element, tagged with the depth that declared them.
#[derive(Default)]
struct NamespaceScope {
    depth: usize,
    bindings: Vec<(usize, Vec<u8>, Vec<u8>)>,
}

impl NamespaceScope {
    fn enter(&mut self, e: &BytesStart<'_>) -> Result<(), CryptError> {
        self.depth += 1;
        for attr in e.attributes().with_checks(false) {
            let attr =
                attr.map_err(|err| CryptError::format(format!("invalid XML attribute: {err}")))?;
            let prefix = match attr.key.as_ref() {
                b"xmlns" => &[][..],
                key => match key.strip_prefix(b"xmlns:") {
                    Some(prefix) => prefix,
                    None => continue,
                },
            };
            self.bindings
                .push((self.depth, prefix.to_vec(), attr.value.to_vec()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        while self
            .bindings
            .last()
            .is_some_and(|(depth, ..)| *depth == self.depth)
        {
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Split a qualified element name into its bound namespace URI and local part.
    fn resolve<'s, 'n>(&'s self, qname: &'n [u8]) -> (Option<&'s [u8]>, &'n [u8]) {
        let (prefix, local) = match qname.iter().position(|b| *b == b':') {
            Some(idx) => (&qname[..idx], &qname[idx + 1..]),
            None => (&[][..], qname),
        };
        let uri = self
            .bindings
            .iter()
            .rev()
            .find(|(_, bound, _)| bound.as_slice() == prefix)
            .map(|(_, _, uri)| uri.as_slice());
        (uri, local)
    }
}

/// Unescaped attributes of one element, keyed by local name.
struct ElementAttrs {
    element: &'static str,
    values: Vec<(Vec<u8>, String)>,
}

impl ElementAttrs {
    fn collect(element: &'static str, e: &BytesStart<'_>) -> Result<Self, CryptError> {
        let mut values = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr =
                attr.map_err(|err| CryptError::format(format!("invalid XML attribute: {err}")))?;
            let value = attr.unescape_value().map_err(|err| {
                CryptError::format(format!("invalid {element} attribute value: {err}"))
            })?;
            values.push((attr.key.local_name().as_ref().to_vec(), value.into_owned()));
        }
        Ok(Self { element, values })
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key.as_slice() == name.as_bytes())
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, name: &str) -> Result<&str, CryptError> {
        self.get(name)
            .ok_or_else(|| CryptError::format(format!("missing {}.{name}", self.element)))
    }

    fn decimal(&self, name: &str) -> Result<Option<u32>, CryptError> {
        self.get(name)
            .map(|value| {
                value.trim().parse::<u32>().map_err(|_| {
                    CryptError::format(format!(
                        "{}.{name} is not a valid number: {value:?}",
                        self.element
                    ))
                })
            })
            .transpose()
    }

    fn required_decimal(&self, name: &str) -> Result<u32, CryptError> {
        self.decimal(name)?
            .ok_or_else(|| CryptError::format(format!("missing {}.{name}", self.element)))
    }

    fn required_b64(&self, name: &str) -> Result<Vec<u8>, CryptError> {
        decode_b64_attr(self.required(name)?).map_err(|err| match err {
            CryptError::InvalidFormat(msg) => {
                CryptError::format(format!("{}.{name}: {msg}", self.element))
            }
            other => other,
        })
    }

    fn cipher_params(&self) -> Result<CipherParams, CryptError> {
        let element = self.element;
        let key_bits = self.required_decimal("keyBits")?;
        let block_size = self.required_decimal("blockSize")? as usize;
        let cipher_name = self.required("cipherAlgorithm")?;
        let chaining = ChainingMode::from_xml_name(self.required("cipherChaining")?)?;
        let hash = HashAlgorithm::from_xml_name(self.required("hashAlgorithm")?)?;
        let salt = self.required_b64("saltValue")?;

        if !cipher_name.trim().eq_ignore_ascii_case("AES") {
            return Err(CryptError::UnsupportedEncryption(format!(
                "unsupported {element}.cipherAlgorithm {cipher_name}"
            )));
        }
        let cipher = CipherAlgorithm::aes_for_key_bits(key_bits).map_err(|_| {
            CryptError::format(format!("{element}.keyBits {key_bits} is not a valid AES key size"))
        })?;
        if block_size != AES_BLOCK_SIZE {
            return Err(CryptError::format(format!(
                "{element}.blockSize must be {AES_BLOCK_SIZE} for AES, got {block_size}"
            )));
        }
        if let Some(salt_size) = self.decimal("saltSize")? {
            if salt_size as usize != salt.len() {
                return Err(CryptError::format(format!(
                    "{element}.saltSize is {salt_size} but saltValue is {} bytes",
                    salt.len()
                )));
            }
        }
        if salt.len() != block_size {
            return Err(CryptError::format(format!(
                "{element}.saltValue is {} bytes but blockSize is {block_size}",
                salt.len()
            )));
        }
        if let Some(hash_size) = self.decimal("hashSize")? {
            if hash_size as usize != hash.digest_len() {
                return Err(CryptError::format(format!(
                    "{element}.hashSize {hash_size} does not match {}",
                    hash.xml_name()
                )));
            }
        }

        Ok(CipherParams {
            cipher,
            hash,
            key_bits,
            block_size,
            chaining,
            salt,
        })
    }
}

/// Encrypted descriptor fields must decrypt to at least `min_len` bytes, and CBC needs whole
/// blocks.
fn check_encrypted_field(
    params: &CipherParams,
    field: &str,
    bytes: &[u8],
    min_len: usize,
) -> Result<(), CryptError> {
    if bytes.len() < min_len {
        return Err(CryptError::format(format!(
            "{field} is {} bytes, expected at least {min_len}",
            bytes.len()
        )));
    }
    if params.chaining == ChainingMode::Cbc && bytes.len() % params.block_size != 0 {
        return Err(CryptError::format(format!(
            "{field} is {} bytes, not a multiple of the {}-byte block size",
            bytes.len(),
            params.block_size
        )));
    }
    Ok(())
}

#[derive(Default)]
struct DescriptorParts {
    saw_root: bool,
    key_data: Option<CipherParams>,
    integrity: Option<(Vec<u8>, Vec<u8>)>,
    password: Option<AgileVerifier>,
}

impl DescriptorParts {
    fn visit(&mut self, scope: &NamespaceScope, e: &BytesStart<'_>) -> Result<(), CryptError> {
        let name = e.name();
        let (ns, local) = scope.resolve(name.as_ref());

        if !self.saw_root {
            self.saw_root = true;
            if local != b"encryption" || ns != Some(ENCRYPTION_NS.as_bytes()) {
                return Err(CryptError::format(
                    "Agile EncryptionInfo root element is not <encryption>",
                ));
            }
            return Ok(());
        }

        match local {
            b"keyData" if self.key_data.is_none() => {
                self.key_data = Some(ElementAttrs::collect("keyData", e)?.cipher_params()?);
            }
            b"dataIntegrity" if self.integrity.is_none() => {
                let attrs = ElementAttrs::collect("dataIntegrity", e)?;
                self.integrity = Some((
                    attrs.required_b64("encryptedHmacKey")?,
                    attrs.required_b64("encryptedHmacValue")?,
                ));
            }
            b"encryptedKey" => {
                if ns == Some(PASSWORD_KEY_ENCRYPTOR_NS.as_bytes()) {
                    if self.password.is_none() {
                        self.password = Some(parse_password_key_encryptor(e)?);
                    }
                } else if ns == Some(CERTIFICATE_KEY_ENCRYPTOR_NS.as_bytes()) {
                    log::debug!("skipping certificate key encryptor");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_password_key_encryptor(e: &BytesStart<'_>) -> Result<AgileVerifier, CryptError> {
    let attrs = ElementAttrs::collect("encryptedKey", e)?;
    let params = attrs.cipher_params()?;
    let spin_count = attrs.required_decimal("spinCount")?;
    if spin_count > MAX_SPIN_COUNT {
        return Err(CryptError::UnsupportedEncryption(format!(
            "encryptedKey.spinCount {spin_count} exceeds {MAX_SPIN_COUNT}"
        )));
    }

    let encrypted_verifier_hash_input = attrs.required_b64("encryptedVerifierHashInput")?;
    let encrypted_verifier_hash_value = attrs.required_b64("encryptedVerifierHashValue")?;
    let encrypted_key_value = attrs.required_b64("encryptedKeyValue")?;
    check_encrypted_field(
        &params,
        "encryptedKey.encryptedVerifierHashInput",
        &encrypted_verifier_hash_input,
        params.salt.len(),
    )?;
    check_encrypted_field(
        &params,
        "encryptedKey.encryptedVerifierHashValue",
        &encrypted_verifier_hash_value,
        params.hash.digest_len(),
    )?;
    check_encrypted_field(
        &params,
        "encryptedKey.encryptedKeyValue",
        &encrypted_key_value,
        params.key_len(),
    )?;

    Ok(AgileVerifier {
        params,
        spin_count,
        encrypted_verifier_hash_input,
        encrypted_verifier_hash_value,
        encrypted_key_value,
    })
}

/// Parse the XML that follows the version and flags fields.
///
/// A UTF-8 byte order mark and trailing NUL padding are tolerated.
pub(crate) fn parse_descriptor(payload: &[u8]) -> Result<(AgileHeader, AgileVerifier), CryptError> {
    let mut payload = payload.strip_prefix(UTF8_BOM).unwrap_or(payload);
    while let Some((&0, rest)) = payload.split_last() {
        payload = rest;
    }
    let xml = std::str::from_utf8(payload)
        .map_err(|_| CryptError::format("Agile EncryptionInfo XML is not valid UTF-8"))?;

    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut scope = NamespaceScope::default();
    let mut parts = DescriptorParts::default();
    loop {
        let event = reader.read_event().map_err(|err| {
            CryptError::format(format!("Agile EncryptionInfo XML parse error: {err}"))
        })?;
        match event {
            Event::Start(e) => {
                scope.enter(&e)?;
                parts.visit(&scope, &e)?;
            }
            Event::Empty(e) => {
                scope.enter(&e)?;
                parts.visit(&scope, &e)?;
                scope.leave();
            }
            Event::End(_) => scope.leave(),
            Event::Eof => break,
            _ => {}
        }
    }
    if scope.depth != 0 {
        return Err(CryptError::format(
            "Agile EncryptionInfo XML ends before the root element is closed",
        ));
    }

    let params = parts
        .key_data
        .ok_or_else(|| CryptError::format("missing <keyData> element"))?;
    let (encrypted_hmac_key, encrypted_hmac_value) = parts
        .integrity
        .ok_or_else(|| CryptError::format("missing <dataIntegrity> element"))?;
    let verifier = parts
        .password
        .ok_or_else(|| CryptError::format("missing password key encryptor"))?;

    check_encrypted_field(
        &params,
        "dataIntegrity.encryptedHmacKey",
        &encrypted_hmac_key,
        params.hash.digest_len(),
    )?;
    check_encrypted_field(
        &params,
        "dataIntegrity.encryptedHmacValue",
        &encrypted_hmac_value,
        params.hash.digest_len(),
    )?;

    Ok((
        AgileHeader {
            params,
            encrypted_hmac_key,
            encrypted_hmac_value,
        },
        verifier,
    ))
}

// ---------------------------------------------------------------------------------------------
// Descriptor writing
// ---------------------------------------------------------------------------------------------

fn xml_write_error(err: impl std::fmt::Display) -> CryptError {
    CryptError::format(format!("failed to write Agile EncryptionInfo XML: {err}"))
}

fn start_with<'a>(name: &'a str, attrs: &[(&'static str, String)]) -> BytesStart<'a> {
    BytesStart::new(name).with_attributes(attrs.iter().map(|(key, value)| (*key, value.as_str())))
}

pub(crate) fn write_descriptor(
    header: &AgileHeader,
    verifier: &AgileVerifier,
) -> Result<Vec<u8>, CryptError> {
    let mut writer = XmlWriter::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(xml_write_error)?;
    writer.get_mut().extend_from_slice(b"\r\n");

    let root = start_with(
        "encryption",
        &[
            ("xmlns", ENCRYPTION_NS.to_string()),
            ("xmlns:p", PASSWORD_KEY_ENCRYPTOR_NS.to_string()),
        ],
    );
    writer.write_event(Event::Start(root)).map_err(xml_write_error)?;

    writer
        .write_event(Event::Empty(start_with("keyData", &header.params.attributes())))
        .map_err(xml_write_error)?;

    let integrity = [
        ("encryptedHmacKey", encode_b64(&header.encrypted_hmac_key)),
        ("encryptedHmacValue", encode_b64(&header.encrypted_hmac_value)),
    ];
    writer
        .write_event(Event::Empty(start_with("dataIntegrity", &integrity)))
        .map_err(xml_write_error)?;

    writer
        .write_event(Event::Start(BytesStart::new("keyEncryptors")))
        .map_err(xml_write_error)?;
    writer
        .write_event(Event::Start(start_with(
            "keyEncryptor",
            &[("uri", PASSWORD_KEY_ENCRYPTOR_NS.to_string())],
        )))
        .map_err(xml_write_error)?;

    let mut key_attrs = vec![("spinCount", verifier.spin_count.to_string())];
    key_attrs.extend(verifier.params.attributes());
    key_attrs.extend([
        (
            "encryptedVerifierHashInput",
            encode_b64(&verifier.encrypted_verifier_hash_input),
        ),
        (
            "encryptedVerifierHashValue",
            encode_b64(&verifier.encrypted_verifier_hash_value),
        ),
        ("encryptedKeyValue", encode_b64(&verifier.encrypted_key_value)),
    ]);
    writer
        .write_event(Event::Empty(start_with("p:encryptedKey", &key_attrs)))
        .map_err(xml_write_error)?;

    for name in ["keyEncryptor", "keyEncryptors", "encryption"] {
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_write_error)?;
    }

    Ok(writer.into_inner())
}

// ---------------------------------------------------------------------------------------------
// Key handling
// ---------------------------------------------------------------------------------------------

/// Encrypt or decrypt one password-protected field of `<p:encryptedKey>`.
fn crypt_password_field(
    params: &CipherParams,
    pw_hash: &[u8],
    block_key: &[u8],
    data: &[u8],
    encrypt: bool,
) -> Result<Zeroizing<Vec<u8>>, CryptError> {
    let key = generate_key(pw_hash, block_key, params.hash, params.key_len());
    let iv = generate_iv(params.hash, &params.salt, None, params.block_size);
    if encrypt {
        let mut buf = Zeroizing::new(get_block0(
            data,
            round_up_to_block(data.len(), params.block_size),
        ));
        aes_encrypt_in_place(params.chaining, &key, &iv, &mut buf)?;
        Ok(buf)
    } else {
        let mut buf = Zeroizing::new(data.to_vec());
        aes_decrypt_in_place(params.chaining, &key, &iv, &mut buf)?;
        Ok(buf)
    }
}

/// Encrypt or decrypt one `<dataIntegrity>` field under the package key.
fn crypt_integrity_field(
    params: &CipherParams,
    secret_key: &[u8],
    block_key: &[u8],
    data: &[u8],
    encrypt: bool,
) -> Result<Zeroizing<Vec<u8>>, CryptError> {
    let iv = generate_iv(params.hash, &params.salt, Some(block_key), params.block_size);
    if encrypt {
        let mut buf = Zeroizing::new(get_block0(
            data,
            round_up_to_block(data.len(), params.block_size),
        ));
        aes_encrypt_in_place(params.chaining, secret_key, &iv, &mut buf)?;
        Ok(buf)
    } else {
        let mut buf = Zeroizing::new(data.to_vec());
        aes_decrypt_in_place(params.chaining, secret_key, &iv, &mut buf)?;
        Ok(buf)
    }
}

fn truncated(
    mut buf: Zeroizing<Vec<u8>>,
    len: usize,
    field: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptError> {
    if buf.len() < len {
        return Err(CryptError::format(format!(
            "decrypted {field} is {} bytes, expected at least {len}",
            buf.len()
        )));
    }
    buf.truncate(len);
    Ok(buf)
}

/// Check `password`, recovering the package key and the integrity HMAC key and value.
pub(crate) fn verify_password(
    header: &AgileHeader,
    verifier: &AgileVerifier,
    password: &str,
) -> Result<Option<AgileSecrets>, CryptError> {
    let params = &verifier.params;
    let password = password_to_utf16le(password, None);
    let pw_hash = hash_password(&password, &params.salt, params.hash, verifier.spin_count);

    let hash_input = crypt_password_field(
        params,
        &pw_hash,
        &VERIFIER_HASH_INPUT_BLOCK,
        &verifier.encrypted_verifier_hash_input,
        false,
    )?;
    let hash_value = crypt_password_field(
        params,
        &pw_hash,
        &VERIFIER_HASH_VALUE_BLOCK,
        &verifier.encrypted_verifier_hash_value,
        false,
    )?;
    let expected = params.hash.digest(&hash_input);
    let matches = hash_value
        .get(..params.hash.digest_len())
        .is_some_and(|actual| ct_eq(&expected, actual));
    if !matches {
        return Ok(None);
    }

    let key_value = crypt_password_field(
        params,
        &pw_hash,
        &KEY_VALUE_BLOCK,
        &verifier.encrypted_key_value,
        false,
    )?;
    let secret_key = truncated(key_value, header.params.key_len(), "encryptedKeyValue")?;

    let hash_len = header.params.hash.digest_len();
    let hmac_key = truncated(
        crypt_integrity_field(
            &header.params,
            &secret_key,
            &INTEGRITY_KEY_BLOCK,
            &header.encrypted_hmac_key,
            false,
        )?,
        hash_len,
        "encryptedHmacKey",
    )?;
    let hmac_value = truncated(
        crypt_integrity_field(
            &header.params,
            &secret_key,
            &INTEGRITY_VALUE_BLOCK,
            &header.encrypted_hmac_value,
            false,
        )?,
        hash_len,
        "encryptedHmacValue",
    )?;

    Ok(Some(AgileSecrets {
        secret_key,
        hmac_key,
        hmac_value,
    }))
}

/// Generate salts, package key and integrity key for `password`, and wrap them into a new
/// descriptor.
pub(crate) fn create<G: RngCore + CryptoRng>(
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
    chaining: ChainingMode,
    spin_count: u32,
    password: &str,
    rng: &mut G,
) -> Result<NewAgile, CryptError> {
    let block_size = cipher.block_size();
    let key_bits = cipher.default_key_bits();

    let mut key_data_salt = vec![0u8; block_size];
    rng.fill_bytes(&mut key_data_salt);
    let mut password_salt = vec![0u8; block_size];
    rng.fill_bytes(&mut password_salt);
    let mut verifier_input = Zeroizing::new(vec![0u8; block_size]);
    rng.fill_bytes(&mut verifier_input);
    let mut secret_key = Zeroizing::new(vec![0u8; (key_bits / 8) as usize]);
    rng.fill_bytes(&mut secret_key);
    let mut hmac_key = Zeroizing::new(vec![0u8; hash.digest_len()]);
    rng.fill_bytes(&mut hmac_key);

    let key_params = CipherParams {
        cipher,
        hash,
        key_bits,
        block_size,
        chaining,
        salt: key_data_salt,
    };
    let password_params = CipherParams {
        salt: password_salt,
        ..key_params.clone()
    };

    let password = password_to_utf16le(password, None);
    let pw_hash = hash_password(&password, &password_params.salt, hash, spin_count);
    let encrypted_verifier_hash_input = crypt_password_field(
        &password_params,
        &pw_hash,
        &VERIFIER_HASH_INPUT_BLOCK,
        &verifier_input,
        true,
    )?;
    let encrypted_verifier_hash_value = crypt_password_field(
        &password_params,
        &pw_hash,
        &VERIFIER_HASH_VALUE_BLOCK,
        &hash.digest(&verifier_input),
        true,
    )?;
    let encrypted_key_value = crypt_password_field(
        &password_params,
        &pw_hash,
        &KEY_VALUE_BLOCK,
        &secret_key,
        true,
    )?;
    let encrypted_hmac_key = crypt_integrity_field(
        &key_params,
        &secret_key,
        &INTEGRITY_KEY_BLOCK,
        &hmac_key,
        true,
    )?;

    Ok(NewAgile {
        header: AgileHeader {
            params: key_params,
            encrypted_hmac_key: encrypted_hmac_key.to_vec(),
            encrypted_hmac_value: Vec::new(),
        },
        verifier: AgileVerifier {
            params: password_params,
            spin_count,
            encrypted_verifier_hash_input: encrypted_verifier_hash_input.to_vec(),
            encrypted_verifier_hash_value: encrypted_verifier_hash_value.to_vec(),
            encrypted_key_value: encrypted_key_value.to_vec(),
        },
        secret_key,
        hmac_key,
    })
}

/// Store the encrypted HMAC of a finished `EncryptedPackage` stream in `header`.
pub(crate) fn seal_hmac_value(
    header: &mut AgileHeader,
    secret_key: &[u8],
    hmac: &[u8],
) -> Result<(), CryptError> {
    let encrypted = crypt_integrity_field(
        &header.params,
        secret_key,
        &INTEGRITY_VALUE_BLOCK,
        hmac,
        true,
    )?;
    header.encrypted_hmac_value = encrypted.to_vec();
    Ok(())
}
