use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use subtle::ConstantTimeEq as _;
use zeroize::Zeroizing;

use crate::error::CryptError;

/// Passwords longer than this (in UTF-16 code units) are truncated by the binary variants.
pub(crate) const MAX_LEGACY_PASSWORD_LEN: usize = 255;

/// Little-endian cursor over an in-memory record.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub(crate) fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], CryptError> {
        let end = self.pos.saturating_add(n);
        if end > self.bytes.len() {
            return Err(CryptError::format(format!(
                "truncated data while reading {context}"
            )));
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn take_array<const N: usize>(
        &mut self,
        context: &'static str,
    ) -> Result<[u8; N], CryptError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    pub(crate) fn read_u16_le(&mut self, context: &'static str) -> Result<u16, CryptError> {
        Ok(u16::from_le_bytes(self.take_array(context)?))
    }

    pub(crate) fn read_u32_le(&mut self, context: &'static str) -> Result<u32, CryptError> {
        Ok(u32::from_le_bytes(self.take_array(context)?))
    }

    pub(crate) fn peek_u32_le(&self) -> Option<u32> {
        let b = self.bytes.get(self.pos..self.pos.checked_add(4)?)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Encode a password as UTF-16LE, optionally truncated to `max_units` code units.
pub(crate) fn password_to_utf16le(password: &str, max_units: Option<usize>) -> Zeroizing<Vec<u8>> {
    let limit = max_units.unwrap_or(usize::MAX);
    let mut out = Zeroizing::new(Vec::with_capacity(password.len() * 2));
    for unit in password.encode_utf16().take(limit) {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

pub(crate) fn encode_utf16le_nul_terminated(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((value.len() + 1) * 2);
    for unit in value.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// Decode a base64 attribute value.
///
/// Pretty-printed descriptors may wrap long values and some producers omit `=` padding, so
/// whitespace is dropped and both padded and unpadded forms are accepted.
pub(crate) fn decode_b64_attr(value: &str) -> Result<Vec<u8>, CryptError> {
    let cleaned: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(cleaned.as_bytes()))
        .map_err(|err| CryptError::format(format!("invalid base64 value: {err}")))
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Constant-time equality for verifier and HMAC digests.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Compare the first `significant` bytes of a decrypted verifier hash with the computed digest.
///
/// A zero `significant` never matches.
pub(crate) fn verifier_hash_matches(expected: &[u8], decrypted: &[u8], significant: usize) -> bool {
    match (expected.get(..significant), decrypted.get(..significant)) {
        (Some(expected), Some(decrypted)) if significant > 0 => ct_eq(expected, decrypted),
        _ => false,
    }
}

/// Convert a declared plaintext size into an in-memory length.
pub(crate) fn checked_vec_len(total_size: u64) -> Result<usize, CryptError> {
    usize::try_from(total_size)
        .ok()
        .filter(|len| isize::try_from(*len).is_ok())
        .ok_or(CryptError::EncryptedPackageSizeOverflow { total_size })
}
