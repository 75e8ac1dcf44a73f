//! CryptoAPI RC4 encryption (`EncryptionInfo` versions 2.2/3.2/4.2 with an RC4 `algId`).
//!
//! Keys are re-derived for every 512-byte block from `H0 = Hash(salt || password)`:
//!
//! ```text
//! key(b) = Hash(H0 || LE32(b))[..keyBits/8]
//! ```
//!
//! A 40-bit key is zero-extended to 16 bytes before it is handed to RC4, which is what Office
//! does when it reads these files.

use zeroize::Zeroizing;

use crate::algorithm::HashAlgorithm;
use crate::crypto::{block_hash, get_block0, hash_password};
use crate::error::CryptError;
use crate::rc4::Rc4;
use crate::standard::{encrypted_verifier_hash_len, StandardHeader, StandardVerifier};
use crate::util::{password_to_utf16le, verifier_hash_matches, MAX_LEGACY_PASSWORD_LEN};

/// The CryptoAPI password hash is not iterated.
pub const CRYPTOAPI_SPIN_COUNT: u32 = 0;

pub(crate) fn password_hash(
    password: &str,
    salt: &[u8],
    hash_alg: HashAlgorithm,
) -> Zeroizing<Vec<u8>> {
    let password = password_to_utf16le(password, Some(MAX_LEGACY_PASSWORD_LEN));
    hash_password(&password, salt, hash_alg, CRYPTOAPI_SPIN_COUNT)
}

pub(crate) fn block_key(
    h0: &[u8],
    block: u32,
    hash_alg: HashAlgorithm,
    key_bits: u32,
) -> Result<Zeroizing<Vec<u8>>, CryptError> {
    let key_len = (key_bits / 8) as usize;
    let mut key = block_hash(h0, block, hash_alg);
    if key_len == 0 || key_len > key.len() {
        return Err(CryptError::UnsupportedEncryption(format!(
            "RC4 key size {key_bits} bits cannot be derived from {}",
            hash_alg.xml_name()
        )));
    }
    key.truncate(key_len);
    if key_bits == 40 {
        key.resize(16, 0);
    }
    Ok(key)
}

/// Check `password` against the verifier, returning `H0` when it matches.
pub(crate) fn verify_password(
    header: &StandardHeader,
    verifier: &StandardVerifier,
    password: &str,
) -> Result<Option<Zeroizing<Vec<u8>>>, CryptError> {
    let hash_alg = header.hash_algorithm();
    let h0 = password_hash(password, verifier.salt(), hash_alg);
    let key = block_key(&h0, 0, hash_alg, header.key_bits())?;
    let mut rc4 = Rc4::new(&key);

    // Verifier and verifier hash share one keystream.
    let mut decrypted_verifier = Zeroizing::new(*verifier.encrypted_verifier());
    rc4.apply_keystream(&mut decrypted_verifier[..]);
    let mut decrypted_hash = Zeroizing::new(verifier.encrypted_verifier_hash().to_vec());
    rc4.apply_keystream(&mut decrypted_hash);

    let expected = hash_alg.digest(&decrypted_verifier[..]);
    let matches = verifier_hash_matches(
        &expected,
        &decrypted_hash,
        verifier.verifier_hash_size() as usize,
    );
    Ok(matches.then_some(h0))
}

/// Build a verifier for `h0` whose plaintext is `verifier`.
pub(crate) fn create_verifier(
    header: &StandardHeader,
    h0: &[u8],
    salt: [u8; 16],
    verifier: [u8; 16],
) -> Result<StandardVerifier, CryptError> {
    let hash_alg = header.hash_algorithm();
    let key = block_key(h0, 0, hash_alg, header.key_bits())?;
    let mut rc4 = Rc4::new(&key);

    let mut encrypted_verifier = verifier;
    rc4.apply_keystream(&mut encrypted_verifier);

    let verifier_hash = hash_alg.digest(&verifier);
    let mut encrypted_verifier_hash = get_block0(
        &verifier_hash,
        encrypted_verifier_hash_len(header.cipher_algorithm()),
    );
    rc4.apply_keystream(&mut encrypted_verifier_hash);

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
    use crate::algorithm::CipherAlgorithm;
    use crate::standard::FLAG_CRYPTOAPI;

    #[test]
    fn forty_bit_keys_are_zero_extended() {
        let h0 = password_hash("password", &[0u8; 16], HashAlgorithm::Sha1);
        let key = block_key(&h0, 0, HashAlgorithm::Sha1, 40).unwrap();
        assert_eq!(key.len(), 16);
        assert!(key[5..].iter().all(|b| *b == 0));

        let key = block_key(&h0, 0, HashAlgorithm::Sha1, 128).unwrap();
        assert_eq!(
            key.as_slice(),
            &block_hash(&h0, 0, HashAlgorithm::Sha1)[..16]
        );
    }

    #[test]
    fn oversized_keys_are_rejected() {
        let h0 = password_hash("password", &[0u8; 16], HashAlgorithm::Md5);
        assert!(matches!(
            block_key(&h0, 0, HashAlgorithm::Md5, 168),
            Err(CryptError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn created_verifier_accepts_only_its_password() {
        for (hash_alg, key_bits) in [(HashAlgorithm::Sha1, 128), (HashAlgorithm::Md5, 40)] {
            let header =
                StandardHeader::new(FLAG_CRYPTOAPI, CipherAlgorithm::Rc4, hash_alg, key_bits);
            let salt = [0x42u8; 16];
            let h0 = password_hash("hunter2", &salt, hash_alg);
            let verifier = create_verifier(&header, &h0, salt, [7u8; 16]).unwrap();
            assert_eq!(verifier.encrypted_verifier_hash().len(), 20);

            let verified = verify_password(&header, &verifier, "hunter2").unwrap();
            assert_eq!(verified.as_ref().map(|h| h.as_slice()), Some(h0.as_slice()));
            assert!(verify_password(&header, &verifier, "hunter3")
                .unwrap()
                .is_none());
        }
    }
}
