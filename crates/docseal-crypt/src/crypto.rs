//! Password hashing, key expansion and AES block-mode helpers shared by all variants.

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, AsyncStreamCipher, BlockCipher,
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes192, Aes256};
use zeroize::Zeroizing;

use crate::algorithm::{ChainingMode, HashAlgorithm};
use crate::error::CryptError;

pub(crate) const AES_BLOCK_SIZE: usize = 16;

/// Iterated password hash (MS-OFFCRYPTO 2.3.4.7 / 2.3.4.11).
///
/// ```text
/// H = Hash(salt || password_utf16le)
/// for i in 0..spinCount:
///     H = Hash(LE32(i) || H)
/// ```
pub(crate) fn hash_password(
    password_utf16le: &[u8],
    salt: &[u8],
    hash_alg: HashAlgorithm,
    spin_count: u32,
) -> Zeroizing<Vec<u8>> {
    let mut h = Zeroizing::new(hash_alg.digest_parts(&[salt, password_utf16le]));
    for i in 0..spin_count {
        let next = Zeroizing::new(hash_alg.digest_parts(&[&i.to_le_bytes()[..], &h[..]]));
        h.copy_from_slice(&next);
    }
    h
}

/// `Hash(H || LE32(block))`.
pub(crate) fn block_hash(h: &[u8], block: u32, hash_alg: HashAlgorithm) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(hash_alg.digest_parts(&[h, &block.to_le_bytes()[..]]))
}

/// CryptoAPI `CryptDeriveKey` expansion of a hash value to `key_len` bytes.
pub(crate) fn crypt_derive_key(
    hash: &[u8],
    hash_alg: HashAlgorithm,
    key_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptError> {
    if hash.len() > 64 {
        return Err(CryptError::format(
            "hash value too long for CryptDeriveKey expansion",
        ));
    }
    let mut buf1 = Zeroizing::new([0x36u8; 64]);
    let mut buf2 = Zeroizing::new([0x5cu8; 64]);
    for (i, b) in hash.iter().enumerate() {
        buf1[i] ^= b;
        buf2[i] ^= b;
    }
    let mut out = Zeroizing::new(hash_alg.digest(&buf1[..]));
    out.extend_from_slice(&hash_alg.digest(&buf2[..]));
    if key_len > out.len() {
        return Err(CryptError::UnsupportedEncryption(format!(
            "key length {key_len} exceeds the {} bytes produced by {} key derivation",
            out.len(),
            hash_alg.xml_name()
        )));
    }
    out.truncate(key_len);
    Ok(out)
}

/// Resize `data` to `len`, padding with `0x36` when it is too short.
pub(crate) fn get_block36(data: &[u8], len: usize) -> Vec<u8> {
    resize_with(data, len, 0x36)
}

/// Resize `data` to `len`, padding with zeros when it is too short.
pub(crate) fn get_block0(data: &[u8], len: usize) -> Vec<u8> {
    resize_with(data, len, 0x00)
}

fn resize_with(data: &[u8], len: usize, fill: u8) -> Vec<u8> {
    let mut out = data[..data.len().min(len)].to_vec();
    out.resize(len, fill);
    out
}

/// Agile intermediate key: `getBlock36(Hash(pwHash || blockKey), key_len)`.
pub(crate) fn generate_key(
    pw_hash: &[u8],
    block_key: &[u8],
    hash_alg: HashAlgorithm,
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    let h = Zeroizing::new(hash_alg.digest_parts(&[pw_hash, block_key]));
    Zeroizing::new(get_block36(&h, key_len))
}

/// Agile IV: `getBlock36(salt)` or `getBlock36(Hash(salt || blockKey))`.
pub(crate) fn generate_iv(
    hash_alg: HashAlgorithm,
    salt: &[u8],
    block_key: Option<&[u8]>,
    block_size: usize,
) -> Vec<u8> {
    match block_key {
        Some(block_key) => get_block36(&hash_alg.digest_parts(&[salt, block_key]), block_size),
        None => get_block36(salt, block_size),
    }
}

pub(crate) fn round_up_to_block(len: usize, block_size: usize) -> usize {
    if block_size <= 1 {
        return len;
    }
    len.div_ceil(block_size) * block_size
}

fn invalid_key_len(len: usize) -> CryptError {
    CryptError::format(format!(
        "invalid AES key length {len}; expected 16, 24, or 32 bytes"
    ))
}

fn check_block_aligned(buf: &[u8]) -> Result<(), CryptError> {
    if buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptError::format(format!(
            "AES ciphertext length must be a multiple of {AES_BLOCK_SIZE} bytes, got {}",
            buf.len()
        )));
    }
    Ok(())
}

pub(crate) fn aes_ecb_encrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<(), CryptError> {
    check_block_aligned(buf)?;

    fn encrypt_with<C: BlockEncrypt + KeyInit>(key: &[u8], buf: &mut [u8]) -> Result<(), CryptError> {
        let cipher = C::new_from_slice(key).map_err(|_| invalid_key_len(key.len()))?;
        for block in buf.chunks_mut(AES_BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    match key.len() {
        16 => encrypt_with::<Aes128>(key, buf),
        24 => encrypt_with::<Aes192>(key, buf),
        32 => encrypt_with::<Aes256>(key, buf),
        other => Err(invalid_key_len(other)),
    }
}

pub(crate) fn aes_ecb_decrypt_in_place(key: &[u8], buf: &mut [u8]) -> Result<(), CryptError> {
    check_block_aligned(buf)?;

    fn decrypt_with<C: BlockDecrypt + KeyInit>(key: &[u8], buf: &mut [u8]) -> Result<(), CryptError> {
        let cipher = C::new_from_slice(key).map_err(|_| invalid_key_len(key.len()))?;
        for block in buf.chunks_mut(AES_BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    match key.len() {
        16 => decrypt_with::<Aes128>(key, buf),
        24 => decrypt_with::<Aes192>(key, buf),
        32 => decrypt_with::<Aes256>(key, buf),
        other => Err(invalid_key_len(other)),
    }
}

fn cbc_encrypt_with<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CryptError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptError::format("invalid AES-CBC key/IV length"))?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|_| CryptError::format("AES-CBC encryption failed"))?;
    Ok(())
}

fn cbc_decrypt_with<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CryptError>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptError::format("invalid AES-CBC key/IV length"))?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| CryptError::format("AES-CBC decryption failed"))?;
    Ok(())
}

fn cfb_encrypt_with<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CryptError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    cfb8::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptError::format("invalid AES-CFB key/IV length"))?
        .encrypt(buf);
    Ok(())
}

fn cfb_decrypt_with<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CryptError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    cfb8::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptError::format("invalid AES-CFB key/IV length"))?
        .decrypt(buf);
    Ok(())
}

/// Encrypt `buf` in place with AES in the given chaining mode. `iv` is ignored for ECB.
pub(crate) fn aes_encrypt_in_place(
    chaining: ChainingMode,
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> Result<(), CryptError> {
    match chaining {
        ChainingMode::Ecb => aes_ecb_encrypt_in_place(key, buf),
        ChainingMode::Cbc => {
            check_block_aligned(buf)?;
            match key.len() {
                16 => cbc_encrypt_with::<Aes128>(key, iv, buf),
                24 => cbc_encrypt_with::<Aes192>(key, iv, buf),
                32 => cbc_encrypt_with::<Aes256>(key, iv, buf),
                other => Err(invalid_key_len(other)),
            }
        }
        ChainingMode::Cfb => match key.len() {
            16 => cfb_encrypt_with::<Aes128>(key, iv, buf),
            24 => cfb_encrypt_with::<Aes192>(key, iv, buf),
            32 => cfb_encrypt_with::<Aes256>(key, iv, buf),
            other => Err(invalid_key_len(other)),
        },
    }
}

/// Decrypt `buf` in place with AES in the given chaining mode. `iv` is ignored for ECB.
pub(crate) fn aes_decrypt_in_place(
    chaining: ChainingMode,
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> Result<(), CryptError> {
    match chaining {
        ChainingMode::Ecb => aes_ecb_decrypt_in_place(key, buf),
        ChainingMode::Cbc => {
            check_block_aligned(buf)?;
            match key.len() {
                16 => cbc_decrypt_with::<Aes128>(key, iv, buf),
                24 => cbc_decrypt_with::<Aes192>(key, iv, buf),
                32 => cbc_decrypt_with::<Aes256>(key, iv, buf),
                other => Err(invalid_key_len(other)),
            }
        }
        ChainingMode::Cfb => match key.len() {
            16 => cfb_decrypt_with::<Aes128>(key, iv, buf),
            24 => cfb_decrypt_with::<Aes192>(key, iv, buf),
            32 => cfb_decrypt_with::<Aes256>(key, iv, buf),
            other => Err(invalid_key_len(other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_final_key_matches_known_vector() {
        // Deterministic vector for the ECMA-376 Standard derivation (SHA1, AES-128,
        // spinCount=50000, password "Password", salt 00..0f).
        let salt: Vec<u8> = (0u8..16).collect();
        let pw = crate::util::password_to_utf16le("Password", None);
        let h = hash_password(&pw, &salt, HashAlgorithm::Sha1, 50_000);
        let final_hash = block_hash(&h, 0, HashAlgorithm::Sha1);
        let key = crypt_derive_key(&final_hash, HashAlgorithm::Sha1, 16).unwrap();
        assert_eq!(
            key.as_slice(),
            hex::decode("1ba005261aaee4686a9939437075e6c4").unwrap()
        );
    }

    #[test]
    fn iterated_hash_vectors() {
        let salt: Vec<u8> = (0u8..16).collect();
        let pw = crate::util::password_to_utf16le("password", None);

        let h = hash_password(&pw, &salt, HashAlgorithm::Sha1, 50_000);
        assert_eq!(
            h.as_slice(),
            hex::decode("1b5972284eab6481eb6565a0985b334b3e65e041").unwrap()
        );
        assert_eq!(
            block_hash(&h, 1, HashAlgorithm::Sha1).as_slice(),
            hex::decode("2ed4e8825cd48aa4a47994cda7415b4a9687377d").unwrap()
        );

        let h = hash_password(&pw, &salt, HashAlgorithm::Md5, 50_000);
        assert_eq!(
            h.as_slice(),
            hex::decode("2079476089fda784c3a3cfeb98102c7e").unwrap()
        );
    }

    #[test]
    fn zero_spin_count_is_a_single_hash() {
        let h = hash_password(b"p\0w\0", b"salt", HashAlgorithm::Sha1, 0);
        assert_eq!(h.as_slice(), HashAlgorithm::Sha1.digest(b"saltp\0w\0"));
    }

    #[test]
    fn block_padding_helpers() {
        assert_eq!(get_block36(&[1, 2], 4), vec![1, 2, 0x36, 0x36]);
        assert_eq!(get_block0(&[1, 2], 3), vec![1, 2, 0]);
        assert_eq!(get_block36(&[1, 2, 3, 4, 5], 2), vec![1, 2]);
        assert_eq!(round_up_to_block(0, 16), 0);
        assert_eq!(round_up_to_block(17, 16), 32);
        assert_eq!(round_up_to_block(17, 1), 17);
    }

    #[test]
    fn aes_modes_round_trip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let plain: Vec<u8> = (0u8..48).collect();
        for chaining in [ChainingMode::Ecb, ChainingMode::Cbc, ChainingMode::Cfb] {
            let mut buf = plain.clone();
            aes_encrypt_in_place(chaining, &key, &iv, &mut buf).unwrap();
            assert_ne!(buf, plain);
            aes_decrypt_in_place(chaining, &key, &iv, &mut buf).unwrap();
            assert_eq!(buf, plain, "{chaining:?}");
        }
    }

    #[test]
    fn aes_128_ecb_fips197_vector() {
        let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let mut block = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        aes_ecb_encrypt_in_place(&key, &mut block).unwrap();
        assert_eq!(block, hex::decode("69c4e0d86a7b0430d8cdb78070b4c55a").unwrap());
    }

    #[test]
    fn cfb_accepts_unaligned_lengths_and_cbc_rejects_them() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut buf = vec![7u8; 21];
        aes_encrypt_in_place(ChainingMode::Cfb, &key, &iv, &mut buf).unwrap();
        assert!(matches!(
            aes_encrypt_in_place(ChainingMode::Cbc, &key, &iv, &mut buf),
            Err(CryptError::InvalidFormat(_))
        ));
        assert!(matches!(
            aes_ecb_decrypt_in_place(&[0u8; 15], &mut [0u8; 16]),
            Err(CryptError::InvalidFormat(_))
        ));
    }
}
