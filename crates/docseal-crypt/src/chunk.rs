use std::fmt;

use zeroize::Zeroizing;

use crate::algorithm::{ChainingMode, HashAlgorithm};
use crate::crypto::{
    aes_decrypt_in_place, aes_ecb_decrypt_in_place, aes_ecb_encrypt_in_place,
    aes_encrypt_in_place, generate_iv, AES_BLOCK_SIZE,
};
use crate::error::CryptError;
use crate::rc4::Rc4;
use crate::{binary_rc4, cryptoapi};

/// RC4 variants re-key every 512 bytes.
pub(crate) const RC4_CHUNK_SIZE: usize = 512;
/// AES variants process the package in 4096-byte segments.
pub(crate) const AES_CHUNK_SIZE: usize = 4096;

/// Package key material for one verified password, able to en/decrypt any chunk by index.
pub(crate) enum PackageKey {
    BinaryRc4 {
        base_key: Zeroizing<Vec<u8>>,
    },
    CryptoApi {
        hash: HashAlgorithm,
        password_hash: Zeroizing<Vec<u8>>,
        key_bits: u32,
    },
    Standard {
        key: Zeroizing<Vec<u8>>,
    },
    Agile {
        key: Zeroizing<Vec<u8>>,
        hash: HashAlgorithm,
        chaining: ChainingMode,
        key_data_salt: Vec<u8>,
        block_size: usize,
    },
}

impl fmt::Debug for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            PackageKey::BinaryRc4 { .. } => "BinaryRc4",
            PackageKey::CryptoApi { .. } => "CryptoApi",
            PackageKey::Standard { .. } => "Standard",
            PackageKey::Agile { .. } => "Agile",
        };
        f.debug_tuple("PackageKey").field(&kind).finish()
    }
}

impl PackageKey {
    pub(crate) fn chunk_size(&self) -> usize {
        match self {
            PackageKey::BinaryRc4 { .. } | PackageKey::CryptoApi { .. } => RC4_CHUNK_SIZE,
            PackageKey::Standard { .. } | PackageKey::Agile { .. } => AES_CHUNK_SIZE,
        }
    }

    /// Ciphertext granularity. The final chunk is padded up to a multiple of this.
    pub(crate) fn block_size(&self) -> usize {
        match self {
            PackageKey::BinaryRc4 { .. } | PackageKey::CryptoApi { .. } => 1,
            PackageKey::Standard { .. } => AES_BLOCK_SIZE,
            PackageKey::Agile { block_size, .. } => *block_size,
        }
    }

    fn rc4_for_chunk(&self, index: u32) -> Result<Option<Rc4>, CryptError> {
        Ok(match self {
            PackageKey::BinaryRc4 { base_key } => {
                Some(Rc4::new(&binary_rc4::block_key(base_key, index)))
            }
            PackageKey::CryptoApi {
                hash,
                password_hash,
                key_bits,
            } => Some(Rc4::new(&cryptoapi::block_key(
                password_hash,
                index,
                *hash,
                *key_bits,
            )?)),
            _ => None,
        })
    }

    fn agile_iv(hash: HashAlgorithm, salt: &[u8], index: u32, block_size: usize) -> Vec<u8> {
        generate_iv(hash, salt, Some(&index.to_le_bytes()), block_size)
    }

    pub(crate) fn encrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<(), CryptError> {
        if let Some(mut rc4) = self.rc4_for_chunk(index)? {
            rc4.apply_keystream(buf);
            return Ok(());
        }
        match self {
            PackageKey::Standard { key } => aes_ecb_encrypt_in_place(key, buf),
            PackageKey::Agile {
                key,
                hash,
                chaining,
                key_data_salt,
                block_size,
            } => {
                let iv = Self::agile_iv(*hash, key_data_salt, index, *block_size);
                aes_encrypt_in_place(*chaining, key, &iv, buf)
            }
            PackageKey::BinaryRc4 { .. } | PackageKey::CryptoApi { .. } => Ok(()),
        }
    }

    pub(crate) fn decrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<(), CryptError> {
        if let Some(mut rc4) = self.rc4_for_chunk(index)? {
            rc4.apply_keystream(buf);
            return Ok(());
        }
        match self {
            PackageKey::Standard { key } => aes_ecb_decrypt_in_place(key, buf),
            PackageKey::Agile {
                key,
                hash,
                chaining,
                key_data_salt,
                block_size,
            } => {
                let iv = Self::agile_iv(*hash, key_data_salt, index, *block_size);
                aes_decrypt_in_place(*chaining, key, &iv, buf)
            }
            PackageKey::BinaryRc4 { .. } | PackageKey::CryptoApi { .. } => Ok(()),
        }
    }
}
