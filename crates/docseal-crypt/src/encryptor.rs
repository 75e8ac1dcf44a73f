use std::fmt;
use std::io::{Cursor, Read, Seek, Write};

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::agile;
use crate::algorithm::{ChainingMode, HmacState};
use crate::binary_rc4::BinaryRc4Verifier;
use crate::builder::EncryptionParams;
use crate::chunk::PackageKey;
use crate::cryptoapi;
use crate::error::CryptError;
use crate::info::{EncryptionInfo, EncryptionMode, EncryptionVariant};
use crate::standard::{self, StandardHeader};
use crate::stream::{from_io_error, EncryptWriter};

struct AgileIntegrity {
    secret_key: Zeroizing<Vec<u8>>,
    hmac_key: Zeroizing<Vec<u8>>,
    sealed: bool,
}

struct Confirmed {
    info: EncryptionInfo,
    key: PackageKey,
    integrity: Option<AgileIntegrity>,
}

/// Encrypts packages under a new password.
///
/// Created by [`crate::EncryptionInfoBuilder::build`]. Call [`Encryptor::confirm_password`]
/// first; it generates fresh salts and keys every time it runs.
pub struct Encryptor {
    params: EncryptionParams,
    confirmed: Option<Confirmed>,
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("params", &self.params)
            .field("confirmed", &self.confirmed.is_some())
            .finish()
    }
}

impl Encryptor {
    pub(crate) fn new(params: EncryptionParams) -> Self {
        Self {
            params,
            confirmed: None,
        }
    }

    pub fn mode(&self) -> EncryptionMode {
        self.params.mode
    }

    /// Derive keys for `password` using the operating system RNG.
    pub fn confirm_password(&mut self, password: &str) -> Result<(), CryptError> {
        self.confirm_password_with_rng(password, &mut OsRng)
    }

    /// Derive keys for `password`, drawing salts, verifier and package key from `rng`.
    pub fn confirm_password_with_rng<G: RngCore + CryptoRng>(
        &mut self,
        password: &str,
        rng: &mut G,
    ) -> Result<(), CryptError> {
        let p = &self.params;
        let mut salt = [0u8; 16];
        let mut verifier = Zeroizing::new([0u8; 16]);

        let confirmed = match p.mode {
            EncryptionMode::BinaryRc4 => {
                rng.fill_bytes(&mut salt);
                rng.fill_bytes(&mut verifier[..]);
                let (verifier, base_key) = BinaryRc4Verifier::create(password, salt, *verifier);
                Confirmed {
                    info: EncryptionInfo::from_variant(EncryptionVariant::BinaryRc4(verifier)),
                    key: PackageKey::BinaryRc4 { base_key },
                    integrity: None,
                }
            }
            EncryptionMode::CryptoApi => {
                rng.fill_bytes(&mut salt);
                rng.fill_bytes(&mut verifier[..]);
                let header =
                    StandardHeader::new(p.mode.flags(), p.cipher, p.hash, p.key_bits);
                let password_hash = cryptoapi::password_hash(password, &salt, p.hash);
                let verifier =
                    cryptoapi::create_verifier(&header, &password_hash, salt, *verifier)?;
                Confirmed {
                    info: EncryptionInfo::from_variant(EncryptionVariant::CryptoApi {
                        header,
                        verifier,
                    }),
                    key: PackageKey::CryptoApi {
                        hash: p.hash,
                        password_hash,
                        key_bits: p.key_bits,
                    },
                    integrity: None,
                }
            }
            EncryptionMode::Standard => {
                rng.fill_bytes(&mut salt);
                rng.fill_bytes(&mut verifier[..]);
                let header =
                    StandardHeader::new(p.mode.flags(), p.cipher, p.hash, p.key_bits);
                let key = standard::derive_key(&header, &salt, password)?;
                let verifier = standard::create_verifier(&header, &key, salt, *verifier)?;
                Confirmed {
                    info: EncryptionInfo::from_variant(EncryptionVariant::Standard {
                        header,
                        verifier,
                    }),
                    key: PackageKey::Standard { key },
                    integrity: None,
                }
            }
            EncryptionMode::Agile => {
                let chaining = p.chaining.unwrap_or(ChainingMode::Cbc);
                let created =
                    agile::create(p.cipher, p.hash, chaining, p.spin_count, password, rng)?;
                let key = PackageKey::Agile {
                    key: created.secret_key.clone(),
                    hash: p.hash,
                    chaining,
                    key_data_salt: created.header.key_data_salt().to_vec(),
                    block_size: created.header.block_size(),
                };
                Confirmed {
                    info: EncryptionInfo::from_variant(EncryptionVariant::Agile {
                        header: created.header,
                        verifier: created.verifier,
                    }),
                    key,
                    integrity: Some(AgileIntegrity {
                        secret_key: created.secret_key,
                        hmac_key: created.hmac_key,
                        sealed: false,
                    }),
                }
            }
        };

        self.confirmed = Some(confirmed);
        Ok(())
    }

    pub(crate) fn package_key(&self) -> Result<&PackageKey, CryptError> {
        self.confirmed
            .as_ref()
            .map(|confirmed| &confirmed.key)
            .ok_or(CryptError::InvalidState("password has not been confirmed"))
    }

    /// Start an HMAC keyed with the Agile integrity key, or `None` for the other modes.
    pub(crate) fn integrity_hmac(&self) -> Result<Option<HmacState>, CryptError> {
        match self.confirmed.as_ref().and_then(|c| c.integrity.as_ref()) {
            Some(integrity) => Ok(Some(self.params.hash.hmac(&integrity.hmac_key)?)),
            None => Ok(None),
        }
    }

    /// Encrypt the HMAC of a finished package into the descriptor.
    pub(crate) fn seal_integrity(&mut self, hmac: &[u8]) -> Result<(), CryptError> {
        let confirmed = self
            .confirmed
            .as_mut()
            .ok_or(CryptError::InvalidState("password has not been confirmed"))?;
        let (Some(integrity), EncryptionVariant::Agile { header, .. }) =
            (confirmed.integrity.as_mut(), confirmed.info.variant_mut())
        else {
            return Ok(());
        };
        agile::seal_hmac_value(header, &integrity.secret_key, hmac)?;
        integrity.sealed = true;
        Ok(())
    }

    /// Start writing an `EncryptedPackage` stream into `inner` at its current position.
    pub fn data_stream<W: Read + Write + Seek>(
        &mut self,
        inner: W,
    ) -> Result<EncryptWriter<'_, W>, CryptError> {
        EncryptWriter::new(inner, self)
    }

    /// Encrypt a whole package into `EncryptedPackage` stream bytes.
    pub fn encrypt_package(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        let mut writer = self.data_stream(Cursor::new(Vec::new()))?;
        writer.write_all(plaintext).map_err(from_io_error)?;
        Ok(writer.finish()?.into_inner())
    }

    /// The `EncryptionInfo` describing the confirmed password.
    ///
    /// In Agile mode the descriptor carries the package HMAC, so it is only available after a
    /// data stream has been finished.
    pub fn encryption_info(&self) -> Result<EncryptionInfo, CryptError> {
        let confirmed = self
            .confirmed
            .as_ref()
            .ok_or(CryptError::InvalidState("password has not been confirmed"))?;
        if confirmed.integrity.as_ref().is_some_and(|i| !i.sealed) {
            return Err(CryptError::InvalidState(
                "Agile EncryptionInfo is complete only after the data stream is finished",
            ));
        }
        Ok(confirmed.info.clone())
    }
}
