//! Decryption of streams produced outside this crate.
//!
//! The `fixtures/*.bin` files were generated with an independent implementation; the Standard
//! case below is assembled here from the `aes` and `sha1` primitives directly.

use std::io::Read;

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use sha1::{Digest as _, Sha1};

use docseal_crypt::{
    CryptError, EncryptionInfo, EncryptionMode, EncryptionVariant, HashAlgorithm,
};

const PASSWORD: &str = "Password1234_";

fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read(&path).unwrap_or_else(|err| panic!("read {path}: {err}"))
}

fn rc4_plaintext() -> Vec<u8> {
    (0..600u32).map(|i| (i * 7 + 3) as u8).collect()
}

fn agile_plaintext() -> Vec<u8> {
    (0..5000u32).map(|i| (i * 13 + 5) as u8).collect()
}

fn decrypt(info: &[u8], package: &[u8], password: &str) -> Result<Vec<u8>, CryptError> {
    let info = EncryptionInfo::parse(info)?;
    let mut decryptor = info.decryptor();
    if !decryptor.verify_password(password)? {
        return Err(CryptError::InvalidPassword);
    }
    decryptor.decrypt_package(package)
}

#[test]
fn binary_rc4_fixture_decrypts() {
    let info = fixture("binary_rc4_info.bin");
    let package = fixture("binary_rc4_package.bin");

    let parsed = EncryptionInfo::parse(&info).expect("parse");
    assert_eq!(parsed.mode(), EncryptionMode::BinaryRc4);
    assert_eq!((parsed.version_major(), parsed.version_minor()), (1, 1));
    assert_eq!(parsed.to_bytes().expect("serialize"), info);

    assert_eq!(decrypt(&info, &package, PASSWORD).expect("decrypt"), rc4_plaintext());
    assert!(matches!(
        decrypt(&info, &package, "password1234_"),
        Err(CryptError::InvalidPassword)
    ));
}

#[test]
fn cryptoapi_40_bit_fixture_decrypts() {
    let info = fixture("cryptoapi_rc4_40_info.bin");
    let package = fixture("cryptoapi_rc4_40_package.bin");

    let parsed = EncryptionInfo::parse(&info).expect("parse");
    assert_eq!(parsed.mode(), EncryptionMode::CryptoApi);
    assert_eq!(parsed.key_bits(), 40);
    assert_eq!(parsed.hash_algorithm(), HashAlgorithm::Sha1);
    match parsed.variant() {
        EncryptionVariant::CryptoApi { header, verifier } => {
            assert_eq!(
                header.csp_name(),
                Some("Microsoft Enhanced Cryptographic Provider v1.0")
            );
            assert_eq!(header.provider_type(), 1);
            assert_eq!(verifier.verifier_hash_size(), 20);
            assert_eq!(verifier.encrypted_verifier_hash().len(), 20);
        }
        other => panic!("unexpected variant {other:?}"),
    }
    assert_eq!(parsed.to_bytes().expect("serialize"), info);

    assert_eq!(decrypt(&info, &package, PASSWORD).expect("decrypt"), rc4_plaintext());
}

#[test]
fn cryptoapi_fixture_streams_across_rekey_boundary() {
    let info = EncryptionInfo::parse(&fixture("cryptoapi_rc4_40_info.bin")).expect("parse");
    let package = fixture("cryptoapi_rc4_40_package.bin");
    let mut decryptor = info.decryptor();
    assert!(decryptor.verify_password(PASSWORD).expect("verify"));

    let mut reader = decryptor.data_stream(&package[..]).expect("reader");
    assert_eq!(reader.stream_size(), 600);
    let mut first = vec![0u8; 500];
    reader.read_exact(&mut first).expect("first part");
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).expect("rest");
    first.extend_from_slice(&rest);
    assert_eq!(first, rc4_plaintext());
}

#[test]
fn agile_fixture_decrypts_and_checks_integrity() {
    let info = fixture("agile_sha512_info.bin");
    let package = fixture("agile_sha512_package.bin");

    let parsed = EncryptionInfo::parse(&info).expect("parse");
    assert_eq!(parsed.mode(), EncryptionMode::Agile);
    assert_eq!(parsed.key_bits(), 256);
    assert_eq!(parsed.spin_count(), 100);

    let mut decryptor = parsed.decryptor();
    assert!(decryptor.verify_password(PASSWORD).expect("verify"));
    assert!(decryptor.verify_integrity(&package[..]).expect("integrity"));
    assert_eq!(decryptor.decrypt_package(&package).expect("decrypt"), agile_plaintext());

    let mut tampered = package.clone();
    tampered[100] ^= 0x01;
    assert!(!decryptor.verify_integrity(&tampered[..]).expect("integrity"));
    assert!(matches!(
        decryptor.decrypt_package(&tampered),
        Err(CryptError::IntegrityCheckFailed)
    ));

    // The HMAC covers the size prefix as well.
    let mut resized = package.clone();
    resized[0] ^= 0x01;
    assert!(matches!(
        decryptor.decrypt_package(&resized),
        Err(CryptError::IntegrityCheckFailed)
    ));
}

#[test]
fn agile_fixture_reserializes_equivalently() {
    let parsed = EncryptionInfo::parse(&fixture("agile_sha512_info.bin")).expect("parse");
    let reparsed = EncryptionInfo::parse(&parsed.to_bytes().expect("serialize")).expect("reparse");
    assert_eq!(reparsed, parsed);
}

const STANDARD_CSP: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";

fn standard_key(password: &str, salt: &[u8]) -> [u8; 16] {
    let password: Vec<u8> = password
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    let mut h = Sha1::new().chain_update(salt).chain_update(&password).finalize();
    for i in 0..50_000u32 {
        h = Sha1::new().chain_update(i.to_le_bytes()).chain_update(h).finalize();
    }
    let h_final = Sha1::new().chain_update(h).chain_update(0u32.to_le_bytes()).finalize();

    let mut buf = [0x36u8; 64];
    for (b, x) in buf.iter_mut().zip(h_final.iter()) {
        *b ^= x;
    }
    let x1 = Sha1::digest(buf);
    let mut key = [0u8; 16];
    key.copy_from_slice(&x1[..16]);
    key
}

fn aes_ecb(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % 16, 0);
    let cipher = Aes128::new_from_slice(key).expect("valid AES key");
    let mut buf = data.to_vec();
    for block in buf.chunks_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    buf
}

fn standard_encryption_info(key: &[u8; 16], salt: &[u8; 16], verifier: &[u8; 16]) -> Vec<u8> {
    standard_encryption_info_with(key, salt, verifier, 0, 20)
}

fn standard_encryption_info_with(
    key: &[u8; 16],
    salt: &[u8; 16],
    verifier: &[u8; 16],
    csp_padding: usize,
    verifier_hash_size: u32,
) -> Vec<u8> {
    let mut csp: Vec<u8> = STANDARD_CSP
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    csp.extend_from_slice(&[0, 0]);
    csp.resize(csp.len() + csp_padding, 0);

    let mut header = Vec::new();
    for field in [0x24u32, 0, 0x660E, 0x8004, 128, 0x18, 0, 0] {
        header.extend_from_slice(&field.to_le_bytes());
    }
    header.extend_from_slice(&csp);

    let mut verifier_hash = Sha1::digest(verifier).to_vec();
    verifier_hash.resize(32, 0);

    let mut out = Vec::new();
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0x24u32.to_le_bytes());
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(salt);
    out.extend_from_slice(&aes_ecb(key, verifier));
    out.extend_from_slice(&verifier_hash_size.to_le_bytes());
    out.extend_from_slice(&aes_ecb(key, &verifier_hash));
    out
}

#[test]
fn standard_hello_world_decrypts() {
    let salt: [u8; 16] = core::array::from_fn(|i| i as u8);
    let verifier: [u8; 16] = core::array::from_fn(|i| 0xF0 - i as u8);
    let key = standard_key(PASSWORD, &salt);
    let info = standard_encryption_info(&key, &salt, &verifier);

    let block = *b"hello world\0\0\0\0\0";
    let mut package = 11u64.to_le_bytes().to_vec();
    package.extend_from_slice(&aes_ecb(&key, &block));
    // OLE streams are often followed by slack; it must be ignored.
    package.extend_from_slice(&[0xEE; 100]);

    let parsed = EncryptionInfo::parse(&info).expect("parse");
    assert_eq!(parsed.mode(), EncryptionMode::Standard);
    assert_eq!(parsed.flags(), 0x24);
    assert_eq!(parsed.key_bits(), 128);
    match parsed.variant() {
        EncryptionVariant::Standard { header, .. } => {
            assert_eq!(header.csp_name(), Some(STANDARD_CSP));
        }
        other => panic!("unexpected variant {other:?}"),
    }
    assert_eq!(parsed.to_bytes().expect("serialize"), info);

    let mut decryptor = parsed.decryptor();
    assert!(decryptor.verify_password(PASSWORD).expect("verify"));
    let mut reader = decryptor.data_stream(&package[..]).expect("reader");
    assert_eq!(reader.stream_size(), 11);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).expect("read");
    assert_eq!(out, b"hello world");

    assert!(!decryptor.verify_password("wrong").expect("verify"));
    assert!(matches!(
        decryptor.decrypt_package(&package),
        Err(CryptError::InvalidState(_))
    ));
}

fn standard_case(csp_padding: usize, verifier_hash_size: u32) -> (Vec<u8>, Vec<u8>) {
    let salt: [u8; 16] = core::array::from_fn(|i| 0x40 + i as u8);
    let verifier: [u8; 16] = core::array::from_fn(|i| 3 * i as u8);
    let key = standard_key(PASSWORD, &salt);
    let info = standard_encryption_info_with(&key, &salt, &verifier, csp_padding, verifier_hash_size);

    let mut package = 11u64.to_le_bytes().to_vec();
    package.extend_from_slice(&aes_ecb(&key, b"hello world\0\0\0\0\0"));
    (info, package)
}

#[test]
fn standard_padded_csp_name_decrypts() {
    let (info, package) = standard_case(6, 20);
    let parsed = EncryptionInfo::parse(&info).expect("parse");
    match parsed.variant() {
        EncryptionVariant::Standard { header, verifier } => {
            assert_eq!(header.csp_name(), Some(STANDARD_CSP));
            assert_eq!(verifier.verifier_hash_size(), 20);
        }
        other => panic!("unexpected variant {other:?}"),
    }
    assert_eq!(decrypt(&info, &package, PASSWORD).expect("decrypt"), b"hello world");

    // Padding is not preserved; the rewritten header is the unpadded one.
    let rewritten = parsed.to_bytes().expect("serialize");
    assert_eq!(rewritten.len(), info.len() - 6);
    assert_eq!(EncryptionInfo::parse(&rewritten).expect("reparse"), parsed);
}

#[test]
fn standard_verifier_checks_only_declared_hash_bytes() {
    // Garbling the second AES block leaves the first 16 decrypted hash bytes intact.
    let (mut info, package) = standard_case(0, 16);
    let len = info.len();
    info[len - 16..].fill(0xA5);
    assert_eq!(decrypt(&info, &package, PASSWORD).expect("decrypt"), b"hello world");
    assert!(matches!(
        decrypt(&info, &package, "Password1234"),
        Err(CryptError::InvalidPassword)
    ));

    let (mut info, package) = standard_case(0, 20);
    let len = info.len();
    info[len - 16..].fill(0xA5);
    assert!(matches!(
        decrypt(&info, &package, PASSWORD),
        Err(CryptError::InvalidPassword)
    ));
}

#[test]
fn cryptoapi_verifier_checks_only_declared_hash_bytes() {
    let package = fixture("cryptoapi_rc4_40_package.bin");
    let mut info = fixture("cryptoapi_rc4_40_info.bin");
    let len = info.len();
    assert_eq!(&info[len - 24..len - 20], &20u32.to_le_bytes());
    // RC4 flips exactly the matching plaintext byte, here the last hash byte.
    info[len - 1] ^= 0xFF;
    assert!(matches!(
        decrypt(&info, &package, PASSWORD),
        Err(CryptError::InvalidPassword)
    ));

    info[len - 24..len - 20].copy_from_slice(&16u32.to_le_bytes());
    assert_eq!(decrypt(&info, &package, PASSWORD).expect("decrypt"), rc4_plaintext());
}
