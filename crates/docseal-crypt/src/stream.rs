//! `EncryptedPackage` framing: an 8-byte little-endian plaintext size followed by the
//! chunk-encrypted payload.

use std::io::{self, Read, Seek, SeekFrom, Write};

use zeroize::Zeroizing;

use crate::chunk::PackageKey;
use crate::crypto::round_up_to_block;
use crate::encryptor::Encryptor;
use crate::error::CryptError;

pub(crate) const SIZE_PREFIX_LEN: usize = 8;

/// Read until `buf` is full or the reader is exhausted, returning the number of bytes read.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn into_io_error(err: CryptError) -> io::Error {
    match err {
        CryptError::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Recover a [`CryptError`] that crossed an `io::Read`/`io::Write` boundary.
pub(crate) fn from_io_error(err: io::Error) -> CryptError {
    if !err
        .get_ref()
        .is_some_and(|inner| inner.is::<CryptError>())
    {
        return CryptError::Io(err);
    }
    match err.into_inner().map(|inner| inner.downcast::<CryptError>()) {
        Some(Ok(inner)) => *inner,
        _ => CryptError::format("EncryptedPackage stream error"),
    }
}

/// Lazily decrypts an `EncryptedPackage` stream one chunk at a time.
///
/// Reads stop at the declared plaintext size; padding and any trailing bytes after the last
/// chunk are never read.
#[derive(Debug)]
pub struct DecryptReader<'a, R> {
    inner: R,
    key: &'a PackageKey,
    stream_size: u64,
    decoded: u64,
    chunk_index: u32,
    chunk: Zeroizing<Vec<u8>>,
    chunk_pos: usize,
}

impl<'a, R: Read> DecryptReader<'a, R> {
    pub(crate) fn new(mut inner: R, key: &'a PackageKey) -> Result<Self, CryptError> {
        let mut prefix = [0u8; SIZE_PREFIX_LEN];
        let got = read_full(&mut inner, &mut prefix)?;
        if got < SIZE_PREFIX_LEN {
            return Err(CryptError::format(format!(
                "EncryptedPackage stream is {got} bytes, too short for the size prefix"
            )));
        }
        Ok(Self {
            inner,
            key,
            stream_size: u64::from_le_bytes(prefix),
            decoded: 0,
            chunk_index: 0,
            chunk: Zeroizing::new(Vec::new()),
            chunk_pos: 0,
        })
    }

    /// Declared plaintext length.
    pub fn stream_size(&self) -> u64 {
        self.stream_size
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill_chunk(&mut self) -> Result<(), CryptError> {
        let chunk_size = self.key.chunk_size();
        let plain_len = (self.stream_size - self.decoded).min(chunk_size as u64) as usize;
        let cipher_len = round_up_to_block(plain_len, self.key.block_size());

        self.chunk.clear();
        self.chunk.resize(cipher_len, 0);
        let got = read_full(&mut self.inner, &mut self.chunk)?;
        if got < cipher_len {
            return Err(CryptError::format(format!(
                "EncryptedPackage ciphertext ends early: chunk {} needs {cipher_len} bytes, got {got}",
                self.chunk_index
            )));
        }

        log::trace!("decrypting chunk {}", self.chunk_index);
        self.key.decrypt_chunk(self.chunk_index, &mut self.chunk)?;
        self.chunk.truncate(plain_len);
        self.chunk_pos = 0;
        self.decoded += plain_len as u64;
        self.chunk_index = self
            .chunk_index
            .checked_add(1)
            .ok_or_else(|| CryptError::format("EncryptedPackage has too many chunks"))?;
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.chunk_pos == self.chunk.len() {
            if self.decoded == self.stream_size {
                return Ok(0);
            }
            self.fill_chunk().map_err(into_io_error)?;
        }
        let n = out.len().min(self.chunk.len() - self.chunk_pos);
        out[..n].copy_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + n]);
        self.chunk_pos += n;
        Ok(n)
    }
}

/// Encrypts an `EncryptedPackage` stream one chunk at a time.
///
/// The size prefix is written as a placeholder and patched by [`EncryptWriter::finish`]; the
/// stream is incomplete until `finish` returns. A trailing partial chunk is padded up to the
/// cipher block size with PKCS#7-valued bytes.
#[derive(Debug)]
pub struct EncryptWriter<'a, W: Read + Write + Seek> {
    inner: W,
    encryptor: &'a mut Encryptor,
    start: u64,
    written: u64,
    chunk_index: u32,
    chunk: Zeroizing<Vec<u8>>,
}

impl<'a, W: Read + Write + Seek> EncryptWriter<'a, W> {
    pub(crate) fn new(mut inner: W, encryptor: &'a mut Encryptor) -> Result<Self, CryptError> {
        let chunk_size = encryptor.package_key()?.chunk_size();
        let start = inner.stream_position()?;
        inner.write_all(&[0u8; SIZE_PREFIX_LEN])?;
        Ok(Self {
            inner,
            encryptor,
            start,
            written: 0,
            chunk_index: 0,
            chunk: Zeroizing::new(Vec::with_capacity(chunk_size)),
        })
    }

    fn flush_chunk(&mut self, pad: bool) -> Result<(), CryptError> {
        let key = self.encryptor.package_key()?;
        if pad {
            let padded = round_up_to_block(self.chunk.len(), key.block_size());
            let pad_len = padded - self.chunk.len();
            self.chunk.resize(padded, pad_len as u8);
        }
        log::trace!("encrypting chunk {}", self.chunk_index);
        key.encrypt_chunk(self.chunk_index, &mut self.chunk)?;
        self.inner.write_all(&self.chunk)?;
        self.chunk.clear();
        self.chunk_index = self
            .chunk_index
            .checked_add(1)
            .ok_or_else(|| CryptError::format("EncryptedPackage has too many chunks"))?;
        Ok(())
    }

    /// Flush the final chunk, patch the size prefix and, for Agile, compute the integrity HMAC
    /// over the finished stream. Returns the inner writer positioned after the stream.
    pub fn finish(mut self) -> Result<W, CryptError> {
        if !self.chunk.is_empty() {
            self.flush_chunk(true)?;
        }
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(self.start))?;
        self.inner.write_all(&self.written.to_le_bytes())?;

        if let Some(mut mac) = self.encryptor.integrity_hmac()? {
            self.inner.seek(SeekFrom::Start(self.start))?;
            let total = end - self.start;
            let mut remaining = total;
            let mut buf = [0u8; 4096];
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                let got = read_full(&mut self.inner, &mut buf[..want])?;
                if got == 0 {
                    return Err(CryptError::format(format!(
                        "EncryptedPackage stream could not be read back: {remaining} of {total} bytes missing"
                    )));
                }
                mac.update(&buf[..got]);
                remaining -= got as u64;
            }
            self.encryptor.seal_integrity(&mac.finalize())?;
        }

        self.inner.seek(SeekFrom::Start(end))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Read + Write + Seek> Write for EncryptWriter<'_, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let chunk_size = self.encryptor.package_key().map_err(into_io_error)?.chunk_size();
        let mut rest = data;
        while !rest.is_empty() {
            let take = rest.len().min(chunk_size - self.chunk.len());
            self.chunk.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.chunk.len() == chunk_size {
                self.flush_chunk(false).map_err(into_io_error)?;
            }
        }
        self.written += data.len() as u64;
        Ok(data.len())
    }

    /// Flushes the inner writer only; a partial chunk stays buffered until more data or
    /// `finish` arrives.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
