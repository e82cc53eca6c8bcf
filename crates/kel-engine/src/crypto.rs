//! Streaming SM4-CBC file encryption with PKCS#7 padding
//!
//! Output layout: 16-byte IV followed by the ciphertext. The key is the UTF-8
//! bytes of the configured string, truncated or zero-padded to 16 bytes. The
//! IV is the first 16 bytes of SM3(key string), so equal keys produce equal
//! IVs; peers built against this format depend on that.

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use kel_common::checksum::sm3_digest;
use kel_common::{IoResultExt, KelError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::debug;

pub const KEY_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;
const CHUNK_SIZE: usize = 64 * 1024;

type Sm4CbcEnc = cbc::Encryptor<sm4::Sm4>;
type Sm4CbcDec = cbc::Decryptor<sm4::Sm4>;

/// Key bytes for `key`; empty keys are rejected.
pub fn normalize_key(key: &str) -> Result<[u8; KEY_SIZE]> {
    if key.is_empty() {
        return Err(KelError::config("SM4 key must not be empty"));
    }
    let mut bytes = [0u8; KEY_SIZE];
    let raw = key.as_bytes();
    let len = raw.len().min(KEY_SIZE);
    bytes[..len].copy_from_slice(&raw[..len]);
    Ok(bytes)
}

/// First 16 bytes of SM3 over the raw key string
pub fn derive_iv(key: &str) -> [u8; IV_SIZE] {
    let digest = sm3_digest(key.as_bytes());
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&digest[..IV_SIZE]);
    iv
}

/// Encrypt `source` into `target`. Returns the bytes written.
pub fn encrypt_file(source: &Path, target: &Path, key: &str) -> Result<u64> {
    let key_bytes = normalize_key(key)?;
    let reader = BufReader::new(File::open(source).at_path(source)?);
    let mut writer = BufWriter::new(File::create(target).at_path(target)?);
    let written = encrypt_stream(reader, &mut writer, &key_bytes, &derive_iv(key))
        .map_err(|e| context(e, "encrypt", source))?;
    writer.flush().at_path(target)?;
    debug!(source = %source.display(), target = %target.display(), bytes = written, "Encrypted");
    Ok(written)
}

/// Decrypt `source` into `target`. Returns the plaintext size.
pub fn decrypt_file(source: &Path, target: &Path, key: &str) -> Result<u64> {
    let key_bytes = normalize_key(key)?;
    let reader = BufReader::new(File::open(source).at_path(source)?);
    let mut writer = BufWriter::new(File::create(target).at_path(target)?);
    let written =
        decrypt_stream(reader, &mut writer, &key_bytes).map_err(|e| context(e, "decrypt", source))?;
    writer.flush().at_path(target)?;
    debug!(source = %source.display(), target = %target.display(), bytes = written, "Decrypted");
    Ok(written)
}

/// Write `iv || SM4-CBC(reader)` to `writer`.
pub fn encrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_SIZE],
) -> Result<u64> {
    let mut cipher = Sm4CbcEnc::new(key.into(), iv.into());
    writer.write_all(iv)?;
    let mut written = IV_SIZE as u64;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut pending = 0usize;
    loop {
        let n = read_some(&mut reader, &mut buf[pending..])?;
        if n == 0 {
            break;
        }
        pending += n;
        let full = pending / BLOCK_SIZE * BLOCK_SIZE;
        if full == 0 {
            continue;
        }
        for block in buf[..full].chunks_exact_mut(BLOCK_SIZE) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&buf[..full])?;
        written += full as u64;
        buf.copy_within(full..pending, 0);
        pending -= full;
    }

    let mut last = [0u8; BLOCK_SIZE];
    last[..pending].copy_from_slice(&buf[..pending]);
    let tail = cipher
        .encrypt_padded_mut::<Pkcs7>(&mut last, pending)
        .map_err(|_| KelError::crypto("padding failed"))?;
    writer.write_all(tail)?;
    written += tail.len() as u64;
    Ok(written)
}

/// Inverse of [`encrypt_stream`]; reads the IV from the stream.
pub fn decrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &[u8; KEY_SIZE],
) -> Result<u64> {
    let mut iv = [0u8; IV_SIZE];
    reader.read_exact(&mut iv).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => KelError::crypto("input shorter than the IV"),
        _ => KelError::Io(e),
    })?;
    let mut cipher = Sm4CbcDec::new(key.into(), (&iv).into());

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut pending = 0usize;
    let mut written = 0u64;
    loop {
        let n = read_some(&mut reader, &mut buf[pending..])?;
        if n == 0 {
            break;
        }
        pending += n;
        // hold back the final block until EOF so the padding can be stripped
        if pending <= BLOCK_SIZE {
            continue;
        }
        let ready = (pending - 1) / BLOCK_SIZE * BLOCK_SIZE;
        for block in buf[..ready].chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&buf[..ready])?;
        written += ready as u64;
        buf.copy_within(ready..pending, 0);
        pending -= ready;
    }

    if pending != BLOCK_SIZE {
        return Err(KelError::crypto(format!(
            "ciphertext is not a whole number of blocks ({pending} trailing bytes)"
        )));
    }
    let plain = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf[..BLOCK_SIZE])
        .map_err(|_| KelError::crypto("bad padding; wrong key or corrupted input"))?;
    writer.write_all(plain)?;
    written += plain.len() as u64;
    Ok(written)
}

/// Read until `buf` is full or EOF.
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn context(e: KelError, action: &str, source: &Path) -> KelError {
    match e {
        KelError::Crypto(msg) => KelError::crypto(format!("{action} {}: {msg}", source.display())),
        KelError::Io(io) => KelError::io_at(source, io),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const KEY: &str = "1234567890abcdef";

    fn roundtrip(data: &[u8], key: &str) -> Vec<u8> {
        let k = normalize_key(key).unwrap();
        let mut cipher = Vec::new();
        encrypt_stream(data, &mut cipher, &k, &derive_iv(key)).unwrap();
        let mut plain = Vec::new();
        decrypt_stream(cipher.as_slice(), &mut plain, &k).unwrap();
        plain
    }

    #[test]
    fn test_known_answer() {
        // GB/T 32907 example: plaintext = key = 0123456789abcdeffedcba9876543210
        let key: [u8; 16] = hex::decode("0123456789abcdeffedcba9876543210")
            .unwrap()
            .try_into()
            .unwrap();
        let mut block = GenericArray::clone_from_slice(&key);
        use cbc::cipher::{BlockEncrypt, KeyInit};
        sm4::Sm4::new(&key.into()).encrypt_block(&mut block);
        assert_eq!(hex::encode(block), "681edf34d206965e86b3e94f536e4246");
    }

    #[test]
    fn test_layout_iv_then_padded_ciphertext() {
        let k = normalize_key(KEY).unwrap();
        for (len, expected) in [(0usize, 32usize), (15, 32), (16, 48), (17, 48)] {
            let data = vec![7u8; len];
            let mut out = Vec::new();
            let written = encrypt_stream(data.as_slice(), &mut out, &k, &derive_iv(KEY)).unwrap();
            assert_eq!(out.len(), expected, "plaintext length {len}");
            assert_eq!(written as usize, expected);
            assert_eq!(&out[..16], &derive_iv(KEY));
        }
    }

    #[test]
    fn test_roundtrip_across_chunk_boundaries() {
        for len in [0, 1, 16, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE + 5] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(roundtrip(&data, KEY), data, "length {len}");
        }
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(&normalize_key("abc").unwrap()[..4], b"abc\0");
        assert_eq!(
            normalize_key("0123456789abcdefXYZ").unwrap(),
            *b"0123456789abcdef"
        );
        assert!(matches!(normalize_key(""), Err(KelError::Config(_))));
        assert_ne!(derive_iv("0123456789abcdefXYZ"), derive_iv("0123456789abcdef"));
    }

    #[test]
    fn test_wrong_key_never_yields_plaintext() {
        let data = b"confidential payload spanning more than one block".to_vec();
        let k = normalize_key(KEY).unwrap();
        let mut cipher = Vec::new();
        encrypt_stream(data.as_slice(), &mut cipher, &k, &derive_iv(KEY)).unwrap();

        let wrong = normalize_key("fedcba0987654321").unwrap();
        let mut plain = Vec::new();
        match decrypt_stream(cipher.as_slice(), &mut plain, &wrong) {
            Err(e) => assert!(matches!(e, KelError::Crypto(_))),
            Ok(_) => assert_ne!(plain, data),
        }
    }

    #[test]
    fn test_truncated_ciphertext_is_rejected() {
        let k = normalize_key(KEY).unwrap();
        let mut cipher = Vec::new();
        encrypt_stream(&b"hello world, hello world"[..], &mut cipher, &k, &derive_iv(KEY)).unwrap();
        cipher.truncate(cipher.len() - 3);
        let err = decrypt_stream(cipher.as_slice(), Vec::new(), &k).unwrap_err();
        assert!(matches!(err, KelError::Crypto(_)));

        let err = decrypt_stream(&[0u8; 8][..], Vec::new(), &k).unwrap_err();
        assert!(matches!(err, KelError::Crypto(_)));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("p.tar.gz");
        let enc = dir.path().join("p.enc");
        let dec = dir.path().join("p.dec");
        fs::write(&plain, vec![42u8; 100_000]).unwrap();

        let written = encrypt_file(&plain, &enc, KEY).unwrap();
        assert_eq!(written, fs::metadata(&enc).unwrap().len());
        assert_eq!(decrypt_file(&enc, &dec, KEY).unwrap(), 100_000);
        assert_eq!(fs::read(&plain).unwrap(), fs::read(&dec).unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4096), key in "[ -~]{1,24}") {
            prop_assert_eq!(roundtrip(&data, &key), data);
        }
    }
}
