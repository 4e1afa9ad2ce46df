//! Layered wire format shared by agent and server.
//!
//! Outbound payloads are built as `gzip(rsa_blocks(json))` with an
//! optional keyed digest of the final body attached as a header. The
//! server undoes the layers in reverse: digest check, gunzip, decrypt.

use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Header carrying the hex-encoded keyed digest of the transmitted body.
pub const HASH_HEADER: &str = "HashSHA256";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("encrypted payload is not a whole number of key-size blocks")]
    BlockAlignment,
}

pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Hex digest of `body || key`, the value carried in [`HASH_HEADER`].
pub fn sign_body(body: &[u8], key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_body(body: &[u8], key: &str, header: &str) -> bool {
    sign_body(body, key) == header
}

/// Largest plaintext chunk a single OAEP/SHA-256 operation can carry.
pub fn max_plaintext_block(key: &RsaPublicKey) -> usize {
    key.size() - 2 * Sha256::output_size() - 2
}

/// Splits `data` into OAEP-sized chunks and encrypts each one. The
/// ciphertext is the plain concatenation of full key-size blocks.
pub fn encrypt_blocks(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut rng = rand::thread_rng();
    let block = max_plaintext_block(key);
    let mut out = Vec::with_capacity(data.len() / block * key.size() + key.size());
    for chunk in data.chunks(block) {
        out.extend(key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
    }
    Ok(out)
}

/// Inverse of [`encrypt_blocks`]; rejects payloads that are not a whole
/// number of key-size blocks before attempting any decryption.
pub fn decrypt_blocks(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, WireError> {
    let block = key.size();
    if data.is_empty() || data.len() % block != 0 {
        return Err(WireError::BlockAlignment);
    }
    let mut out = Vec::new();
    for chunk in data.chunks(block) {
        out.extend(key.decrypt(Oaep::new::<Sha256>(), chunk)?);
    }
    Ok(out)
}

/// Reads an RSA public key from a PEM file, accepting both SPKI
/// ("PUBLIC KEY") and PKCS#1 ("RSA PUBLIC KEY") encodings.
pub fn load_public_key(path: &Path) -> anyhow::Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|err| anyhow::anyhow!("failed to parse RSA public key {}: {err}", path.display()))
}

pub fn load_private_key(path: &Path) -> anyhow::Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|err| anyhow::anyhow!("failed to parse RSA private key {}: {err}", path.display()))
}
