//! The encrypted-record primitive §4.11 builds the master and per-object
//! databases on top of. Out of scope for the original distillation ("the
//! encrypted-file primitive itself ... is assumed given"), but a runnable
//! crate needs a concrete implementation, so this mirrors the
//! argon2-derived-key + secretbox-sealed envelope this codebase already
//! uses elsewhere for its encrypted keystore.

use argon2::Argon2;
use crypto_secretbox::aead::{Aead, AeadCore, KeyInit, OsRng};
use crypto_secretbox::{Key, XSalsa20Poly1305};
use rand::RngCore;

use crate::error::CryptoError;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
/// `XSalsa20Poly1305`'s nonce is fixed at 24 bytes.
const NONCE_LEN: usize = 24;

/// Derives a 32-byte secretbox key from a passphrase and salt via Argon2id.
fn derive_key(secret: &str, salt: &[u8]) -> Result<Key, CryptoError> {
    let mut key_bytes = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(secret.as_bytes(), salt, &mut key_bytes)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(Key::from(key_bytes))
}

/// Seals `plaintext` under a key derived from `secret`, returning
/// `salt || nonce || ciphertext`. A fresh salt and nonce are generated on
/// every call, matching the envelope this crate's per-file writers expect.
pub fn seal(secret: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = derive_key(secret, &salt)?;
    let cipher = XSalsa20Poly1305::new(&key);
    let nonce = XSalsa20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::KeyDerivation)?;

    let mut out = Vec::with_capacity(SALT_LEN + nonce.len() + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverses [`seal`]: splits the salt and nonce off the front of `envelope`,
/// re-derives the key, and opens the remainder.
pub fn open(secret: &str, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < SALT_LEN + NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (salt, rest) = envelope.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(secret, salt)?;
    let cipher = XSalsa20Poly1305::new(&key);
    cipher
        .decrypt(nonce_bytes.into(), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}
