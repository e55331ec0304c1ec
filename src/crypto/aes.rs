use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};
use crate::error::{AuthError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// The size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Creates a new `SecureKey` from a byte array.
    ///
    /// # Arguments
    ///
    /// * `key` - A 32-byte array representing the AES-256 key.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Generates a new random AES-256 key.
///
/// # Returns
///
/// A `SecureKey` containing the generated key.
pub fn generate_key() -> SecureKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    SecureKey::new(key)
}

/// Generates a new random AES-GCM nonce.
///
/// Every seal call draws a fresh nonce from the OS CSPRNG; a nonce is never
/// reused under the same key.
///
/// # Returns
///
/// A 12-byte array representing the nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts a plaintext using AES-256-GCM into the sealed wire layout
/// `nonce || tag || ciphertext`.
///
/// # Arguments
///
/// * `key` - The AES-256 key.
/// * `plaintext` - The data to encrypt.
///
/// # Returns
///
/// The sealed bytes, self-contained for storage.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    // aes-gcm appends the tag to the ciphertext; split it back out so the
    // stored layout is nonce || tag || ciphertext.
    let ct_and_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| AuthError::Encryption(format!("Encryption failed: {}", e)))?;
    let (body, tag) = ct_and_tag.split_at(ct_and_tag.len() - TAG_SIZE);

    let mut sealed = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + body.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(tag);
    sealed.extend_from_slice(body);
    Ok(sealed)
}

/// Decrypts a `nonce || tag || ciphertext` sealed payload.
///
/// # Arguments
///
/// * `key` - The AES-256 key.
/// * `sealed` - The sealed bytes produced by [`seal`].
///
/// # Returns
///
/// The decrypted plaintext. Fails closed when the authentication tag does
/// not verify (tampered data or wrong key).
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(AuthError::KeyDecryption(
            "Sealed payload too short".to_string(),
        ));
    }

    let (nonce_bytes, rest) = sealed.split_at(NONCE_SIZE);
    let (tag, body) = rest.split_at(TAG_SIZE);

    let mut ct_and_tag = Vec::with_capacity(body.len() + TAG_SIZE);
    ct_and_tag.extend_from_slice(body);
    ct_and_tag.extend_from_slice(tag);

    let nonce_arr: [u8; NONCE_SIZE] = nonce_bytes
        .try_into()
        .map_err(|_| AuthError::KeyDecryption("Invalid nonce size".to_string()))?;

    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(&Nonce::from(nonce_arr), ct_and_tag.as_slice())
        .map_err(|_| AuthError::KeyDecryption("Authentication tag mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = generate_key();
        let plaintext = b"data key material";

        let sealed = seal(key.as_bytes(), plaintext).unwrap();
        let opened = open(key.as_bytes(), &sealed).unwrap();

        assert_eq!(plaintext.to_vec(), opened);
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let key = generate_key();
        let mut sealed = seal(key.as_bytes(), b"secret").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(open(key.as_bytes(), &sealed).is_err());
    }

    #[test]
    fn open_rejects_wrong_key() {
        let key = generate_key();
        let other = generate_key();
        let sealed = seal(key.as_bytes(), b"secret").unwrap();

        assert!(open(other.as_bytes(), &sealed).is_err());
    }

    #[test]
    fn nonces_are_unique_per_seal() {
        let key = generate_key();
        let a = seal(key.as_bytes(), b"x").unwrap();
        let b = seal(key.as_bytes(), b"x").unwrap();

        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }
}
