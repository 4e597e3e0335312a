//! Authenticated encryption for cookie values.
//!
//! Values are encrypted with `ChaCha20-Poly1305` under the encryption key and
//! then authenticated with `HMAC-SHA256` under the authentication key, so either
//! key being wrong fails [`CookieCodec::open`]. The cookie name is bound into
//! both the AEAD associated data and the MAC.
//!
//! Layout (base64url, no padding): `nonce(12) || ciphertext || tag(32)`.

use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cookie key is empty")]
    EmptyKey,

    #[error("failed to generate nonce")]
    Random,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("invalid cookie encoding")]
    Encoding,

    #[error("cookie value too short")]
    Truncated,

    #[error("cookie signature mismatch")]
    Signature,

    #[error("invalid cookie payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct CookieCodec {
    encryption_key: SecretBox<[u8; KEY_LEN]>,
    authentication_key: SecretBox<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec").finish_non_exhaustive()
    }
}

impl CookieCodec {
    /// Derive the codec keys from raw key material, for example the contents of
    /// the configured key files.
    ///
    /// # Errors
    /// Returns [`CodecError::EmptyKey`] if either key is empty.
    pub fn new(encryption_key: &[u8], authentication_key: &[u8]) -> Result<Self, CodecError> {
        if encryption_key.is_empty() || authentication_key.is_empty() {
            return Err(CodecError::EmptyKey);
        }
        Ok(Self {
            encryption_key: derive_key(b"bridge-cookie-encryption", encryption_key),
            authentication_key: derive_key(b"bridge-cookie-authentication", authentication_key),
        })
    }

    /// Create a codec with random keys. Cookies sealed with it do not survive a
    /// restart.
    ///
    /// # Errors
    /// Returns an error if the operating system RNG fails.
    pub fn generate() -> Result<Self, CodecError> {
        let mut encryption_key = [0u8; KEY_LEN];
        let mut authentication_key = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut encryption_key)
            .map_err(|_| CodecError::Random)?;
        OsRng
            .try_fill_bytes(&mut authentication_key)
            .map_err(|_| CodecError::Random)?;
        Self::new(&encryption_key, &authentication_key)
    }

    /// Encrypt and authenticate `plaintext` for the cookie `name`.
    ///
    /// # Errors
    /// Returns an error if encryption fails or the result is too large for a cookie.
    #[allow(deprecated)]
    pub fn seal(&self, name: &str, plaintext: &[u8]) -> Result<String, CodecError> {
        let cipher = ChaCha20Poly1305::new_from_slice(self.encryption_key.expose_secret())
            .map_err(|_| CodecError::Encrypt)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| CodecError::Random)?;

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CodecError::Encrypt)?;

        let tag = self.sign(name, &nonce, &ciphertext)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + MAC_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);

        Ok(Base64UrlUnpadded::encode_string(&out))
    }

    /// Verify and decrypt a value produced by [`CookieCodec::seal`].
    ///
    /// # Errors
    /// Returns an error if the value was tampered with, sealed for another
    /// cookie name or sealed under different keys.
    #[allow(deprecated)]
    pub fn open(&self, name: &str, value: &str) -> Result<Vec<u8>, CodecError> {
        let raw = Base64UrlUnpadded::decode_vec(value).map_err(|_| CodecError::Encoding)?;
        if raw.len() < NONCE_LEN + MAC_LEN {
            return Err(CodecError::Truncated);
        }

        let (body, tag) = raw.split_at(raw.len() - MAC_LEN);
        let (nonce, ciphertext) = body.split_at(NONCE_LEN);

        self.mac(name, nonce, ciphertext)?
            .verify_slice(tag)
            .map_err(|_| CodecError::Signature)?;

        let cipher = ChaCha20Poly1305::new_from_slice(self.encryption_key.expose_secret())
            .map_err(|_| CodecError::Decrypt)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CodecError::Decrypt)
    }

    /// Seal a value serialized as JSON.
    ///
    /// # Errors
    /// See [`CookieCodec::seal`].
    pub fn seal_json<T: Serialize>(&self, name: &str, value: &T) -> Result<String, CodecError> {
        let json = serde_json::to_vec(value)?;
        self.seal(name, &json)
    }

    /// Open a value sealed with [`CookieCodec::seal_json`].
    ///
    /// # Errors
    /// See [`CookieCodec::open`].
    pub fn open_json<T: DeserializeOwned>(&self, name: &str, value: &str) -> Result<T, CodecError> {
        let json = self.open(name, value)?;
        Ok(serde_json::from_slice(&json)?)
    }

    fn sign(&self, name: &str, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(self
            .mac(name, nonce, ciphertext)?
            .finalize()
            .into_bytes()
            .to_vec())
    }

    fn mac(&self, name: &str, nonce: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CodecError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.authentication_key.expose_secret())
            .map_err(|_| CodecError::Signature)?;
        mac.update(name.as_bytes());
        mac.update(&[0]);
        mac.update(nonce);
        mac.update(ciphertext);
        Ok(mac)
    }
}

fn derive_key(label: &[u8], material: &[u8]) -> SecretBox<[u8; KEY_LEN]> {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update([0]);
    hasher.update(material);
    let digest: [u8; KEY_LEN] = hasher.finalize().into();
    SecretBox::new(Box::new(digest))
}
