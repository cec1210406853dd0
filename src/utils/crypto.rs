//! XChaCha20-Poly1305 frame cipher.
//!
//! Encoded frames carry a fresh random nonce in front of the ciphertext:
//! ```text
//! [Nonce(24)] [Ciphertext(N)] [Tag(16)]
//! ```

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use tracing::{error, warn};
use zeroize::Zeroize;

use crate::error::{constants, ProtocolError, Result};
use crate::transport::cipher::Cipher;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

pub struct Crypto {
    cipher: Option<XChaCha20Poly1305>,
}

impl Crypto {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Some(XChaCha20Poly1305::new(Key::from_slice(key))),
        }
    }

    /// Fresh nonce from the system random source.
    pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|e| {
            error!(error = %e, "{}", constants::ERR_RANDOM_SOURCE);
            ProtocolError::EncryptionFailure
        })?;
        Ok(nonce)
    }

    fn active(&self) -> Option<&XChaCha20Poly1305> {
        if self.cipher.is_none() {
            warn!("{}", constants::ERR_CIPHER_DISPOSED);
        }
        self.cipher.as_ref()
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.active()
            .ok_or(ProtocolError::EncryptionFailure)?
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|e| {
                warn!(error = %e, "{}", constants::ERR_ENCRYPTION_FAILED);
                ProtocolError::EncryptionFailure
            })
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.active()
            .ok_or(ProtocolError::DecryptionFailure)?
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| {
                warn!(error = %e, "{}", constants::ERR_DECRYPTION_FAILED);
                ProtocolError::DecryptionFailure
            })
    }

    pub fn is_disposed(&self) -> bool {
        self.cipher.is_none()
    }
}

impl Cipher for Crypto {
    fn encode(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let mut nonce = Self::generate_nonce()?;
        let ciphertext = self.encrypt(data, &nonce)?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        nonce.zeroize();

        data.zeroize();
        *data = framed;
        Ok(())
    }

    fn decode(&mut self, data: &mut Vec<u8>) -> Result<()> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let plaintext = self.decrypt(ciphertext, &nonce)?;
        nonce.zeroize();
        *data = plaintext;
        Ok(())
    }

    fn dispose(&mut self) {
        // the cipher's key schedule zeroizes on drop
        self.cipher = None;
    }
}
