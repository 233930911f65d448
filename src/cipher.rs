//! # Message body decryption.
//!
//! [`MessageCipher`] turns an encrypted [`Message`] back into plaintext using the
//! session's symmetric key. When the key is itself wrapped, it is first recovered
//! through the [`KeyUnwrap`] collaborator.
//!
//! ## Rules
//! - No key material, or no IV → the message is returned unchanged.
//! - An IV of the wrong length is treated like a missing IV (pass-through).
//! - Bodies are base64; the cipher is AES-256-GCM with the IV as nonce.
//! - Any failure after those checks is a [`CipherError`], never retried. Body
//!   failures poison one message; key failures ([`CipherError::is_key_failure`])
//!   stop the listener.

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::service::{KeyUnwrap, Message, Session};

/// Length of the GCM nonce carried in [`Message::iv`].
pub const IV_LEN: usize = 12;

/// Why a body could not be decrypted.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("session key is wrapped but no key unwrapper is configured")]
    MissingUnwrapper,
    #[error("failed to unwrap session key: {0}")]
    Unwrap(String),
    #[error("invalid session key: {0}")]
    InvalidKey(String),
    #[error("message body is not valid base64: {0}")]
    Encoding(String),
    #[error("ciphertext rejected (corrupt body or wrong key)")]
    Decrypt,
    #[error("plaintext is not valid UTF-8")]
    Utf8,
}

impl CipherError {
    /// True when the session key itself is unusable, so every message on the
    /// session would fail the same way.
    pub fn is_key_failure(&self) -> bool {
        matches!(
            self,
            CipherError::MissingUnwrapper | CipherError::Unwrap(_) | CipherError::InvalidKey(_)
        )
    }
}

/// Decrypts message bodies for a session.
#[derive(Clone, Default)]
pub struct MessageCipher {
    unwrapper: Option<Arc<dyn KeyUnwrap>>,
}

impl MessageCipher {
    pub fn new(unwrapper: Option<Arc<dyn KeyUnwrap>>) -> Self {
        Self { unwrapper }
    }

    /// Returns `message` with its body decrypted, or unchanged when the
    /// session is unencrypted or the message carries no usable IV.
    pub fn decrypt(&self, session: &Session, message: Message) -> Result<Message, CipherError> {
        let Some(key) = session.encryption_key.as_ref().filter(|k| !k.value.is_empty()) else {
            return Ok(message);
        };
        let iv = match message.iv.as_deref() {
            Some(iv) if iv.len() == IV_LEN => iv,
            _ => return Ok(message),
        };

        let raw = if key.encrypted {
            let unwrapper = self.unwrapper.as_ref().ok_or(CipherError::MissingUnwrapper)?;
            unwrapper.unwrap_key(&key.value)?
        } else {
            Zeroizing::new(key.value.clone())
        };

        let cipher = Aes256Gcm::new_from_slice(&raw)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        let ciphertext = STANDARD
            .decode(message.body.as_bytes())
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), ciphertext.as_ref())
            .map_err(|_| CipherError::Decrypt)?;
        let body = String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)?;

        Ok(Message {
            body,
            iv: None,
            ..message
        })
    }
}
