// ── Config-token handling ──
//
// The config token encrypts the user's browser state inside the mandelbox.
// It is generated once per user and can be persisted sealed under a
// password-derived key: `base64(nonce || ChaCha20-Poly1305(token))` with
// the key being SHA-256 of the password.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::model::StoredConfigToken;

const CONFIG_TOKEN_BYTES: usize = 48;
const NONCE_LEN: usize = 12;

/// 48 random bytes, base64-encoded.
pub fn generate_config_token() -> SecretString {
    let mut bytes = [0_u8; CONFIG_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    SecretString::from(STANDARD.encode(bytes))
}

fn cipher_for(password: &SecretString) -> Result<ChaCha20Poly1305, CoreError> {
    let key = Sha256::digest(password.expose_secret().as_bytes());
    ChaCha20Poly1305::new_from_slice(&key).map_err(|e| CoreError::ConfigToken {
        message: format!("failed to initialize cipher: {e}"),
    })
}

/// Seal a config token under `password`.
pub fn encrypt_config_token(
    token: &SecretString,
    password: &SecretString,
) -> Result<String, CoreError> {
    let mut nonce_bytes = [0_u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher_for(password)?
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            token.expose_secret().as_bytes(),
        )
        .map_err(|_| CoreError::ConfigToken {
            message: "failed to encrypt config token".into(),
        })?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

/// Open a token sealed by [`encrypt_config_token`].
pub fn decrypt_config_token(
    sealed: &str,
    password: &SecretString,
) -> Result<SecretString, CoreError> {
    let raw = STANDARD
        .decode(sealed.trim())
        .map_err(|e| CoreError::ConfigToken {
            message: format!("sealed token is not valid base64: {e}"),
        })?;
    if raw.len() <= NONCE_LEN {
        return Err(CoreError::ConfigToken {
            message: "sealed token is too short".into(),
        });
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

    let plaintext = cipher_for(password)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::ConfigToken {
            message: "wrong password or corrupted config token".into(),
        })?;

    String::from_utf8(plaintext)
        .map(SecretString::from)
        .map_err(|_| CoreError::ConfigToken {
            message: "decrypted config token is not UTF-8".into(),
        })
}

/// Use the stored token when there is one, otherwise mint a fresh one.
/// The flag is `true` when the token was just generated.
pub fn resolve_config_token(
    stored: Option<&StoredConfigToken>,
) -> Result<(SecretString, bool), CoreError> {
    match stored {
        Some(StoredConfigToken::Plain(token)) => Ok((token.clone(), false)),
        Some(StoredConfigToken::Encrypted {
            ciphertext,
            password,
        }) => Ok((decrypt_config_token(ciphertext, password)?, false)),
        None => Ok((generate_config_token(), true)),
    }
}
