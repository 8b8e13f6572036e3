use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;

use crate::error::CryptoError;
use crate::keys::{PublicKey, SecretKey, random_bytes};
use crate::{NONCE_SIZE, PUBLIC_KEY_SIZE};

const KDF_CONTEXT: &str = "parley 2024-06 sealed envelope key";
const TAG_SIZE: usize = 16;

/// One plaintext sealed for one recipient.
///
/// `encrypted_data` is base64 of `ephemeral_public_key || ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub encrypted_data: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
}

/// Seal `plaintext` so that only the holder of the matching secret key can open it.
/// A fresh ephemeral key pair and nonce are drawn for every call.
pub fn encrypt(plaintext: &[u8], recipient_public_key: &str) -> Result<EncryptedEnvelope, CryptoError> {
    let recipient = PublicKey::from_base64(recipient_public_key)?;

    let ephemeral = StaticSecret::from(random_bytes::<PUBLIC_KEY_SIZE>()?);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
    let nonce_bytes = random_bytes::<NONCE_SIZE>()?;

    let shared = ephemeral.diffie_hellman(recipient.as_dalek());
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKey);
    }

    let key = derive_envelope_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient.as_bytes());
    let cipher = XChaCha20Poly1305::new((&key).into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut combined = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    combined.extend_from_slice(ephemeral_public.as_bytes());
    combined.extend_from_slice(&ciphertext);

    Ok(EncryptedEnvelope {
        encrypted_data: BASE64.encode(combined),
        nonce: BASE64.encode(nonce_bytes),
        sender_id: None,
    })
}

/// Open an envelope with the recipient's secret key.
///
/// Every envelope-side failure (bad encoding, truncation, tampering, wrong
/// key) is reported as `CryptoError::Authentication`.
pub fn decrypt(envelope: &EncryptedEnvelope, recipient_private_key: &str) -> Result<Vec<u8>, CryptoError> {
    let secret = SecretKey::from_base64(recipient_private_key)?;

    let data = BASE64
        .decode(&envelope.encrypted_data)
        .map_err(|_| CryptoError::Authentication)?;
    let nonce_bytes = BASE64
        .decode(&envelope.nonce)
        .map_err(|_| CryptoError::Authentication)?;

    if nonce_bytes.len() != NONCE_SIZE || data.len() < PUBLIC_KEY_SIZE + TAG_SIZE {
        return Err(CryptoError::Authentication);
    }

    let (ephemeral_bytes, ciphertext) = data.split_at(PUBLIC_KEY_SIZE);
    let ephemeral_bytes: [u8; PUBLIC_KEY_SIZE] = ephemeral_bytes
        .try_into()
        .map_err(|_| CryptoError::Authentication)?;
    let ephemeral_public = x25519_dalek::PublicKey::from(ephemeral_bytes);

    let shared = secret.as_dalek().diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::Authentication);
    }

    let key = derive_envelope_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        secret.public_key().as_bytes(),
    );
    let cipher = XChaCha20Poly1305::new((&key).into());
    cipher
        .decrypt(XNonce::from_slice(&nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

// BLAKE3 KDF, bound to both public keys so an envelope cannot be re-targeted
fn derive_envelope_key(shared_secret: &[u8], ephemeral_public: &[u8], recipient_public: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
    hasher.update(shared_secret);
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);
    *hasher.finalize().as_bytes()
}
