use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use x25519_dalek::StaticSecret;

use crate::error::{CryptoError, KeyKind};
use crate::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};

/// X25519 public key. Safe to store on the server and hand to other users.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.as_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        decode_key::<PUBLIC_KEY_SIZE>(KeyKind::Public, encoded).map(Self::from_bytes)
    }

    #[cfg_attr(not(feature = "client"), allow(dead_code))]
    pub(crate) fn as_dalek(&self) -> &x25519_dalek::PublicKey {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

/// X25519 secret key. Zeroized on drop; never serialized by this crate.
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        decode_key::<SECRET_KEY_SIZE>(KeyKind::Private, encoded).map(Self::from_bytes)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    #[cfg_attr(not(feature = "client"), allow(dead_code))]
    pub(crate) fn as_dalek(&self) -> &StaticSecret {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// A matching public/secret pair, always generated together.
///
/// Deliberately not `Serialize`: only `public()` may cross the system boundary.
#[derive(Debug, Clone)]
pub struct KeyPair {
    public: PublicKey,
    secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS entropy source.
    pub fn generate() -> Result<Self, CryptoError> {
        let secret = SecretKey::from_bytes(random_bytes::<SECRET_KEY_SIZE>()?);
        Ok(Self {
            public: secret.public_key(),
            secret,
        })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

/// Fill an array from the OS RNG, surfacing failure instead of panicking.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    Ok(buf)
}

fn decode_key<const N: usize>(kind: KeyKind, encoded: &str) -> Result<[u8; N], CryptoError> {
    if encoded.is_empty() {
        return Err(CryptoError::EmptyKey(kind));
    }

    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| CryptoError::KeyEncoding(kind))?;

    let actual = bytes.len();
    bytes.try_into().map_err(|_| CryptoError::KeyLength {
        kind,
        expected: N,
        actual,
    })
}

/// Structural check only: non-empty, base64, 32 decoded bytes.
pub fn validate_public_key(encoded: &str) -> Result<(), CryptoError> {
    decode_key::<PUBLIC_KEY_SIZE>(KeyKind::Public, encoded).map(|_| ())
}

/// Structural check only: non-empty, base64, 32 decoded bytes.
pub fn validate_private_key(encoded: &str) -> Result<(), CryptoError> {
    decode_key::<SECRET_KEY_SIZE>(KeyKind::Private, encoded).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_validate() {
        let pair = KeyPair::generate().unwrap();
        assert!(validate_public_key(&pair.public().to_base64()).is_ok());
        assert!(validate_private_key(&pair.secret().to_base64()).is_ok());
    }

    #[test]
    fn public_key_derives_from_secret() {
        let pair = KeyPair::generate().unwrap();
        assert_eq!(pair.secret().public_key(), *pair.public());
    }

    #[test]
    fn base64_roundtrip() {
        let pair = KeyPair::generate().unwrap();
        let encoded = pair.public().to_base64();
        assert_eq!(PublicKey::from_base64(&encoded).unwrap(), *pair.public());

        let secret = SecretKey::from_base64(&pair.secret().to_base64()).unwrap();
        assert_eq!(secret.public_key(), *pair.public());
    }

    #[test]
    fn generated_pairs_differ() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public(), b.public());
    }

    #[test]
    fn rejects_empty_key() {
        assert_eq!(
            validate_public_key(""),
            Err(CryptoError::EmptyKey(KeyKind::Public))
        );
        assert_eq!(
            validate_private_key(""),
            Err(CryptoError::EmptyKey(KeyKind::Private))
        );
    }

    #[test]
    fn rejects_non_base64() {
        assert_eq!(
            validate_public_key("not base64!!"),
            Err(CryptoError::KeyEncoding(KeyKind::Public))
        );
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(validate_public_key("short").is_err());

        let sixteen = BASE64.encode([7u8; 16]);
        assert_eq!(
            validate_public_key(&sixteen),
            Err(CryptoError::KeyLength {
                kind: KeyKind::Public,
                expected: 32,
                actual: 16,
            })
        );

        let thirty_three = BASE64.encode([7u8; 33]);
        assert!(validate_private_key(&thirty_three).is_err());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let pair = KeyPair::generate().unwrap();
        let rendered = format!("{:?}", pair);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&pair.secret().to_base64()));
    }
}
