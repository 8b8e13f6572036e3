//! Parley Crypto Library
//!
//! Public-key sealed envelopes for end-to-end encrypted chat payloads.
//! Every envelope is sealed for exactly one recipient under a fresh
//! ephemeral X25519 key, so the server only ever stores and relays
//! public keys and opaque ciphertext.
//!
//! - `keys`: key pair generation, base64 transport encoding, validation
//! - `seal`: encrypt/decrypt of single-recipient envelopes (client feature)

pub mod error;
pub mod keys;

#[cfg(feature = "client")]
pub mod seal;

pub use error::{CryptoError, KeyKind};
pub use keys::{KeyPair, PublicKey, SecretKey, validate_private_key, validate_public_key};

#[cfg(feature = "client")]
pub use seal::{EncryptedEnvelope, decrypt, encrypt};

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SECRET_KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
