use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Private,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Private => f.write_str("private"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("{0} key is empty")]
    EmptyKey(KeyKind),

    #[error("{0} key is not valid base64")]
    KeyEncoding(KeyKind),

    #[error("{kind} key must be {expected} bytes, got {actual}")]
    KeyLength {
        kind: KeyKind,
        expected: usize,
        actual: usize,
    },

    #[error("public key is a low-order point")]
    WeakKey,

    #[error("encryption failed")]
    Encryption,

    /// Wrong key, tampered data and malformed envelopes all collapse here.
    #[error("message authentication failed")]
    Authentication,
}
