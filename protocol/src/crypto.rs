//! Password digest for the RCON handshake
//!
//! The server never sees the password itself: it sends a random salt and
//! expects `MD5(salt || password)` back.

use crate::constants::{DIGEST_SIZE, SALT_SIZE};
use md5::{Digest as _, Md5};
use thiserror::Error;

/// How the digest travels in a Password packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestEncoding {
    /// The 16 raw digest bytes
    #[default]
    Binary,
    /// 32 lowercase hex characters
    Hex,
}

/// Digest errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("Invalid digest length (expected {expected} hex characters, got {got})")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid hex at position {position}")]
    InvalidHex { position: usize },
}

/// Salt issued by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt(pub [u8; SALT_SIZE]);

impl Salt {
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// MD5 digest proving knowledge of the password
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Lowercase hex form, as typed by hand-written RCON tools
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Result<Self, DigestError> {
        if hex.len() != DIGEST_SIZE * 2 {
            return Err(DigestError::InvalidLength {
                expected: DIGEST_SIZE * 2,
                got: hex.len(),
            });
        }

        // from_str_radix would also accept a leading sign
        if let Some(position) = hex.bytes().position(|b| !b.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidHex { position });
        }

        let mut digest = [0u8; DIGEST_SIZE];
        for (i, byte) in digest.iter_mut().enumerate() {
            let pair = hex
                .get(i * 2..i * 2 + 2)
                .ok_or(DigestError::InvalidHex { position: i * 2 })?;
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| DigestError::InvalidHex { position: i * 2 })?;
        }

        Ok(Self(digest))
    }
}

/// Compute `MD5(salt || password)`
pub fn password_digest(salt: &Salt, password: &str) -> Digest {
    let mut hasher = Md5::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());

    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(&hasher.finalize());
    Digest(digest)
}
