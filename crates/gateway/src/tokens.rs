//! Pre-shared token gates.
//!
//! Each authenticated surface (REST, stream clients) gets one gate, built
//! at startup from an env var. The token itself is never kept: only its
//! SHA-256 digest is stored, and candidates are hashed before a
//! constant-time comparison so neither the value nor its length leaks
//! through timing.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Admission check for one surface. `Open` = no token configured (dev
/// mode): everything passes.
#[derive(Clone)]
pub enum TokenGate {
    Open,
    Locked { digest: [u8; 32] },
}

impl TokenGate {
    /// Build the gate for a surface from the named env var, logging which
    /// mode the surface runs in.
    pub fn from_env(env_var: &str, surface: &str) -> Self {
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var, surface, "token auth enabled");
                Self::locked(&token)
            }
            _ => {
                tracing::warn!(
                    env_var,
                    surface,
                    "token auth disabled; set the env var to enable it"
                );
                Self::Open
            }
        }
    }

    pub fn locked(token: &str) -> Self {
        Self::Locked {
            digest: Sha256::digest(token.as_bytes()).into(),
        }
    }

    /// Whether a presented token passes. A locked gate rejects absent
    /// tokens outright; present ones are digested and compared in
    /// constant time.
    pub fn permits(&self, presented: Option<&str>) -> bool {
        let Self::Locked { digest } = self else {
            return true;
        };
        let Some(candidate) = presented else {
            return false;
        };
        let candidate: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        candidate.ct_eq(digest).into()
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// The token carried by an `Authorization: Bearer <token>` header value.
pub fn bearer(header: Option<&str>) -> Option<&str> {
    header?.strip_prefix("Bearer ")
}
