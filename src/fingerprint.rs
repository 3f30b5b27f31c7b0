//! Content fingerprints for constraint systems and proof contexts.
//!
//! Fingerprints hash the persisted CBOR payload with domain separation and
//! length prefixing, so equal values hash equally across runs and builds
//! that share a schema.
//!
//! # Citations
//! - SHA-256: NIST FIPS 180-4 (2015)
//! - Domain separation & length prefixing: Bernstein et al., "How to hash into elliptic curves" (2009)

use crate::codec::CodecError;
use crate::context::ProofContext;
use crate::core::System;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 256-bit hash value.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashValue(pub [u8; 32]);

impl HashValue {
    #[inline]
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SHA-256 of `b"DGC:" || domain || b":v1" || le64(len(data)) || data`.
    pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"DGC:");
        hasher.update(domain);
        hasher.update(b":v1");
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

impl std::fmt::Display for HashValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 4 bytes in hex
        write!(
            f,
            "HashValue({:02x}{:02x}{:02x}{:02x}…)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

pub fn system_fingerprint(sys: &System) -> Result<HashValue, CodecError> {
    let bytes = serde_cbor::to_vec(sys)?;
    Ok(HashValue::hash_with_domain(b"SYSTEM", &bytes))
}

/// Fingerprint of a context's configuration. The oracle is not part of it.
pub fn context_fingerprint(ctxt: &ProofContext) -> Result<HashValue, CodecError> {
    let bytes = serde_cbor::to_vec(ctxt.config())?;
    Ok(HashValue::hash_with_domain(b"PROOF_CONTEXT", &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProofConfig;
    use crate::core::CaseDistKind;
    use crate::oracle::syntactic::SyntacticOracle;
    use std::sync::Arc;

    #[test]
    fn domains_separate() {
        assert_ne!(
            HashValue::hash_with_domain(b"A", b"x"),
            HashValue::hash_with_domain(b"B", b"x")
        );
    }

    #[test]
    fn systems_hash_by_content() {
        let a = System::empty(CaseDistKind::Untyped, false);
        let b = System::empty(CaseDistKind::Typed, false);
        assert_eq!(system_fingerprint(&a).unwrap(), system_fingerprint(&a.clone()).unwrap());
        assert_ne!(system_fingerprint(&a).unwrap(), system_fingerprint(&b).unwrap());
    }

    #[test]
    fn context_fingerprint_ignores_oracle_instance() {
        let c1 = ProofContext::new(ProofConfig::new("p"), Arc::new(SyntacticOracle::new()));
        let c2 = ProofContext::new(ProofConfig::new("p"), Arc::new(SyntacticOracle::new()));
        let c3 = ProofContext::new(ProofConfig::new("q"), Arc::new(SyntacticOracle::new()));
        assert_eq!(context_fingerprint(&c1).unwrap(), context_fingerprint(&c2).unwrap());
        assert_ne!(context_fingerprint(&c1).unwrap(), context_fingerprint(&c3).unwrap());
    }
}
