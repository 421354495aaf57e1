//! Identity Factory - fresh Ed25519 signing identities with derived
//! address and recovery phrase. No network, no persistence; callers own
//! both.

use std::collections::HashSet;

use base64::Engine as _;
use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// OS entropy source failure. Non-retriable; abort the current run.
    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("recovery phrase derivation failed: {0}")]
    Phrase(String),
}

/// One provisioned unit of work: a signing key pair plus everything the
/// registration handshake and conversation loop hang off it.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Derived public identifier, `0x` + 40 hex chars.
    pub address: String,
    /// Hex-encoded 32-byte signing seed.
    pub secret_key: String,
    /// 24-word mnemonic over the signing seed.
    pub recovery_phrase: String,
    /// Set only after the full four-step handshake succeeds.
    pub registered: bool,
    /// Completed conversation turns, capped at the per-identity limit.
    pub chat_count: u32,
    pub session_token: Option<String>,
    pub topics: Vec<String>,
    pub used_topics: HashSet<String>,
    pub proxy_ref: Option<String>,
}

/// Generate a fresh identity from OS entropy.
pub fn create_identity() -> Result<Identity, IdentityError> {
    let mut seed = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| IdentityError::Entropy(e.to_string()))?;

    let signing = SigningKey::from_bytes(&seed);
    let verifying = signing.verifying_key();

    let digest = Sha256::digest(verifying.as_bytes());
    let address = format!("0x{}", hex::encode(&digest[12..]));

    let phrase = bip39::Mnemonic::from_entropy(&seed)
        .map_err(|e| IdentityError::Phrase(e.to_string()))?
        .to_string();

    Ok(Identity {
        address,
        secret_key: hex::encode(seed),
        recovery_phrase: phrase,
        registered: false,
        chat_count: 0,
        session_token: None,
        topics: Vec::new(),
        used_topics: HashSet::new(),
        proxy_ref: None,
    })
}

impl Identity {
    /// Sign `message` with this identity's key; base64 of the raw
    /// Ed25519 signature bytes.
    pub fn sign(&self, message: &str) -> String {
        // secret_key is always the hex we produced in create_identity
        let mut seed = [0u8; 32];
        hex::decode_to_slice(&self.secret_key, &mut seed)
            .expect("identity secret key is 32 hex-encoded bytes");
        let signing = SigningKey::from_bytes(&seed);
        let signature = signing.sign(message.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn fresh_identity_is_well_formed() {
        let identity = create_identity().unwrap();
        assert!(identity.address.starts_with("0x"));
        assert_eq!(identity.address.len(), 42);
        assert_eq!(identity.secret_key.len(), 64);
        assert_eq!(identity.recovery_phrase.split_whitespace().count(), 24);
        assert!(!identity.registered);
        assert_eq!(identity.chat_count, 0);
        assert!(identity.session_token.is_none());
    }

    #[test]
    fn identities_are_unique() {
        let a = create_identity().unwrap();
        let b = create_identity().unwrap();
        assert_ne!(a.address, b.address);
        assert_ne!(a.secret_key, b.secret_key);
    }

    #[test]
    fn signature_verifies_against_derived_key() {
        let identity = create_identity().unwrap();
        let encoded = identity.sign("Welcome to Quack AI");

        let mut seed = [0u8; 32];
        hex::decode_to_slice(&identity.secret_key, &mut seed).unwrap();
        let verifying: VerifyingKey = SigningKey::from_bytes(&seed).verifying_key();

        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let signature = Signature::from_slice(&raw).unwrap();
        verifying
            .verify("Welcome to Quack AI".as_bytes(), &signature)
            .unwrap();
    }
}
