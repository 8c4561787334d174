//! Arweave JWK wallet: RSA-4096 key used to sign data items.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::rand_core::OsRng;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::DataItemError;

/// Byte length of an Arweave owner (RSA-4096 modulus).
pub const OWNER_LEN: usize = 512;

#[derive(Deserialize)]
struct Jwk {
    kty: String,
    n: String,
    e: String,
    d: String,
    p: String,
    q: String,
}

/// A loaded signing wallet.
pub struct Wallet {
    signing_key: BlindedSigningKey<Sha256>,
    owner: Vec<u8>,
}

impl Wallet {
    /// Load a JWK wallet from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DataItemError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_jwk_json(&raw)
    }

    /// Parse a JWK wallet from its JSON representation.
    pub fn from_jwk_json(raw: &str) -> Result<Self, DataItemError> {
        let jwk: Jwk = serde_json::from_str(raw)?;
        if jwk.kty != "RSA" {
            return Err(DataItemError::Wallet(format!(
                "unsupported key type '{}'",
                jwk.kty
            )));
        }

        let n = decode_uint("n", &jwk.n)?;
        let e = decode_uint("e", &jwk.e)?;
        let d = decode_uint("d", &jwk.d)?;
        let p = decode_uint("p", &jwk.p)?;
        let q = decode_uint("q", &jwk.q)?;

        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])?;
        key.validate()?;

        let owner = key.n().to_bytes_be();
        if owner.len() != OWNER_LEN {
            return Err(DataItemError::UnsupportedKeySize(owner.len()));
        }

        Ok(Self {
            signing_key: BlindedSigningKey::<Sha256>::new(key),
            owner,
        })
    }

    /// Raw public modulus, as embedded in every data item.
    pub fn owner(&self) -> &[u8] {
        &self.owner
    }

    /// Wallet address: base64url(SHA-256(owner)).
    pub fn address(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(&self.owner))
    }

    /// RSA-PSS (SHA-256) signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign_with_rng(&mut OsRng, message).to_vec()
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Verify an RSA-PSS signature against a raw owner modulus.
pub fn verify_signature(owner: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) =
        RsaPublicKey::new(BigUint::from_bytes_be(owner), BigUint::from(65_537u32))
    else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(public_key)
        .verify(message, &signature)
        .is_ok()
}

fn decode_uint(field: &'static str, value: &str) -> Result<BigUint, DataItemError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|source| DataItemError::Base64 { field, source })?;
    Ok(BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/test-wallet.json");

    #[test]
    fn test_load_fixture_wallet() {
        let wallet = Wallet::from_jwk_json(FIXTURE).unwrap();
        assert_eq!(wallet.owner().len(), OWNER_LEN);
        assert_eq!(wallet.address().len(), 43);
    }

    #[test]
    fn test_sign_and_verify() {
        let wallet = Wallet::from_jwk_json(FIXTURE).unwrap();
        let signature = wallet.sign(b"message");
        assert_eq!(signature.len(), OWNER_LEN);
        assert!(verify_signature(wallet.owner(), b"message", &signature));
        assert!(!verify_signature(wallet.owner(), b"other", &signature));
    }

    #[test]
    fn test_rejects_non_rsa_key() {
        let err = Wallet::from_jwk_json(
            r#"{"kty":"EC","n":"AQ","e":"AQAB","d":"AQ","p":"AQ","q":"AQ"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DataItemError::Wallet(_)));
    }
}
