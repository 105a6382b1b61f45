//! Identity token signing.
//!
//! Tokens are three dot-joined segments: header, claims and an ES256
//! signature over the first two. Segments use padded URL-safe base64, which
//! is what the emulated load balancer emits, so consumers that insist on
//! unpadded JWTs must strip the `=` themselves.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{EncodePublicKey, LineEnding};
use serde_json::{Map, Value};

use crate::error::{AlbError, AlbResult};

/// Fixed-size ES256 signature length: `r` and `s`, 32 bytes each.
pub const SIGNATURE_LEN: usize = 64;

/// An ES256 token signer with a key identifier.
pub struct TokenSigner {
    key: SigningKey,
    key_id: String,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Generates a fresh P-256 key from the OS random source.
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
            key_id: key_id.into(),
        }
    }

    /// Key identifier placed in token headers.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public half of the key.
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }

    /// The public key as a PEM `PUBLIC KEY` block.
    pub fn public_key_pem(&self) -> AlbResult<String> {
        self.verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| AlbError::signing(err.to_string()))
    }

    /// Signs `header` and `claims` into a compact token.
    pub fn sign(&self, header: &Map<String, Value>, claims: &Map<String, Value>) -> AlbResult<String> {
        let header = URL_SAFE.encode(serde_json::to_vec(header)?);
        let claims = URL_SAFE.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{header}.{claims}");

        let signature: Signature = self.key.sign(signing_input.as_bytes());
        let signature = URL_SAFE.encode(signature.to_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }
}

/// Checks a token produced by [`TokenSigner::sign`] and returns its header
/// and claims.
pub fn verify(
    token: &str,
    key: &VerifyingKey,
) -> AlbResult<(Map<String, Value>, Map<String, Value>)> {
    let mut segments = token.split('.');
    let (Some(header), Some(claims), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AlbError::signing("token must have three segments"));
    };

    let raw = URL_SAFE
        .decode(signature)
        .map_err(|err| AlbError::signing(err.to_string()))?;
    if raw.len() != SIGNATURE_LEN {
        return Err(AlbError::signing(format!(
            "signature is {} bytes, expected {SIGNATURE_LEN}",
            raw.len()
        )));
    }
    let signature =
        Signature::from_slice(&raw).map_err(|err| AlbError::signing(err.to_string()))?;
    key.verify(format!("{header}.{claims}").as_bytes(), &signature)
        .map_err(|err| AlbError::signing(err.to_string()))?;

    Ok((decode_segment(header)?, decode_segment(claims)?))
}

fn decode_segment(segment: &str) -> AlbResult<Map<String, Value>> {
    let bytes = URL_SAFE
        .decode(segment)
        .map_err(|err| AlbError::signing(err.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}
