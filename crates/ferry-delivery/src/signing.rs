//! HMAC-SHA256 signatures over outbound request bodies.
//!
//! The signature is computed over the exact bytes placed in the request
//! body. [`SignedBody`] ties the two together so no re-serialization can
//! happen between signing and sending.

use std::fmt;

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signing and verification errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The shared secret is empty.
    EmptySecret,
    /// The signature is not hex, optionally prefixed with `sha256=`.
    InvalidFormat(String),
    /// The signature does not match the payload.
    VerificationFailed,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySecret => write!(f, "signing secret is empty"),
            Self::InvalidFormat(reason) => write!(f, "invalid signature format: {reason}"),
            Self::VerificationFailed => write!(f, "signature verification failed"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Signs `payload` with `secret`, returning the lowercase hex digest.
///
/// # Errors
///
/// Returns `SignatureError::EmptySecret` for an empty secret.
///
/// # Example
///
/// ```
/// use ferry_delivery::signing::sign;
///
/// let signature = sign("s3cret", br#"{"trigger_code":"BILL_VALIDATE"}"#).unwrap();
/// assert_eq!(signature.len(), 64);
/// ```
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac = mac_for(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex signature, accepting an optional `sha256=` prefix.
///
/// Comparison is constant-time.
///
/// # Errors
///
/// Returns `InvalidFormat` for non-hex input and `VerificationFailed` when
/// the digest does not match.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> Result<(), SignatureError> {
    let hex_signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(hex_signature)
        .map_err(|e| SignatureError::InvalidFormat(e.to_string()))?;

    let mut mac = mac_for(secret)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| SignatureError::VerificationFailed)
}

fn mac_for(secret: &str) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::EmptySecret)
}

/// A request body paired with its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBody {
    body: Bytes,
    signature: String,
}

impl SignedBody {
    /// Signs `body` with `secret`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::EmptySecret` for an empty secret.
    pub fn new(secret: &str, body: Bytes) -> Result<Self, SignatureError> {
        let signature = sign(secret, &body)?;
        Ok(Self { body, signature })
    }

    /// Bytes that were signed and must be sent unchanged.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Lowercase hex HMAC-SHA256 of [`SignedBody::body`].
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let signature = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn empty_secret_rejected() {
        assert_eq!(sign("", b"payload"), Err(SignatureError::EmptySecret));
        assert_eq!(SignedBody::new("", Bytes::new()), Err(SignatureError::EmptySecret));
    }

    #[test]
    fn verify_accepts_raw_and_prefixed() {
        let body = br#"{"trigger_code":"DOC_VALIDATE","object":{"id":42}}"#;
        let signature = sign("secret", body).unwrap();

        assert!(verify("secret", body, &signature).is_ok());
        assert!(verify("secret", body, &format!("sha256={signature}")).is_ok());
    }

    #[test]
    fn verify_rejects_tampering() {
        let signature = sign("secret", b"original").unwrap();

        let failed = Err(SignatureError::VerificationFailed);
        assert_eq!(verify("secret", b"tampered", &signature), failed);
        assert_eq!(verify("other", b"original", &signature), failed);

        let malformed = verify("secret", b"original", "zz");
        assert!(matches!(malformed, Err(SignatureError::InvalidFormat(_))));
    }

    #[test]
    fn signed_body_keeps_exact_bytes() {
        let body = Bytes::from_static(b"{\"a\": 1}");
        let signed = SignedBody::new("secret", body.clone()).unwrap();

        assert_eq!(signed.body(), &body);
        assert_eq!(signed.signature(), sign("secret", &body).unwrap());
    }
}
