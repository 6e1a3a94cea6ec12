//! Bearer-token verification for the realtime gateway.
//!
//! Token issuance belongs to the external auth service; the gateway only
//! verifies. A token is `base64url(claims JSON) . base64url(HMAC-SHA256)`
//! over a shared secret. The gateway tries the access token first and
//! falls back to the refresh token when the access token is expired; any
//! other failure rejects the connection before session state exists.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use whiteboard_core::UserId;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a signed bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: UserId,
    /// Display name
    pub name: String,
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Signature checks out but the token is past its expiry. The caller
    /// may retry with a refresh token.
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Verifies signed bearer tokens presented at the WebSocket handshake.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HMAC-SHA256 token verifier over a shared secret.
pub struct HmacTokenVerifier {
    secret: Vec<u8>,
}

impl HmacTokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac key");
        mac.update(payload);
        mac
    }

    /// Produce a signed token for the given claims. The real issuer is an
    /// external service; this exists for tests and local tooling.
    pub fn sign(&self, claims: &Claims) -> String {
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims serialize"));
        let signature = URL_SAFE_NO_PAD.encode(self.mac(payload.as_bytes()).finalize().into_bytes());
        format!("{payload}.{signature}")
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Invalid("malformed token".into()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Invalid("malformed signature".into()))?;
        self.mac(payload.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| TokenError::Invalid("signature mismatch".into()))?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| TokenError::Invalid("malformed claims".into()))?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp_offset_secs: i64) -> Claims {
        Claims {
            sub: "u1".to_string(),
            name: "alice".to_string(),
            exp: Utc::now().timestamp() + exp_offset_secs,
        }
    }

    #[test]
    fn valid_token_round_trips() {
        let verifier = HmacTokenVerifier::new("secret");
        let token = verifier.sign(&claims(3600));

        let verified = verifier.verify(&token).unwrap();
        assert_eq!(verified.sub, "u1");
        assert_eq!(verified.name, "alice");
    }

    #[test]
    fn expired_token_is_distinguished_from_invalid() {
        let verifier = HmacTokenVerifier::new("secret");

        let expired = verifier.sign(&claims(-10));
        assert_eq!(verifier.verify(&expired).unwrap_err(), TokenError::Expired);

        assert!(matches!(
            verifier.verify("garbage").unwrap_err(),
            TokenError::Invalid(_)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = HmacTokenVerifier::new("secret-a");
        let verifier = HmacTokenVerifier::new("secret-b");

        let token = issuer.sign(&claims(3600));
        assert!(matches!(
            verifier.verify(&token).unwrap_err(),
            TokenError::Invalid(_)
        ));
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let verifier = HmacTokenVerifier::new("secret");
        let token = verifier.sign(&claims(3600));

        let (_, signature) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: "attacker".to_string(),
                name: "mallory".to_string(),
                exp: Utc::now().timestamp() + 3600,
            })
            .unwrap(),
        );
        let forged = format!("{forged_payload}.{signature}");
        assert!(matches!(
            verifier.verify(&forged).unwrap_err(),
            TokenError::Invalid(_)
        ));
    }
}
