//! JWT verification for handshake tokens.

use crate::error::ServerError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use universe::UserId;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Claims read from a verified token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Subject, the user id the token was issued to
    #[serde(default)]
    pub sub: String,

    /// Expiry as seconds since the unix epoch
    #[serde(default)]
    pub exp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

/// Checks a handshake token and returns its claims.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, ServerError>;
}

/// Verifies compact JWTs signed with HMAC-SHA256 under a shared secret.
pub struct Hs256Verifier {
    secret: Vec<u8>,
}

impl Hs256Verifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }
}

impl TokenVerifier for Hs256Verifier {
    fn verify(&self, token: &str) -> Result<Claims, ServerError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::Auth("malformed token".to_string()));
        };

        let header: Header = serde_json::from_slice(&decode_segment(header)?)
            .map_err(|e| ServerError::Auth(format!("bad token header: {e}")))?;
        if header.alg != "HS256" {
            return Err(ServerError::Auth(format!(
                "unsupported signing algorithm {}",
                header.alg
            )));
        }

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServerError::Internal(format!("invalid signing key: {e}")))?;
        mac.update(token[..header_and_payload_len(token)].as_bytes());
        mac.verify_slice(&decode_segment(signature)?)
            .map_err(|_| ServerError::Auth("bad token signature".to_string()))?;

        let claims: Claims = serde_json::from_slice(&decode_segment(payload)?)
            .map_err(|e| ServerError::Auth(format!("bad token claims: {e}")))?;
        if let Some(exp) = claims.exp {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if exp <= now {
                return Err(ServerError::Auth("token expired".to_string()));
            }
        }
        Ok(claims)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, ServerError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ServerError::Auth(format!("bad token encoding: {e}")))
}

/// Length of the signed `header.payload` prefix.
fn header_and_payload_len(token: &str) -> usize {
    token.rfind('.').unwrap_or(token.len())
}

/// Accepts `claims` for a client claiming to be `user_id`.
///
/// The subject must equal the user id, unless it is one of the `bypass`
/// subjects kept for older clients.
pub fn authorize(claims: &Claims, user_id: &UserId, bypass: &[Uuid]) -> Result<(), ServerError> {
    let subject = Uuid::parse_str(&claims.sub)
        .map_err(|_| ServerError::Auth(format!("token subject {:?} is not a user id", claims.sub)))?;
    if subject == user_id.0 || bypass.contains(&subject) {
        Ok(())
    } else {
        Err(ServerError::Auth(format!(
            "token subject {subject} does not match user {user_id}"
        )))
    }
}

/// Issues an HS256 token, for tests.
#[cfg(test)]
pub(crate) fn sign(secret: &str, claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let signed = format!("{header}.{payload}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signed.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{signed}.{signature}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_token_yields_claims() {
        let user = Uuid::new_v4();
        let token = sign("secret", &json!({"sub": user.to_string(), "exp": u64::MAX / 2}));
        let claims = Hs256Verifier::new("secret").verify(&token).unwrap();
        assert_eq!(claims.sub, user.to_string());
    }

    #[test]
    fn test_rejects_wrong_secret_and_tampering() {
        let token = sign("secret", &json!({"sub": Uuid::new_v4().to_string()}));
        assert!(matches!(
            Hs256Verifier::new("other").verify(&token),
            Err(ServerError::Auth(_))
        ));

        let forged_payload = URL_SAFE_NO_PAD.encode(json!({"sub": Uuid::new_v4().to_string()}).to_string());
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_payload;
        assert!(Hs256Verifier::new("secret").verify(&parts.join(".")).is_err());

        assert!(Hs256Verifier::new("secret").verify("not-a-token").is_err());
    }

    #[test]
    fn test_rejects_expired_token() {
        let token = sign("secret", &json!({"sub": Uuid::new_v4().to_string(), "exp": 1}));
        let err = Hs256Verifier::new("secret").verify(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_authorize_matches_subject_or_bypass() {
        let user = UserId::new();
        let bypass = Uuid::new_v4();
        let claims = |sub: String| Claims { sub, exp: None };

        assert!(authorize(&claims(user.0.to_string()), &user, &[]).is_ok());
        assert!(authorize(&claims(Uuid::new_v4().to_string()), &user, &[]).is_err());
        assert!(authorize(&claims(bypass.to_string()), &user, &[bypass]).is_ok());
        assert!(authorize(&claims("nobody".to_string()), &user, &[bypass]).is_err());
    }
}
