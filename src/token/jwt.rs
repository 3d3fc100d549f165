//! HS256 token encoding.
//!
//! Expiry and issued-at are checked here instead of by `jsonwebtoken` so that
//! tokens without `exp` (issued with a zero max age) stay valid and the clock
//! skew applies to both bounds.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

use super::TokenKind;
use crate::error::AuthenticationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub token_type: TokenKind,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Random id so two tokens minted in the same second differ.
    pub jti: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

#[derive(Clone)]
pub struct JwtCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    skew: i64,
}

impl JwtCodec {
    #[must_use]
    pub fn new(secret: &SecretString, maximum_clock_skew: Duration) -> Self {
        let key = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            skew: i64::try_from(maximum_clock_skew.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// # Errors
    /// Returns `TokenInvalid` if signing fails.
    pub fn encode(&self, claims: &Claims) -> Result<String, AuthenticationError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|err| AuthenticationError::TokenInvalid(err.to_string()))
    }

    /// Verify the signature and time bounds of `token` at unix time `now`.
    ///
    /// # Errors
    /// Returns `TokenInvalid` for bad signatures, malformed tokens, expired
    /// tokens and tokens issued in the future.
    pub fn decode(&self, token: &str, now: i64) -> Result<Claims, AuthenticationError> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| AuthenticationError::TokenInvalid(err.to_string()))?
            .claims;

        if let Some(exp) = claims.exp {
            if now > exp.saturating_add(self.skew) {
                return Err(AuthenticationError::TokenInvalid(
                    "token is expired".to_string(),
                ));
            }
        }
        if claims.iat > now.saturating_add(self.skew) {
            return Err(AuthenticationError::TokenInvalid(
                "token used before issued".to_string(),
            ));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(secret: &str) -> JwtCodec {
        JwtCodec::new(&SecretString::from(secret), Duration::from_secs(10))
    }

    fn claims(iat: i64, exp: Option<i64>) -> Claims {
        Claims {
            sub: "alice".to_string(),
            token_type: TokenKind::Access,
            iat,
            exp,
            jti: "1".to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn decodes_what_it_encodes() {
        let codec = codec("secret");
        let token = codec.encode(&claims(1_000, Some(2_000))).unwrap();
        assert_eq!(codec.decode(&token, 1_500).unwrap().sub, "alice");
    }

    #[test]
    fn expiry_honours_skew() {
        let codec = codec("secret");
        let token = codec.encode(&claims(1_000, Some(2_000))).unwrap();
        assert!(codec.decode(&token, 2_010).is_ok());
        assert!(codec.decode(&token, 2_011).is_err());
    }

    #[test]
    fn future_tokens_are_rejected() {
        let codec = codec("secret");
        let token = codec.encode(&claims(1_000, None)).unwrap();
        assert!(codec.decode(&token, 995).is_ok());
        assert!(codec.decode(&token, 980).is_err());
    }

    #[test]
    fn missing_expiry_never_expires() {
        let codec = codec("secret");
        let token = codec.encode(&claims(1_000, None)).unwrap();
        assert!(codec.decode(&token, i64::MAX / 2).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = codec("secret").encode(&claims(1_000, None)).unwrap();
        assert!(matches!(
            codec("other").decode(&token, 1_000),
            Err(AuthenticationError::TokenInvalid(_))
        ));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let codec = codec("secret");
        let token = codec.encode(&claims(1_000, None)).unwrap();
        let forged = codec
            .encode(&Claims {
                sub: "mallory".to_string(),
                ..claims(1_000, None)
            })
            .unwrap();
        let (header_and_payload, _) = forged.rsplit_once('.').unwrap();
        let (_, signature) = token.rsplit_once('.').unwrap();
        let spliced = format!("{header_and_payload}.{signature}");
        assert!(codec.decode(&spliced, 1_000).is_err());
    }
}
