//! Local verification of signed tokens

use std::sync::Arc;

use aliri::{
    error::{ClaimsRejected, JwtVerifyError},
    jwa, jwt, Jwk,
};
use aliri_base64::Base64UrlRef;

use crate::{tokens::SessionClaims, TokenRejection};

/// Verifies that a token is well-formed, signed with the shared secret, and
/// unexpired
///
/// Verification fails closed: anything that cannot be positively verified is
/// rejected.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    key: Arc<Jwk>,
    core: jwt::CoreValidator,
}

impl TokenValidator {
    /// Validates HS256 tokens signed with `secret`
    pub fn hs256(secret: impl AsRef<[u8]>) -> Self {
        let secret = Base64UrlRef::from_slice(secret.as_ref()).to_owned();
        let key = Jwk::from(jwa::Hmac::new(secret)).with_algorithm(jwa::Algorithm::HS256);

        Self {
            key: Arc::new(key),
            core: jwt::CoreValidator::default()
                .add_approved_algorithm(jwa::Algorithm::HS256)
                .check_expiration(),
        }
    }

    /// A validator that accepts authentic tokens even once they have expired
    ///
    /// Used by an authority to identify the bearer of a refresh request.
    pub fn ignoring_expiry(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            core: self.core.clone().ignore_expiration(),
        }
    }

    /// Whether the token is authentic and unexpired
    pub fn validate(&self, token: &str) -> bool {
        self.inspect(token).is_ok()
    }

    /// Verifies the token and returns its claims
    ///
    /// # Errors
    ///
    /// Returns the reason the token was rejected.
    pub fn inspect(&self, token: &str) -> Result<SessionClaims, TokenRejection> {
        if token.is_empty() {
            return Err(TokenRejection::Malformed);
        }

        let validated: jwt::Validated<SessionClaims> = jwt::JwtRef::from_str(token)
            .verify(self.key.as_ref(), &self.core)
            .map_err(rejection_for)?;

        let (_, claims) = validated.extract();
        Ok(claims)
    }

    pub(crate) fn key(&self) -> &Jwk {
        &self.key
    }
}

fn rejection_for(error: JwtVerifyError) -> TokenRejection {
    match error {
        JwtVerifyError::ClaimsRejected(ClaimsRejected::TokenExpired) => TokenRejection::Expired,
        JwtVerifyError::JwkVerifyError(_)
        | JwtVerifyError::ClaimsRejected(ClaimsRejected::InvalidAlgorithm) => {
            TokenRejection::SignatureInvalid
        }
        _ => TokenRejection::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aliri_clock::{Clock, System, UnixTime};

    use super::*;
    use crate::TokenIssuer;

    const SECRET: &[u8] = b"mysecretkey";

    fn issuer() -> TokenIssuer {
        TokenIssuer::hs256(SECRET)
    }

    fn claims(issued: UnixTime, ttl: u64) -> SessionClaims {
        SessionClaims::new("1", "admin", issued, Duration::from_secs(ttl))
    }

    #[test]
    fn accepts_authentic_unexpired_token() {
        let token = issuer().sign(&claims(System.now(), 3_600)).unwrap();
        let validator = TokenValidator::hs256(SECRET);

        assert!(validator.validate(token.as_str()));
        let inspected = validator.inspect(token.as_str()).unwrap();
        assert_eq!(inspected.username().as_str(), "admin");
    }

    #[test]
    fn rejects_missing_token() {
        let validator = TokenValidator::hs256(SECRET);
        assert_eq!(validator.inspect(""), Err(TokenRejection::Malformed));
    }

    #[test]
    fn rejects_garbage() {
        let validator = TokenValidator::hs256(SECRET);
        assert_eq!(validator.inspect("not-a-jwt"), Err(TokenRejection::Malformed));
        assert_eq!(validator.inspect("a.b.c"), Err(TokenRejection::Malformed));
    }

    #[test]
    fn rejects_token_signed_with_another_secret() {
        let token = TokenIssuer::hs256(b"someothersecret")
            .sign(&claims(System.now(), 3_600))
            .unwrap();
        let validator = TokenValidator::hs256(SECRET);

        assert_eq!(
            validator.inspect(token.as_str()),
            Err(TokenRejection::SignatureInvalid)
        );
    }

    #[test]
    fn rejects_token_with_tampered_payload() {
        let token = issuer().sign(&claims(System.now(), 3_600)).unwrap();
        let other = issuer().sign(&claims(System.now(), 7_200)).unwrap();

        let mut parts: Vec<&str> = token.as_str().split('.').collect();
        let other_payload = other.as_str().split('.').nth(1).unwrap();
        parts[1] = other_payload;
        let tampered = parts.join(".");

        let validator = TokenValidator::hs256(SECRET);
        assert_eq!(
            validator.inspect(&tampered),
            Err(TokenRejection::SignatureInvalid)
        );
    }

    #[test]
    fn rejects_expired_token() {
        let now = System.now();
        let token = issuer()
            .sign(&claims(UnixTime(now.0 - 7_200), 3_600))
            .unwrap();
        let validator = TokenValidator::hs256(SECRET);

        assert!(!validator.validate(token.as_str()));
        assert_eq!(
            validator.inspect(token.as_str()),
            Err(TokenRejection::Expired)
        );
    }

    #[test]
    fn ignoring_expiry_still_checks_signature() {
        let now = System.now();
        let expired = issuer()
            .sign(&claims(UnixTime(now.0 - 7_200), 3_600))
            .unwrap();
        let forged = TokenIssuer::hs256(b"someothersecret")
            .sign(&claims(UnixTime(now.0 - 7_200), 3_600))
            .unwrap();
        let lenient = TokenValidator::hs256(SECRET).ignoring_expiry();

        assert!(lenient.validate(expired.as_str()));
        assert!(!lenient.validate(forged.as_str()));
    }
}
