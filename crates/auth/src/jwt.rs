//! Bearer token decoding.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use thiserror::Error;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("malformed or badly signed token: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Turns a raw bearer token into validated claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError>;
}

/// HMAC-SHA256 shared-secret validator.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Our claims carry RFC 3339 `issued_at`/`expires_at` instead of the
        // registered numeric `exp`; `validate_claims` checks the window.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation)?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchpos_core::{BranchId, TenantId, UserId};
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use crate::Role;

    fn token(secret: &str, expires_in: Duration) -> (String, JwtClaims) {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: UserId::new(),
            tenant_id: TenantId::new(),
            branch_id: Some(BranchId::new()),
            roles: vec![Role::new("manager")],
            issued_at: now - Duration::seconds(1),
            expires_at: now + expires_in,
        };
        let raw = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (raw, claims)
    }

    #[test]
    fn valid_token_round_trips_claims() {
        let (raw, claims) = token("s3cret", Duration::minutes(5));
        let validator = Hs256JwtValidator::new("s3cret");
        assert_eq!(validator.validate(&raw, Utc::now()).unwrap(), claims);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (raw, _) = token("s3cret", Duration::minutes(5));
        let validator = Hs256JwtValidator::new("other");
        assert!(matches!(validator.validate(&raw, Utc::now()), Err(JwtError::Decode(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let (raw, _) = token("s3cret", Duration::minutes(5));
        let validator = Hs256JwtValidator::new("s3cret");
        let later = Utc::now() + Duration::minutes(6);
        assert!(matches!(
            validator.validate(&raw, later),
            Err(JwtError::Claims(TokenValidationError::Expired))
        ));
    }
}
