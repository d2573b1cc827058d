//! Time-bounded enrollment tokens for unauthenticated checkout flows.
//!
//! An enrollee completing onboarding has no back-office account. They hold
//! a short-lived HS256 token scoped to exactly one enrollment, minted when
//! the checkout link is issued. Every enrollment-scoped operation invoked
//! with such a token is authorized against the token's tenant and
//! enrollment ids, never against request parameters alone.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use coursepay_core::{AggregateId, TenantId};

use crate::claims::{TokenValidationError, check_window};

/// Claims carried by an enrollment checkout token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentTokenClaims {
    pub tenant_id: TenantId,
    pub enrollment_id: AggregateId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Mint a checkout token for one enrollment, valid for `ttl`.
pub fn mint_enrollment_token(
    secret: &[u8],
    tenant_id: TenantId,
    enrollment_id: AggregateId,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<String, TokenValidationError> {
    let claims = EnrollmentTokenClaims {
        tenant_id,
        enrollment_id,
        issued_at: now,
        expires_at: now + ttl,
    };

    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret),
    )
    .map_err(|e| TokenValidationError::Malformed(e.to_string()))
}

/// Decode and validate a checkout token.
pub fn validate_enrollment_token(
    secret: &[u8],
    token: &str,
    now: DateTime<Utc>,
) -> Result<EnrollmentTokenClaims, TokenValidationError> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;

    let data = jsonwebtoken::decode::<EnrollmentTokenClaims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret),
        &validation,
    )
    .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;

    check_window(data.claims.issued_at, data.claims.expires_at, now)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_inside_window() {
        let now = Utc::now();
        let tenant = TenantId::new();
        let enrollment = AggregateId::new();

        let token =
            mint_enrollment_token(b"secret", tenant, enrollment, now, Duration::minutes(30))
                .unwrap();
        let claims = validate_enrollment_token(b"secret", &token, now).unwrap();

        assert_eq!(claims.tenant_id, tenant);
        assert_eq!(claims.enrollment_id, enrollment);
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let token = mint_enrollment_token(
            b"secret",
            TenantId::new(),
            AggregateId::new(),
            now - Duration::hours(2),
            Duration::minutes(30),
        )
        .unwrap();

        assert_eq!(
            validate_enrollment_token(b"secret", &token, now),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let now = Utc::now();
        let token = mint_enrollment_token(
            b"secret",
            TenantId::new(),
            AggregateId::new(),
            now,
            Duration::minutes(30),
        )
        .unwrap();

        assert!(matches!(
            validate_enrollment_token(b"other-secret", &token, now),
            Err(TokenValidationError::Malformed(_))
        ));
    }
}
