//! `coursepay-auth` — authentication/authorization boundary (zero-trust).
//!
//! Decoupled from HTTP and storage. Two caller populations exist:
//! back-office admins (JWT + RBAC) and unauthenticated enrollees holding a
//! time-bounded enrollment token minted for a single enrollment's checkout.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod token;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
pub use token::{EnrollmentTokenClaims, mint_enrollment_token, validate_enrollment_token};
