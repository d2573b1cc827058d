//! API-side authorization guard for commands.
//!
//! Enforces authorization at the command boundary (before dispatch), while
//! keeping domain aggregates and infra auth-agnostic.

use coursepay_auth::{
    AuthzError, CommandAuthorization, Permission, Principal, TenantMembership, authorize,
};

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for a command in the current request context.
///
/// Intended to be called **before** dispatching a command.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Minimal role→permission mapping.
///
/// Intentionally simple until a real policy source exists: "admin" grants
/// everything in the tenant; "billing" grants the payment-engine surface.
fn permissions_from_roles(roles: &[coursepay_auth::Role]) -> Vec<Permission> {
    let mut perms = Vec::new();
    for role in roles {
        match role.as_str() {
            "admin" => return vec![Permission::new("*")],
            "billing" => {
                perms.extend([
                    Permission::new("plans.read"),
                    Permission::new("enrollments.read"),
                    Permission::new("enrollments.manage"),
                    Permission::new("enrollments.charge"),
                ]);
            }
            _ => {}
        }
    }
    perms
}
