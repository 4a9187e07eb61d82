//! Role names carried in the `roles` claim.

pub const ADMIN: &str = "admin";
pub const STORE_OWNER: &str = "store_owner";
pub const CUSTOMER: &str = "customer";

/// Roles allowed to operate the inventory dashboard.
pub const SELLER_ROLES: &[&str] = &[ADMIN, STORE_OWNER];

pub fn is_known(role: &str) -> bool {
    matches!(role, ADMIN | STORE_OWNER | CUSTOMER)
}
