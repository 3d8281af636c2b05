//! Caller identity.
//!
//! The front proxy authenticates the caller and forwards the identity in a
//! request header (`X-AuthUser` by default), usually as `user@realm`. Only the
//! part before the first `@` is used.

use std::collections::HashSet;

/// The resolved caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user: String,
    pub is_admin: bool,
}

impl Principal {
    /// Resolves a forwarded identity. A missing header should be passed as
    /// `""`, which yields an anonymous, non-admin principal that matches no
    /// user data.
    pub fn resolve(identity: &str, admins: &HashSet<String>) -> Self {
        let user = identity
            .split_once('@')
            .map_or(identity, |(user, _)| user)
            .to_string();
        let is_admin = !user.is_empty() && admins.contains(&user);
        Self { user, is_admin }
    }

    /// Whether this principal may see `other`'s data.
    /// No identity header, or one with nothing before the `@`.
    pub fn is_anonymous(&self) -> bool {
        self.user.is_empty()
    }

    pub fn can_view(&self, other: &str) -> bool {
        self.is_admin || (!self.is_anonymous() && self.user == other)
    }
}
