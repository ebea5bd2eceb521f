//! Caller identity consumed by the store: tenant id and admin flag.

use std::time::{Duration, Instant};

/// Role that grants admin scope, matched case-insensitively.
pub const ADMIN_ROLE: &str = "admin";

/// Opaque per-request capability. The store reads it, never persists it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContext {
    tenant_id: String,
    is_admin: bool,
}

impl AuthContext {
    pub fn admin() -> Self {
        AuthContext {
            tenant_id: String::new(),
            is_admin: true,
        }
    }

    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        AuthContext {
            tenant_id: tenant_id.into(),
            is_admin: false,
        }
    }

    /// Derive from upstream identity data.
    pub fn from_roles<I, S>(tenant_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let is_admin = roles
            .into_iter()
            .any(|r| r.as_ref().trim().eq_ignore_ascii_case(ADMIN_ROLE));
        AuthContext {
            tenant_id: tenant_id.into(),
            is_admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Sharing principal naming this caller's tenant.
    pub fn share_principal(&self) -> String {
        format!("tenant:{}", self.tenant_id)
    }
}

/// Per-call context: who is calling and by when the call must finish.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub auth: AuthContext,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(auth: AuthContext) -> Self {
        RequestContext { auth, deadline: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl From<AuthContext> for RequestContext {
    fn from(auth: AuthContext) -> Self {
        RequestContext::new(auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_role_is_case_insensitive() {
        let ctx = AuthContext::from_roles("t1", ["Member", " ADMIN "]);
        assert!(ctx.is_admin());
        assert_eq!(ctx.tenant_id(), "t1");

        let ctx = AuthContext::from_roles("t1", Vec::<String>::new());
        assert!(!ctx.is_admin());
    }

    #[test]
    fn share_principal_names_tenant() {
        assert_eq!(AuthContext::tenant("t2").share_principal(), "tenant:t2");
    }

    #[test]
    fn expired_deadline_leaves_nothing() {
        let ctx = RequestContext::new(AuthContext::admin()).with_deadline(Instant::now());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert_eq!(RequestContext::from(AuthContext::admin()).remaining(), None);
    }
}
