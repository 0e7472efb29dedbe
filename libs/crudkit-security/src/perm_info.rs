use std::sync::Arc;

use crate::role::Role;

/// How permissions are applied to one operation.
#[derive(Debug, Clone)]
pub enum PermMode {
    /// Trusted caller; nothing is filtered.
    Skip,
    Check(Arc<Role>),
}

/// Acting user and role of an operation.
#[derive(Debug, Clone)]
pub struct PermInfo {
    user: Option<String>,
    mode: PermMode,
}

impl PermInfo {
    /// Permission checks disabled.
    #[must_use]
    pub fn skip() -> Self {
        Self {
            user: None,
            mode: PermMode::Skip,
        }
    }

    /// Checks against `role`.
    #[must_use]
    pub fn with_role(role: Arc<Role>) -> Self {
        Self {
            user: None,
            mode: PermMode::Check(role),
        }
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user.as_deref()
    }

    #[must_use]
    pub fn mode(&self) -> &PermMode {
        &self.mode
    }

    /// Role to check against; `None` when checks are skipped.
    #[must_use]
    pub fn role(&self) -> Option<&Arc<Role>> {
        match &self.mode {
            PermMode::Skip => None,
            PermMode::Check(role) => Some(role),
        }
    }

    #[must_use]
    pub fn is_check(&self) -> bool {
        matches!(self.mode, PermMode::Check(_))
    }
}
