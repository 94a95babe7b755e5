//! Acting-user collaborator.

/// Exposes who is performing the current unit of work.
pub trait IdentityProvider: Send + Sync {
    fn user_id(&self) -> Option<String>;

    fn username(&self) -> Option<String>;

    fn company_id(&self) -> Option<String> {
        None
    }
}

/// Fixed identity, for background jobs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticIdentity {
    user_id: Option<String>,
    username: Option<String>,
    company_id: Option<String>,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            username: Some(username.into()),
            company_id: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }
}

impl IdentityProvider for StaticIdentity {
    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn username(&self) -> Option<String> {
        self.username.clone()
    }

    fn company_id(&self) -> Option<String> {
        self.company_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_identity() {
        let identity = StaticIdentity::new("u-1", "alice").with_company("acme");
        assert_eq!(identity.user_id().as_deref(), Some("u-1"));
        assert_eq!(identity.username().as_deref(), Some("alice"));
        assert_eq!(identity.company_id().as_deref(), Some("acme"));

        let nobody = StaticIdentity::anonymous();
        assert!(nobody.user_id().is_none());
    }
}
