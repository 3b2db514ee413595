//! Capability hook. Authentication itself is an external collaborator: the
//! gateway authenticates the caller and injects identity headers; this module
//! only reads them and enforces capability presence.

use crate::errors::ServiceError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

pub const ROLE_HEADER: &str = "x-user-role";
pub const ADMIN_CAPABILITY_HEADER: &str = "x-admin-capability";

/// Identity context of the current request as asserted by the gateway.
#[derive(Debug, Clone)]
pub struct RequesterContext {
    pub role: Option<String>,
    pub has_admin_capability: bool,
}

impl RequesterContext {
    /// Fails with `Forbidden` unless the caller carries the administrative
    /// capability.
    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.has_admin_capability {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "administrative capability required".to_string(),
            ))
        }
    }

    #[cfg(test)]
    pub fn admin() -> Self {
        Self {
            role: Some("Admin".to_string()),
            has_admin_capability: true,
        }
    }

    #[cfg(test)]
    pub fn role(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            has_admin_capability: false,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequesterContext
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let has_admin_capability = parts
            .headers
            .get(ADMIN_CAPABILITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            role,
            has_admin_capability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_capability_gate() {
        assert!(RequesterContext::admin().require_admin().is_ok());
        let err = RequesterContext::role("Manager").require_admin().unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
