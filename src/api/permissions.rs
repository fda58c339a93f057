//! Capability grants and the handler-level permission gate.

use crate::api::{error::ApiError, middleware::CurrentUser, state::AppState, store::User};
use std::collections::HashSet;

/// Capability codes granted to one identity; membership is the only test.
#[derive(Debug, Clone, Default)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    #[must_use]
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for Permissions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reject anonymous callers.
///
/// # Errors
/// [`ApiError::AuthenticationRequired`] for the anonymous identity.
pub fn require_authenticated(current: &CurrentUser) -> Result<&User, ApiError> {
    match current {
        CurrentUser::Anonymous => Err(ApiError::AuthenticationRequired),
        CurrentUser::Authenticated(user) => Ok(user),
    }
}

/// Reject anonymous and non-activated callers.
///
/// # Errors
/// [`ApiError::AuthenticationRequired`] or [`ApiError::InactiveAccount`].
pub fn require_activated(current: &CurrentUser) -> Result<&User, ApiError> {
    let user = require_authenticated(current)?;
    if !user.activated {
        return Err(ApiError::InactiveAccount);
    }
    Ok(user)
}

/// Full gate for a handler that needs `code`.
///
/// Checks run cheapest first: the anonymous and activation checks cost
/// nothing, the capability lookup is the only storage round trip.
///
/// # Errors
/// The activation-gate errors, [`ApiError::NotPermitted`] when the code is
/// absent, or an internal error if the lookup fails.
pub async fn require_permission<'a>(
    state: &AppState,
    current: &'a CurrentUser,
    code: &str,
) -> Result<&'a User, ApiError> {
    let user = require_activated(current)?;

    let permissions = state.store.capabilities_for(user.id).await?;
    if !permissions.include(code) {
        return Err(ApiError::NotPermitted);
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(activated: bool) -> User {
        User {
            id: 1,
            created_at: Utc::now(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            activated,
            version: 1,
        }
    }

    #[test]
    fn include_is_set_membership() {
        let permissions: Permissions =
            ["photo:read".to_string(), "photo:write".to_string()]
                .into_iter()
                .collect();
        assert!(permissions.include("photo:read"));
        assert!(!permissions.include("photo:delete"));
        assert!(Permissions::default().is_empty());
    }

    #[test]
    fn anonymous_is_rejected_first() {
        let current = CurrentUser::Anonymous;
        assert!(matches!(
            require_authenticated(&current),
            Err(ApiError::AuthenticationRequired)
        ));
        assert!(matches!(
            require_activated(&current),
            Err(ApiError::AuthenticationRequired)
        ));
    }

    #[test]
    fn inactive_account_is_forbidden() {
        let current = CurrentUser::Authenticated(user(false));
        assert!(require_authenticated(&current).is_ok());
        assert!(matches!(
            require_activated(&current),
            Err(ApiError::InactiveAccount)
        ));
    }

    #[test]
    fn activated_user_passes_the_cheap_checks() {
        let current = CurrentUser::Authenticated(user(true));
        assert!(require_activated(&current).is_ok());
    }
}
