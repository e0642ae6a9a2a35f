// =============================================================================
// AUTH MODULE
// =============================================================================
// Caller identity and admin authorization.
//
// Authentication happens upstream (API gateway / session service). It
// forwards the verified identity in trusted headers:
// - x-user-id:    required on every authenticated route
// - x-user-email: checked against the admin allow-list
// - x-user-name:  shown next to the user's reviews
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Emails allowed to administer the catalog. Matching ignores case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowList {
    emails: HashSet<String>,
}

impl AdminAllowList {
    /// Parse a comma-separated list; blank entries are skipped.
    pub fn parse(raw: &str) -> Self {
        Self {
            emails: raw
                .split(',')
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
        Ok(Self {
            id,
            email: header(parts, USER_EMAIL_HEADER),
            name: header(parts, USER_NAME_HEADER),
        })
    }
}

/// Authenticated caller whose email is on the admin allow-list.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        let is_admin = user
            .email
            .as_deref()
            .is_some_and(|email| state.admins.contains(email));
        if !is_admin {
            tracing::warn!(user_id = %user.id, "Admin route refused");
            return Err(AppError::Forbidden("admin access required".into()));
        }
        Ok(Self(user))
    }
}
