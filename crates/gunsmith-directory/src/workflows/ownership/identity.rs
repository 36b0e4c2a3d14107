use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::UserId;
use super::error::OwnershipError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Administrator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
}

/// Caller context passed explicitly into every ownership operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    Anonymous,
    Authenticated(Principal),
}

impl CallerIdentity {
    pub fn member(id: impl Into<String>) -> Self {
        Self::Authenticated(Principal {
            id: UserId(id.into()),
            role: Role::Member,
        })
    }

    pub fn administrator(id: impl Into<String>) -> Self {
        Self::Authenticated(Principal {
            id: UserId(id.into()),
            role: Role::Administrator,
        })
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            CallerIdentity::Anonymous => None,
            CallerIdentity::Authenticated(principal) => Some(principal),
        }
    }

    pub fn require_authenticated(&self) -> Result<&Principal, OwnershipError> {
        self.principal()
            .ok_or(OwnershipError::AuthenticationRequired)
    }

    /// Role check for administrator console actions. Denials are audit logged.
    pub fn require_administrator(
        &self,
        action: &'static str,
    ) -> Result<&Principal, OwnershipError> {
        match self.principal() {
            Some(principal) if principal.role == Role::Administrator => Ok(principal),
            Some(principal) => {
                warn!(caller = %principal.id, action, "administrator action denied");
                Err(OwnershipError::Forbidden("administrator role required"))
            }
            None => {
                warn!(caller = "anonymous", action, "administrator action denied");
                Err(OwnershipError::Forbidden("administrator role required"))
            }
        }
    }
}

/// Resolves the calling user from an inbound request.
pub trait IdentityGateway: Send + Sync {
    fn identify(&self, headers: &HeaderMap) -> CallerIdentity;
}

/// Trusts identity headers injected by the upstream session proxy, which strips
/// any client-supplied copies before forwarding.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderIdentityGateway;

impl IdentityGateway for HeaderIdentityGateway {
    fn identify(&self, headers: &HeaderMap) -> CallerIdentity {
        let id = headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let Some(id) = id else {
            return CallerIdentity::Anonymous;
        };

        let role = match headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("admin") | Some("administrator") => Role::Administrator,
            _ => Role::Member,
        };

        CallerIdentity::Authenticated(Principal {
            id: UserId(id.to_string()),
            role,
        })
    }
}
