use super::repository::RepositoryError;

/// Failure taxonomy shared by every ownership operation.
#[derive(Debug, thiserror::Error)]
pub enum OwnershipError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("claim token has already been used")]
    AlreadyUsed,
    #[error("claim token has expired")]
    Expired,
    #[error("sign in to continue")]
    AuthenticationRequired,
    #[error("{0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0}")]
    ResourceExhausted(String),
    #[error("payment notification signature is invalid")]
    UpstreamSignatureInvalid,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl OwnershipError {
    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            OwnershipError::NotFound(_) => "not_found",
            OwnershipError::AlreadyUsed => "already_used",
            OwnershipError::Expired => "expired",
            OwnershipError::AuthenticationRequired => "authentication_required",
            OwnershipError::Conflict(_) => "conflict",
            OwnershipError::Forbidden(_) => "forbidden",
            OwnershipError::Validation(_) => "validation_error",
            OwnershipError::ResourceExhausted(_) => "resource_exhausted",
            OwnershipError::UpstreamSignatureInvalid => "signature_invalid",
            OwnershipError::Repository(_) => "internal",
        }
    }
}
