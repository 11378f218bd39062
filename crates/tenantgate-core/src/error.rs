use crate::registry::RegistryError;
use crate::sandbox::SandboxIdError;

/// Internal failure taxonomy. Callers outside the process only ever see a
/// generic not-found; the variants exist for logs.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no active tenant matches the request")]
    NotFound,
    #[error("identifier format violation: {0}")]
    FormatViolation(#[from] SandboxIdError),
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),
}

impl From<RegistryError> for ResolveError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Unavailable(message) => ResolveError::RegistryUnavailable(message),
            RegistryError::Conflict(message) => {
                ResolveError::RegistryUnavailable(format!("conflict: {message}"))
            }
            RegistryError::Format(err) => ResolveError::FormatViolation(err),
        }
    }
}

impl ResolveError {
    /// Short machine-readable cause used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::NotFound => "not_found",
            ResolveError::FormatViolation(_) => "format_violation",
            ResolveError::RegistryUnavailable(_) => "registry_unavailable",
        }
    }
}
