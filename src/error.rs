//! Domain error taxonomy for the signing engine
//!
//! Every mutating operation either returns the updated resource or one of
//! these errors. `kind()` yields a stable tag callers can match on without
//! parsing messages.

/// A single violated field, collected during placeholder validation.
///
/// Validation always reports the full list of violations, never just the
/// first failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SigningError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("validation failed on {} field(s): {}", violations.len(), format_violations(violations))]
    ValidationFailed { violations: Vec<FieldViolation> },

    #[error("precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    #[error("{resource} {id} is already in terminal state {state}")]
    AlreadyTerminal {
        resource: &'static str,
        id: String,
        state: String,
    },

    #[error("required consent not given: {consent_id}")]
    ConsentRequired { consent_id: String },

    #[error("contract {contract_id} expired")]
    Expired { contract_id: String },

    #[error("view limit reached for contract {contract_id} ({max_views} views)")]
    ViewLimitExceeded { contract_id: String, max_views: u32 },

    #[error("no signing session exists for signer {signer_id}")]
    SessionNotFound { signer_id: String },

    #[error("template {template_id} is referenced by existing contracts")]
    InUse { template_id: String },

    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("concurrent update lost after {attempts} attempts on {id}")]
    UpdateConflict { id: String, attempts: u32 },
}

impl SigningError {
    /// Stable kind tag for transport-level rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ValidationFailed { .. } => "validation_error",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::ConsentRequired { .. } => "consent_required",
            Self::Expired { .. } => "expired",
            Self::ViewLimitExceeded { .. } => "view_limit_exceeded",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::InUse { .. } => "in_use",
            Self::Provider { .. } => "provider_error",
            Self::Storage(_) => "storage_error",
            Self::UpdateConflict { .. } => "update_conflict",
        }
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
