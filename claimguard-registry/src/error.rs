use std::fmt;
use std::io;

use claimguard_model::{ClaimId, WorldId};
use thiserror::Error;

/// Why the validator turned a proposal down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    Overlap { blocking: ClaimId },
    InvalidBounds,
    AuthorizationDenied,
    InsufficientBlocks { required: i64, remaining: i64 },
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionKind::Overlap { blocking } => write!(f, "overlaps claim {}", blocking),
            RejectionKind::InvalidBounds => f.write_str("invalid bounds"),
            RejectionKind::AuthorizationDenied => f.write_str("authorization denied"),
            RejectionKind::InsufficientBlocks { required, remaining } => write!(
                f,
                "needs {} claim blocks, {} remaining",
                required, remaining
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct Rejection {
    pub kind: RejectionKind,
    pub detail: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn invalid_bounds(detail: impl Into<String>) -> Self {
        Self::new(RejectionKind::InvalidBounds, detail)
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("invalid claim: {0}")]
    Validation(String),
    #[error("overlaps claim {blocking}")]
    Overlap { blocking: ClaimId },
    #[error("claim {0} not found")]
    NotFound(ClaimId),
    #[error("world {0} is not loaded")]
    UnknownWorld(WorldId),
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("claim {0} still has child claims")]
    HasChildren(ClaimId),
    #[error("insufficient claim blocks: need {required}, have {remaining}")]
    InsufficientBlocks { required: i64, remaining: i64 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<Rejection> for ClaimError {
    fn from(rejection: Rejection) -> Self {
        match rejection.kind {
            RejectionKind::Overlap { blocking } => ClaimError::Overlap { blocking },
            RejectionKind::InvalidBounds => ClaimError::Validation(rejection.detail),
            RejectionKind::AuthorizationDenied => ClaimError::AuthorizationDenied(rejection.detail),
            RejectionKind::InsufficientBlocks {
                required,
                remaining,
            } => ClaimError::InsufficientBlocks {
                required,
                remaining,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaimError>;
