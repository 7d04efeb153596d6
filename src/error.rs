use crate::model::OrderStatus;
use std::fmt::Display;
use strum::{AsRefStr, Display as StrumDisplay, EnumString};
use thiserror::Error;

/// Status codes a document store reports back. The set follows the codes a managed document database hands to its
/// clients, with `Unknown` catching whatever else comes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RemoteErrorCode {
    PermissionDenied,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
    Unknown,
}

impl RemoteErrorCode {
    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "You don't have permission to perform this action.",
            Self::NotFound => "The requested document was not found.",
            Self::AlreadyExists => "A document with this ID already exists.",
            Self::ResourceExhausted => "You have exceeded your quota.",
            Self::FailedPrecondition => {
                "The operation was rejected because the system is not in a state required for the operation's \
                 execution."
            }
            Self::Aborted => "The operation was aborted.",
            Self::OutOfRange => "The operation was attempted past the valid range.",
            Self::Unimplemented => "The operation is not implemented or not supported/enabled.",
            Self::Internal => "Internal errors.",
            Self::Unavailable => "The service is currently unavailable.",
            Self::DataLoss => "Unrecoverable data loss or corruption.",
            Self::Unauthenticated => "The request does not have valid authentication credentials.",
            Self::Unknown => "An unexpected error occurred. Please try again.",
        }
    }

    /// Whether repeating the same request later has a reasonable chance to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::Aborted | Self::ResourceExhausted | Self::Internal
        )
    }
}

/// Failure reported by a [`DocumentStore`](crate::traits::DocumentStore) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code:    RemoteErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new<S: Into<String>>(code: RemoteErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(RemoteErrorCode::Unavailable, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(RemoteErrorCode::NotFound, message)
    }

    pub fn user_message(&self) -> &'static str {
        self.code.user_message()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Order,
    Product,
    Cart,
    User,
}

/// What happened locally when a remote write failed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Fallback {
    /// Local state was left untouched.
    #[default]
    None,
    /// The mutation was applied to the in-memory snapshot and the local cache only. For creations `local_id` is the
    /// identity the entity got locally.
    AppliedLocally { local_id: Option<String> },
}

impl Display for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "local state unchanged"),
            Self::AppliedLocally { local_id: Some(id) } => write!(f, "applied locally as '{id}'"),
            Self::AppliedLocally { local_id: None } => write!(f, "applied locally"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("operation requires an authenticated user")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid data: {0}")]
    Validation(String),

    #[error("order status cannot change from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("malformed document '{id}': {message}")]
    MalformedDocument { id: String, message: String },

    #[error("document encoding failed: {0}")]
    Encoding(String),

    #[error("remote write failed ({fallback}): {source}")]
    RemoteWrite {
        #[source]
        source:   RemoteError,
        fallback: Fallback,
    },

    #[error("remote read failed: {0}")]
    RemoteRead(#[source] RemoteError),

    #[error("live subscription failed: {0}")]
    RemoteSubscription(#[source] RemoteError),
}

impl StoreError {
    pub fn not_found<S: Into<String>>(kind: EntityKind, id: S) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn remote_write(source: RemoteError) -> Self {
        Self::RemoteWrite {
            source,
            fallback: Fallback::None,
        }
    }

    pub fn remote_write_with_fallback(source: RemoteError, local_id: Option<String>) -> Self {
        Self::RemoteWrite {
            source,
            fallback: Fallback::AppliedLocally { local_id },
        }
    }

    /// True if the failed operation still changed local state.
    pub fn fallback_applied(&self) -> bool {
        matches!(
            self,
            Self::RemoteWrite {
                fallback: Fallback::AppliedLocally { .. },
                ..
            }
        )
    }

    /// The identity a creation got locally when the remote write failed.
    pub fn local_id(&self) -> Option<&str> {
        match self {
            Self::RemoteWrite {
                fallback: Fallback::AppliedLocally { local_id },
                ..
            } => local_id.as_deref(),
            _ => None,
        }
    }

    /// The underlying collaborator failure, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::RemoteWrite { source, .. } | Self::RemoteRead(source) | Self::RemoteSubscription(source) => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::RemoteWrite { source, .. } | Self::RemoteRead(source) | Self::RemoteSubscription(source) => {
                source.user_message().to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<garde::Report> for StoreError {
    fn from(report: garde::Report) -> Self {
        Self::Validation(report.to_string().trim().to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
