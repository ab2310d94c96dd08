use std::fmt;

use diesel::result::{DatabaseErrorKind, Error as ResultError};
use thiserror::Error;

use crate::nsclient;

/// Remote resource families mirrored on the network-server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    RoutingProfile,
    ServiceProfile,
    DeviceProfile,
    Device,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::RoutingProfile => "routing-profile",
            ResourceKind::ServiceProfile => "service-profile",
            ResourceKind::DeviceProfile => "device-profile",
            ResourceKind::Device => "device",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// A single backend that failed to deliver a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub backend: String,
    pub error: String,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("object does not exist `{0}`")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("remote {operation} {kind} failed: {source}")]
    RemoteCall {
        kind: ResourceKind,
        operation: Operation,
        #[source]
        source: nsclient::Error,
    },

    #[error("remote {operation} {kind} timed out")]
    Timeout {
        kind: ResourceKind,
        operation: Operation,
    },

    #[error("network-server endpoint is unreachable: {0}")]
    UnreachableEndpoint(String),

    #[error("network-server connection error: {0}")]
    Connection(String),

    #[error("delivery failed for backend(s): {}", .0.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", "))]
    PartialDelivery(Vec<DeliveryFailure>),

    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Lrwn(#[from] lrwn::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    pub fn from_diesel(e: diesel::result::Error, s: String) -> Self {
        match &e {
            ResultError::NotFound => Error::NotFound(s),
            ResultError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Error::Conflict(format!("{} ({})", s, info.message()))
            }
            ResultError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Error::Conflict(format!("{} ({})", s, info.message()))
            }
            ResultError::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
                Error::Conflict(format!("{} ({})", s, info.message()))
            }
            _ => Error::Diesel(e),
        }
    }

    /// Returns true for failures a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RemoteCall { .. } | Error::Timeout { .. } | Error::Connection(_)
        )
    }
}
