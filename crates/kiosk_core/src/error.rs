use shared::{
    domain::{LockerOperation, SessionKind},
    error::FailureKind,
};
use thiserror::Error;

use crate::session::Phase;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum LockerError {
    #[error("{operation} rejected by locker service{}", rejection_detail(.status, .message))]
    Rejected {
        operation: LockerOperation,
        status: Option<u16>,
        message: Option<String>,
    },
    #[error("{operation} request could not complete: {source}")]
    Transport {
        operation: LockerOperation,
        #[source]
        source: BoxError,
    },
    #[error("{operation} returned an unusable response: {reason}")]
    Malformed {
        operation: LockerOperation,
        reason: String,
    },
}

fn rejection_detail(status: &Option<u16>, message: &Option<String>) -> String {
    match (status, message) {
        (Some(status), Some(message)) => format!(" ({status}): {message}"),
        (Some(status), None) => format!(" ({status})"),
        (None, Some(message)) => format!(": {message}"),
        (None, None) => String::new(),
    }
}

impl LockerError {
    pub fn operation(&self) -> LockerOperation {
        match self {
            Self::Rejected { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Malformed { operation, .. } => *operation,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected { .. } => FailureKind::ServiceRejected,
            Self::Transport { .. } => FailureKind::Transport,
            Self::Malformed { .. } => FailureKind::Unspecified,
        }
    }

    /// Innermost cause of a transport failure, without the request url.
    pub fn transport_detail(&self) -> Option<String> {
        let Self::Transport { source, .. } = self else {
            return None;
        };
        let mut innermost: &(dyn std::error::Error + 'static) = &**source;
        while let Some(next) = innermost.source() {
            innermost = next;
        }
        Some(innermost.to_string())
    }

    /// Human-readable text supplied by the service, if any.
    pub fn service_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("code must not be empty")]
    EmptyCode,
    #[error("a {kind} session is already active (phase {phase})")]
    Busy { kind: SessionKind, phase: Phase },
    #[error("cannot {action} while session is {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },
}

impl SessionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::EmptyCode => FailureKind::Validation,
            Self::Busy { .. } | Self::InvalidPhase { .. } => FailureKind::Unspecified,
        }
    }
}
