use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(LockerId);
id_newtype!(ClosetId);

/// Which way the package travels through the compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Deposit,
    Withdraw,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote operation a request belongs to; used for routing and error fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockerOperation {
    OpenDeposit,
    CloseDeposit,
    OpenWithdraw,
    CloseWithdraw,
}

impl LockerOperation {
    pub fn open_for(kind: SessionKind) -> Self {
        match kind {
            SessionKind::Deposit => Self::OpenDeposit,
            SessionKind::Withdraw => Self::OpenWithdraw,
        }
    }

    pub fn close_for(kind: SessionKind) -> Self {
        match kind {
            SessionKind::Deposit => Self::CloseDeposit,
            SessionKind::Withdraw => Self::CloseWithdraw,
        }
    }

    pub fn route(self) -> &'static str {
        match self {
            Self::OpenDeposit => "open-deposit",
            Self::CloseDeposit => "close-deposit",
            Self::OpenWithdraw => "open-withdraw",
            Self::CloseWithdraw => "close-withdraw",
        }
    }

    pub fn is_close(self) -> bool {
        matches!(self, Self::CloseDeposit | Self::CloseWithdraw)
    }
}

impl fmt::Display for LockerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route())
    }
}
