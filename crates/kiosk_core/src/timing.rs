//! Session timers.
//!
//! The dwell between the open and close calls is a placeholder for a real
//! door-closed signal: the kiosk has no sensor input, so it waits a fixed
//! duration and lets the service decide whether the door actually closed.
//! It is unrelated to network timeouts.

use std::time::Duration;

use async_trait::async_trait;
use shared::domain::{LockerId, SessionKind};

pub const DEFAULT_DWELL: Duration = Duration::from_millis(5000);
pub const DEFAULT_DEPOSIT_DISPLAY: Duration = Duration::from_millis(8000);
pub const DEFAULT_WITHDRAW_DISPLAY: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub dwell: Duration,
    pub deposit_display: Duration,
    pub withdraw_display: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            dwell: DEFAULT_DWELL,
            deposit_display: DEFAULT_DEPOSIT_DISPLAY,
            withdraw_display: DEFAULT_WITHDRAW_DISPLAY,
        }
    }
}

impl SessionTimings {
    /// How long the success screen stays up before the session is cleared.
    pub fn display_for(&self, kind: SessionKind) -> Duration {
        match kind {
            SessionKind::Deposit => self.deposit_display,
            SessionKind::Withdraw => self.withdraw_display,
        }
    }
}

/// Resolves once the customer is assumed to have finished with the compartment.
#[async_trait]
pub trait PhysicalActionWaiter: Send + Sync {
    async fn wait_for_physical_action(&self, kind: SessionKind, locker_id: LockerId);
}

/// Waits a fixed duration in place of a door sensor.
#[derive(Debug, Clone, Copy)]
pub struct FixedDwell {
    duration: Duration,
}

impl FixedDwell {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl PhysicalActionWaiter for FixedDwell {
    async fn wait_for_physical_action(&self, _kind: SessionKind, _locker_id: LockerId) {
        tokio::time::sleep(self.duration).await;
    }
}
