//! Session controller: runs one deposit or withdrawal at a time through
//! open, dwell and close against the locker-control service.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use shared::{
    domain::{ClosetId, LockerId, LockerOperation, SessionKind},
    error::{Failure, FailureKind},
};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    error::{LockerError, SessionError},
    timing::{FixedDwell, PhysicalActionWaiter, SessionTimings},
    LockerControl,
};

const EVENT_CAPACITY: usize = 64;
pub const DEFAULT_FAILURE_MESSAGE: &str = "Invalid code. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    OpeningCompartment,
    AwaitingPhysicalAction,
    ClosingCompartment,
    Completed,
    Failed,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::OpeningCompartment => 1,
            Self::AwaitingPhysicalAction => 2,
            Self::ClosingCompartment => 3,
            Self::Completed | Self::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OpeningCompartment => "opening_compartment",
            Self::AwaitingPhysicalAction => "awaiting_physical_action",
            Self::ClosingCompartment => "closing_compartment",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: FailureKind,
    /// Text shown on the error screen; never empty.
    pub message: String,
    pub operation: LockerOperation,
    /// Set when the close step failed after a successful open. Nothing
    /// reconciles the compartment in that case.
    pub compartment_may_be_open: bool,
}

impl From<SessionFailure> for Failure {
    fn from(value: SessionFailure) -> Self {
        Failure::new(value.kind, value.message)
    }
}

/// The single active transaction.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    kind: SessionKind,
    code: String,
    locker_id: LockerId,
    closet_id: ClosetId,
    phase: Phase,
    result_message: Option<String>,
    result_password: Option<String>,
    failure: Option<SessionFailure>,
    finished_at: Option<Instant>,
}

impl Session {
    fn new(kind: SessionKind, code: String, locker_id: LockerId, closet_id: ClosetId) -> Self {
        Self {
            kind,
            code,
            locker_id,
            closet_id,
            phase: Phase::OpeningCompartment,
            result_message: None,
            result_password: None,
            failure: None,
            finished_at: None,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn locker_id(&self) -> LockerId {
        self.locker_id
    }

    pub fn closet_id(&self) -> ClosetId {
        self.closet_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn result_message(&self) -> Option<&str> {
        self.result_message.as_deref()
    }

    /// Pickup password of a completed deposit.
    pub fn result_password(&self) -> Option<&str> {
        self.result_password.as_deref()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            next.rank() > self.phase.rank(),
            "phase must move forward: {} -> {next}",
            self.phase
        );
        self.phase = next;
    }
}

// Codes and passwords stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind)
            .field("code", &"<redacted>")
            .field("locker_id", &self.locker_id)
            .field("closet_id", &self.closet_id)
            .field("phase", &self.phase)
            .field("result_message", &self.result_message)
            .field(
                "result_password",
                &self.result_password.as_ref().map(|_| "<redacted>"),
            )
            .field("failure", &self.failure)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started {
        kind: SessionKind,
    },
    AwaitingPhysicalAction {
        kind: SessionKind,
        /// Message returned by the open call.
        message: String,
    },
    Closing {
        kind: SessionKind,
    },
    Completed {
        kind: SessionKind,
        message: String,
        password: Option<String>,
    },
    Failed {
        kind: SessionKind,
        failure: SessionFailure,
    },
    Cleared,
}

impl SessionEvent {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Started { .. } => Phase::OpeningCompartment,
            Self::AwaitingPhysicalAction { .. } => Phase::AwaitingPhysicalAction,
            Self::Closing { .. } => Phase::ClosingCompartment,
            Self::Completed { .. } => Phase::Completed,
            Self::Failed { .. } => Phase::Failed,
            Self::Cleared => Phase::Idle,
        }
    }
}

/// How a started session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed {
        message: String,
        password: Option<String>,
    },
    Failed(SessionFailure),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub locker_id: LockerId,
    pub closet_id: ClosetId,
    pub timings: SessionTimings,
    /// Shown when a failure carries no usable message.
    pub failure_message: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            locker_id: LockerId(1),
            closet_id: ClosetId(1),
            timings: SessionTimings::default(),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }
}

pub struct SessionController {
    locker: Arc<dyn LockerControl>,
    waiter: Arc<dyn PhysicalActionWaiter>,
    config: ControllerConfig,
    session: Option<Session>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(locker: Arc<dyn LockerControl>, config: ControllerConfig) -> Self {
        let waiter = Arc::new(FixedDwell::new(config.timings.dwell));
        Self::new_with_waiter(locker, waiter, config)
    }

    pub fn new_with_waiter(
        locker: Arc<dyn LockerControl>,
        waiter: Arc<dyn PhysicalActionWaiter>,
        config: ControllerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            locker,
            waiter,
            config,
            session: None,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map_or(Phase::Idle, |session| session.phase)
    }

    /// Runs a session from submission to Completed or Failed.
    ///
    /// The close call is only issued after the open call succeeded and the
    /// dwell elapsed. The session stays in its terminal phase until
    /// [`Self::expire_display`] or [`Self::acknowledge`] clears it.
    ///
    /// Dropping the returned future before it resolves moves the session to
    /// Failed, flagged as possibly open when the open call had succeeded.
    pub async fn start(
        &mut self,
        kind: SessionKind,
        code: &str,
    ) -> Result<SessionOutcome, SessionError> {
        if let Some(active) = &self.session {
            warn!(kind = %kind, active = %active.kind, phase = %active.phase, "rejected start while session active");
            return Err(SessionError::Busy {
                kind: active.kind,
                phase: active.phase,
            });
        }
        if code.trim().is_empty() {
            debug!(kind = %kind, "rejected start with empty code");
            return Err(SessionError::EmptyCode);
        }

        let locker_id = self.config.locker_id;
        let closet_id = self.config.closet_id;
        self.session = Some(Session::new(kind, code.to_string(), locker_id, closet_id));
        let mut this = InFlight(self);

        let operation = LockerOperation::open_for(kind);
        info!(kind = %kind, %operation, locker_id = locker_id.0, closet_id = closet_id.0, "session: opening compartment");
        this.emit(SessionEvent::Started { kind });

        let opened = match kind {
            SessionKind::Deposit => this.locker.open_for_deposit(locker_id, code).await,
            SessionKind::Withdraw => this.locker.open_for_withdraw(locker_id, code).await,
        };
        let opened = match opened {
            Ok(receipt) => receipt,
            Err(err) => return Ok(this.fail(kind, err)),
        };

        this.advance(Phase::AwaitingPhysicalAction);
        info!(kind = %kind, locker_id = locker_id.0, "session: awaiting physical action");
        this.emit(SessionEvent::AwaitingPhysicalAction {
            kind,
            message: opened.message,
        });
        this.waiter.wait_for_physical_action(kind, locker_id).await;

        this.advance(Phase::ClosingCompartment);
        let operation = LockerOperation::close_for(kind);
        info!(kind = %kind, %operation, locker_id = locker_id.0, closet_id = closet_id.0, "session: closing compartment");
        this.emit(SessionEvent::Closing { kind });

        let closed = match kind {
            SessionKind::Deposit => this
                .locker
                .close_for_deposit(locker_id, closet_id, code)
                .await
                .map(|receipt| (receipt.message, Some(receipt.password))),
            SessionKind::Withdraw => this
                .locker
                .close_for_withdraw(locker_id, closet_id)
                .await
                .map(|receipt| (receipt.message, None)),
        };
        match closed {
            Ok((message, password)) => Ok(this.complete(kind, message, password)),
            Err(err) => Ok(this.fail(kind, err)),
        }
    }

    /// Waits out the success display interval, then clears the session.
    pub async fn expire_display(&mut self) -> Result<(), SessionError> {
        let (kind, finished_at) = match &self.session {
            Some(Session {
                kind,
                phase: Phase::Completed,
                finished_at: Some(finished_at),
                ..
            }) => (*kind, *finished_at),
            other => {
                return Err(SessionError::InvalidPhase {
                    action: "expire display",
                    phase: other.as_ref().map_or(Phase::Idle, |session| session.phase),
                })
            }
        };
        tokio::time::sleep_until(finished_at + self.config.timings.display_for(kind)).await;
        self.clear();
        Ok(())
    }

    /// Customer dismissed the error screen.
    pub fn acknowledge(&mut self) -> Result<(), SessionError> {
        match self.phase() {
            Phase::Failed => {
                self.clear();
                Ok(())
            }
            phase => Err(SessionError::InvalidPhase {
                action: "acknowledge",
                phase,
            }),
        }
    }

    fn advance(&mut self, next: Phase) {
        if let Some(session) = self.session.as_mut() {
            session.advance(next);
        }
    }

    fn complete(
        &mut self,
        kind: SessionKind,
        message: String,
        password: Option<String>,
    ) -> SessionOutcome {
        let password = match kind {
            SessionKind::Deposit => password,
            SessionKind::Withdraw => None,
        };
        if let Some(session) = self.session.as_mut() {
            session.advance(Phase::Completed);
            session.result_message = Some(message.clone());
            session.result_password = password.clone();
            session.finished_at = Some(Instant::now());
        }
        info!(kind = %kind, "session: completed");
        self.emit(SessionEvent::Completed {
            kind,
            message: message.clone(),
            password: password.clone(),
        });
        SessionOutcome::Completed { message, password }
    }

    fn fail(&mut self, kind: SessionKind, err: LockerError) -> SessionOutcome {
        let operation = err.operation();
        let failure = SessionFailure {
            kind: err.kind(),
            message: self.failure_text(&err),
            operation,
            compartment_may_be_open: operation.is_close(),
        };
        if failure.compartment_may_be_open {
            warn!(
                kind = %kind,
                locker_id = self.config.locker_id.0,
                closet_id = self.config.closet_id.0,
                error = %err,
                "session: close step failed after successful open; compartment state unknown"
            );
        } else {
            warn!(kind = %kind, error = %err, "session: open step failed");
        }

        self.settle_failure(kind, failure)
    }

    /// Fails a session whose `start` future was dropped before it resolved.
    ///
    /// Once the open call has succeeded the compartment may be standing open,
    /// so the failure is flagged the same way a failed close is.
    fn abandon_unfinished(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.phase.is_terminal() {
            return;
        }
        let kind = session.kind;
        let opened = session.phase != Phase::OpeningCompartment;
        let operation = if opened {
            LockerOperation::close_for(kind)
        } else {
            LockerOperation::open_for(kind)
        };
        if opened {
            warn!(
                kind = %kind,
                phase = %session.phase,
                locker_id = self.config.locker_id.0,
                closet_id = self.config.closet_id.0,
                "session: abandoned after successful open; compartment state unknown"
            );
        } else {
            warn!(kind = %kind, %operation, "session: abandoned while open request was in flight");
        }

        let failure = SessionFailure {
            kind: FailureKind::Unspecified,
            message: self.config.failure_message.clone(),
            operation,
            compartment_may_be_open: opened,
        };
        self.settle_failure(kind, failure);
    }

    fn settle_failure(&mut self, kind: SessionKind, failure: SessionFailure) -> SessionOutcome {
        if let Some(session) = self.session.as_mut() {
            session.advance(Phase::Failed);
            session.result_message = Some(failure.message.clone());
            session.failure = Some(failure.clone());
            session.finished_at = Some(Instant::now());
        }
        self.emit(SessionEvent::Failed {
            kind,
            failure: failure.clone(),
        });
        SessionOutcome::Failed(failure)
    }

    fn failure_text(&self, err: &LockerError) -> String {
        match err.kind() {
            FailureKind::ServiceRejected => err
                .service_message()
                .unwrap_or_else(|| step_fallback(err.operation()))
                .to_string(),
            FailureKind::Transport => err
                .transport_detail()
                .unwrap_or_else(|| err.to_string()),
            FailureKind::Validation | FailureKind::Unspecified => {
                self.config.failure_message.clone()
            }
        }
    }

    fn clear(&mut self) {
        if let Some(session) = self.session.take() {
            info!(kind = %session.kind, phase = %session.phase, "session: cleared");
        }
        self.emit(SessionEvent::Cleared);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; the controller does not depend on a screen.
        let _ = self.events.send(event);
    }
}

/// Borrow of the controller held for the span of one `start` call.
struct InFlight<'a>(&'a mut SessionController);

impl Deref for InFlight<'_> {
    type Target = SessionController;

    fn deref(&self) -> &SessionController {
        self.0
    }
}

impl DerefMut for InFlight<'_> {
    fn deref_mut(&mut self) -> &mut SessionController {
        self.0
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.abandon_unfinished();
    }
}

/// Text shown when the service rejected a step without saying why.
fn step_fallback(operation: LockerOperation) -> &'static str {
    match operation {
        LockerOperation::OpenDeposit => "Locker unavailable",
        LockerOperation::OpenWithdraw => "Invalid password",
        LockerOperation::CloseDeposit | LockerOperation::CloseWithdraw => "error",
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
