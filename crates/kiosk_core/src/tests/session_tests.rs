use super::*;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{CloseReceipt, DepositReceipt, OpenReceipt};

#[derive(Clone)]
enum Reply {
    Accept {
        message: &'static str,
        password: Option<&'static str>,
    },
    Reject(Option<&'static str>),
    Unreachable,
    Garbled,
    /// Never answers.
    Stall,
}

/// Shaped like a reqwest send error: the url on top, the cause underneath.
#[derive(Debug, thiserror::Error)]
#[error("error sending request for url (http://localhost:3000/open-withdraw)")]
struct SendFailed(#[source] std::io::Error);

fn accept(message: &'static str) -> Reply {
    Reply::Accept {
        message,
        password: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    entry: String,
    at: Instant,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

struct ScriptedLocker {
    open: Reply,
    close: Reply,
    log: CallLog,
}

impl ScriptedLocker {
    fn new(open: Reply, close: Reply) -> Self {
        Self {
            open,
            close,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn record(&self, entry: String) {
        self.log.lock().await.push(Call {
            entry,
            at: Instant::now(),
        });
    }

    async fn stall_if_scripted(reply: &Reply) {
        if let Reply::Stall = reply {
            std::future::pending::<()>().await;
        }
    }

    fn resolve(
        reply: &Reply,
        operation: LockerOperation,
    ) -> Result<(String, Option<String>), LockerError> {
        match reply {
            Reply::Accept { message, password } => {
                Ok((message.to_string(), password.map(str::to_string)))
            }
            Reply::Reject(message) => Err(LockerError::Rejected {
                operation,
                status: Some(400),
                message: message.map(str::to_string),
            }),
            Reply::Unreachable => Err(LockerError::Transport {
                operation,
                source: Box::new(SendFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))),
            }),
            Reply::Garbled => Err(LockerError::Malformed {
                operation,
                reason: "undecodable body".into(),
            }),
            Reply::Stall => unreachable!("stalled replies are awaited, not resolved"),
        }
    }
}

#[async_trait]
impl LockerControl for ScriptedLocker {
    async fn open_for_deposit(
        &self,
        locker_id: LockerId,
        tracking_code: &str,
    ) -> Result<OpenReceipt, LockerError> {
        self.record(format!("open-deposit:{}:{tracking_code}", locker_id.0))
            .await;
        Self::stall_if_scripted(&self.open).await;
        let (message, _) = Self::resolve(&self.open, LockerOperation::OpenDeposit)?;
        Ok(OpenReceipt { message })
    }

    async fn close_for_deposit(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
        tracking_code: &str,
    ) -> Result<DepositReceipt, LockerError> {
        self.record(format!(
            "close-deposit:{}:{}:{tracking_code}",
            locker_id.0, closet_id.0
        ))
        .await;
        let (message, password) = Self::resolve(&self.close, LockerOperation::CloseDeposit)?;
        let password = password.ok_or_else(|| LockerError::Malformed {
            operation: LockerOperation::CloseDeposit,
            reason: "reply carried no pickup password".into(),
        })?;
        Ok(DepositReceipt { message, password })
    }

    async fn open_for_withdraw(
        &self,
        locker_id: LockerId,
        password: &str,
    ) -> Result<OpenReceipt, LockerError> {
        self.record(format!("open-withdraw:{}:{password}", locker_id.0))
            .await;
        Self::stall_if_scripted(&self.open).await;
        let (message, _) = Self::resolve(&self.open, LockerOperation::OpenWithdraw)?;
        Ok(OpenReceipt { message })
    }

    async fn close_for_withdraw(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
    ) -> Result<CloseReceipt, LockerError> {
        self.record(format!("close-withdraw:{}:{}", locker_id.0, closet_id.0))
            .await;
        let (message, _) = Self::resolve(&self.close, LockerOperation::CloseWithdraw)?;
        Ok(CloseReceipt { message })
    }
}

/// Dwell stand-in that writes into the same log as the locker.
struct LoggedDwell {
    log: CallLog,
}

#[async_trait]
impl PhysicalActionWaiter for LoggedDwell {
    async fn wait_for_physical_action(&self, kind: SessionKind, locker_id: LockerId) {
        self.log.lock().await.push(Call {
            entry: format!("dwell:{kind}:{}", locker_id.0),
            at: Instant::now(),
        });
    }
}

fn controller(locker: &Arc<ScriptedLocker>) -> SessionController {
    SessionController::new(locker.clone(), ControllerConfig::default())
}

async fn entries(log: &CallLog) -> Vec<String> {
    log.lock()
        .await
        .iter()
        .map(|call| call.entry.clone())
        .collect()
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn deposit_completes_with_password_from_close_step() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("Locker opening"),
        Reply::Accept {
            message: "Done",
            password: Some("7742"),
        },
    ));
    let mut controller = controller(&locker);

    let outcome = controller
        .start(SessionKind::Deposit, "A1B2C3")
        .await
        .expect("start");

    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            message: "Done".into(),
            password: Some("7742".into()),
        }
    );
    let session = controller.session().expect("session");
    assert_eq!(session.phase(), Phase::Completed);
    assert_eq!(session.result_password(), Some("7742"));
    assert_eq!(session.result_message(), Some("Done"));
    assert_eq!(
        entries(&locker.log).await,
        vec!["open-deposit:1:A1B2C3", "close-deposit:1:1:A1B2C3"]
    );
}

#[tokio::test(start_paused = true)]
async fn close_is_issued_only_after_open_and_full_dwell() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("Locker opening"),
        Reply::Accept {
            message: "Done",
            password: Some("1"),
        },
    ));
    let mut controller = controller(&locker);

    controller
        .start(SessionKind::Deposit, "55")
        .await
        .expect("start");

    let log = locker.log.lock().await;
    assert_eq!(log.len(), 2);
    assert!(log[0].entry.starts_with("open-deposit"));
    assert!(log[1].entry.starts_with("close-deposit"));
    assert!(log[1].at - log[0].at >= Duration::from_millis(5000));
}

#[tokio::test]
async fn dwell_runs_between_open_and_close() {
    let locker = Arc::new(ScriptedLocker::new(accept("Locker opened"), accept("Closed")));
    let waiter = Arc::new(LoggedDwell {
        log: locker.log.clone(),
    });
    let mut controller =
        SessionController::new_with_waiter(locker.clone(), waiter, ControllerConfig::default());

    controller
        .start(SessionKind::Withdraw, "9999")
        .await
        .expect("start");

    assert_eq!(
        entries(&locker.log).await,
        vec!["open-withdraw:1:9999", "dwell:withdraw:1", "close-withdraw:1:1"]
    );
}

#[tokio::test(start_paused = true)]
async fn withdraw_completes_without_password() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("Locker opening"),
        Reply::Accept {
            message: "Locker closed",
            password: Some("ignored"),
        },
    ));
    let mut controller = controller(&locker);

    let outcome = controller
        .start(SessionKind::Withdraw, "9999")
        .await
        .expect("start");

    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            message: "Locker closed".into(),
            password: None,
        }
    );
    assert_eq!(controller.session().expect("session").result_password(), None);
}

#[tokio::test]
async fn open_rejection_fails_without_close_call() {
    let locker = Arc::new(ScriptedLocker::new(
        Reply::Reject(Some("Invalid password")),
        accept("unreachable"),
    ));
    let mut controller = controller(&locker);

    let outcome = controller
        .start(SessionKind::Withdraw, "9999")
        .await
        .expect("start");

    let SessionOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(failure.kind, FailureKind::ServiceRejected);
    assert_eq!(failure.message, "Invalid password");
    assert!(!failure.compartment_may_be_open);
    assert_eq!(controller.phase(), Phase::Failed);
    assert_eq!(entries(&locker.log).await, vec!["open-withdraw:1:9999"]);
}

#[tokio::test]
async fn failed_open_deposit_never_closes() {
    for open in [Reply::Reject(None), Reply::Unreachable, Reply::Garbled] {
        let locker = Arc::new(ScriptedLocker::new(
            open,
            Reply::Accept {
                message: "Done",
                password: Some("1"),
            },
        ));
        let mut controller = controller(&locker);

        let outcome = controller
            .start(SessionKind::Deposit, "A1")
            .await
            .expect("start");

        assert!(matches!(outcome, SessionOutcome::Failed(_)));
        assert_eq!(entries(&locker.log).await, vec!["open-deposit:1:A1"]);
    }
}

#[tokio::test]
async fn rejection_without_message_uses_step_fallback() {
    let cases = [
        (SessionKind::Deposit, Reply::Reject(None), accept("x"), "Locker unavailable"),
        (SessionKind::Withdraw, Reply::Reject(None), accept("x"), "Invalid password"),
        (SessionKind::Withdraw, accept("open"), Reply::Reject(None), "error"),
    ];
    for (kind, open, close, expected) in cases {
        let locker = Arc::new(ScriptedLocker::new(open, close));
        let mut controller = SessionController::new_with_waiter(
            locker,
            Arc::new(FixedDwell::new(Duration::ZERO)),
            ControllerConfig::default(),
        );

        let outcome = controller.start(kind, "1234").await.expect("start");

        let SessionOutcome::Failed(failure) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failure.message, expected);
    }
}

#[tokio::test]
async fn unusable_failures_fall_back_to_generic_message() {
    let locker = Arc::new(ScriptedLocker::new(Reply::Garbled, accept("x")));
    let config = ControllerConfig {
        failure_message: "Something went wrong".into(),
        ..ControllerConfig::default()
    };
    let mut controller = SessionController::new(locker, config);

    let outcome = controller
        .start(SessionKind::Deposit, "1")
        .await
        .expect("start");

    let SessionOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(failure.kind, FailureKind::Unspecified);
    assert_eq!(failure.message, "Something went wrong");
}

#[tokio::test]
async fn transport_failure_surfaces_transport_text() {
    let locker = Arc::new(ScriptedLocker::new(Reply::Unreachable, accept("x")));
    let mut controller = controller(&locker);

    let outcome = controller
        .start(SessionKind::Withdraw, "1")
        .await
        .expect("start");

    let SessionOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(failure.kind, FailureKind::Transport);
    assert_eq!(failure.message, "connection refused");
    assert!(!failure.message.contains("http://"));
}

#[tokio::test(start_paused = true)]
async fn dropped_start_mid_dwell_fails_flagged_and_frees_controller() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("Locker opening"),
        accept("Locker closed"),
    ));
    let mut controller = controller(&locker);
    let mut events = controller.subscribe_events();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(100),
        controller.start(SessionKind::Withdraw, "1"),
    )
    .await;
    assert!(timed_out.is_err());

    assert_eq!(controller.phase(), Phase::Failed);
    let failure = controller
        .session()
        .and_then(Session::failure)
        .cloned()
        .expect("failure recorded");
    assert!(failure.compartment_may_be_open);
    assert_eq!(failure.operation, LockerOperation::CloseWithdraw);
    assert_eq!(failure.kind, FailureKind::Unspecified);
    assert_eq!(failure.message, DEFAULT_FAILURE_MESSAGE);
    assert_eq!(
        drain(&mut events).last(),
        Some(&SessionEvent::Failed {
            kind: SessionKind::Withdraw,
            failure,
        })
    );
    assert_eq!(entries(&locker.log).await, vec!["open-withdraw:1:1"]);

    controller.acknowledge().expect("acknowledge");
    let outcome = controller
        .start(SessionKind::Withdraw, "1")
        .await
        .expect("restart");
    assert!(matches!(outcome, SessionOutcome::Completed { .. }));
}

#[tokio::test(start_paused = true)]
async fn dropped_start_while_opening_is_not_flagged() {
    let locker = Arc::new(ScriptedLocker::new(Reply::Stall, accept("x")));
    let mut controller = controller(&locker);

    let timed_out = tokio::time::timeout(
        Duration::from_secs(30),
        controller.start(SessionKind::Deposit, "A1"),
    )
    .await;
    assert!(timed_out.is_err());

    let failure = controller
        .session()
        .and_then(Session::failure)
        .cloned()
        .expect("failure recorded");
    assert!(!failure.compartment_may_be_open);
    assert_eq!(failure.operation, LockerOperation::OpenDeposit);
    assert_eq!(entries(&locker.log).await, vec!["open-deposit:1:A1"]);

    controller.acknowledge().expect("acknowledge");
    assert!(controller.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn close_failure_flags_possibly_open_compartment() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("Locker opening"),
        Reply::Reject(Some("Door did not close in time")),
    ));
    let mut controller = controller(&locker);

    let outcome = controller
        .start(SessionKind::Deposit, "A1")
        .await
        .expect("start");

    let SessionOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(failure.compartment_may_be_open);
    assert_eq!(failure.operation, LockerOperation::CloseDeposit);
    assert_eq!(failure.message, "Door did not close in time");
    let session = controller.session().expect("session");
    assert_eq!(session.result_password(), None);
    assert_eq!(session.failure(), Some(&failure));
    // Exactly one close attempt; no retry.
    assert_eq!(entries(&locker.log).await.len(), 2);
}

#[tokio::test]
async fn deposit_without_password_is_a_failure() {
    let locker = Arc::new(ScriptedLocker::new(accept("open"), accept("Done")));
    let mut controller = SessionController::new_with_waiter(
        locker,
        Arc::new(FixedDwell::new(Duration::ZERO)),
        ControllerConfig::default(),
    );

    let outcome = controller
        .start(SessionKind::Deposit, "1")
        .await
        .expect("start");
    assert!(matches!(outcome, SessionOutcome::Failed(ref failure) if failure.kind == FailureKind::Unspecified));
    assert_eq!(controller.session().and_then(Session::result_password), None);
}

#[tokio::test]
async fn empty_code_is_rejected_without_network_call() {
    let locker = Arc::new(ScriptedLocker::new(accept("x"), accept("y")));
    let mut controller = controller(&locker);
    let mut events = controller.subscribe_events();

    for code in ["", "   "] {
        let err = controller
            .start(SessionKind::Deposit, code)
            .await
            .expect_err("must reject");
        assert_eq!(err, SessionError::EmptyCode);
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    assert_eq!(controller.phase(), Phase::Idle);
    assert!(controller.session().is_none());
    assert!(entries(&locker.log).await.is_empty());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_start_is_refused_until_session_is_cleared() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("open"),
        Reply::Accept {
            message: "Done",
            password: Some("7742"),
        },
    ));
    let mut controller = controller(&locker);
    controller
        .start(SessionKind::Deposit, "1")
        .await
        .expect("start");

    let err = controller
        .start(SessionKind::Withdraw, "7742")
        .await
        .expect_err("busy");
    assert_eq!(
        err,
        SessionError::Busy {
            kind: SessionKind::Deposit,
            phase: Phase::Completed,
        }
    );
    assert_eq!(entries(&locker.log).await.len(), 2);

    controller.expire_display().await.expect("expire");
    controller
        .start(SessionKind::Withdraw, "7742")
        .await
        .expect("start after clear");
}

#[tokio::test(start_paused = true)]
async fn completed_deposit_clears_after_display_interval() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("open"),
        Reply::Accept {
            message: "Done",
            password: Some("7742"),
        },
    ));
    let mut controller = controller(&locker);
    controller
        .start(SessionKind::Deposit, "1")
        .await
        .expect("start");
    let entered_completed = Instant::now();

    controller.expire_display().await.expect("expire");

    let shown_for = entered_completed.elapsed();
    assert!(shown_for >= Duration::from_millis(8000), "shown for {shown_for:?}");
    assert!(shown_for < Duration::from_millis(8100), "shown for {shown_for:?}");
    assert_eq!(controller.phase(), Phase::Idle);
    assert!(controller.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn completed_withdraw_clears_after_shorter_interval() {
    let locker = Arc::new(ScriptedLocker::new(accept("open"), accept("closed")));
    let mut controller = controller(&locker);
    controller
        .start(SessionKind::Withdraw, "1")
        .await
        .expect("start");
    let entered_completed = Instant::now();

    controller.expire_display().await.expect("expire");

    let shown_for = entered_completed.elapsed();
    assert!(shown_for >= Duration::from_millis(4000), "shown for {shown_for:?}");
    assert!(shown_for < Duration::from_millis(4100), "shown for {shown_for:?}");
    assert_eq!(controller.phase(), Phase::Idle);
}

#[tokio::test]
async fn failed_session_clears_only_on_acknowledge() {
    let locker = Arc::new(ScriptedLocker::new(Reply::Reject(Some("nope")), accept("x")));
    let mut controller = controller(&locker);
    controller
        .start(SessionKind::Withdraw, "1")
        .await
        .expect("start");

    let err = controller.expire_display().await.expect_err("not completed");
    assert_eq!(
        err,
        SessionError::InvalidPhase {
            action: "expire display",
            phase: Phase::Failed,
        }
    );
    assert_eq!(controller.phase(), Phase::Failed);

    controller.acknowledge().expect("acknowledge");
    assert_eq!(controller.phase(), Phase::Idle);
    assert!(controller.session().is_none());

    let err = controller.acknowledge().expect_err("nothing to acknowledge");
    assert!(matches!(err, SessionError::InvalidPhase { phase: Phase::Idle, .. }));
}

#[tokio::test(start_paused = true)]
async fn emits_one_event_per_phase_in_order() {
    let locker = Arc::new(ScriptedLocker::new(
        accept("Locker opening"),
        Reply::Accept {
            message: "Done",
            password: Some("7742"),
        },
    ));
    let mut controller = controller(&locker);
    let mut events = controller.subscribe_events();

    controller
        .start(SessionKind::Deposit, "A1B2C3")
        .await
        .expect("start");
    controller.expire_display().await.expect("expire");

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            SessionEvent::Started {
                kind: SessionKind::Deposit
            },
            SessionEvent::AwaitingPhysicalAction {
                kind: SessionKind::Deposit,
                message: "Locker opening".into(),
            },
            SessionEvent::Closing {
                kind: SessionKind::Deposit
            },
            SessionEvent::Completed {
                kind: SessionKind::Deposit,
                message: "Done".into(),
                password: Some("7742".into()),
            },
            SessionEvent::Cleared,
        ]
    );
    let phases: Vec<Phase> = events.iter().map(SessionEvent::phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::OpeningCompartment,
            Phase::AwaitingPhysicalAction,
            Phase::ClosingCompartment,
            Phase::Completed,
            Phase::Idle,
        ]
    );
}

#[test]
fn session_debug_redacts_secrets() {
    let mut session = Session::new(
        SessionKind::Deposit,
        "A1B2C3".into(),
        LockerId(1),
        ClosetId(1),
    );
    session.result_password = Some("7742".into());
    let rendered = format!("{session:?}");
    assert!(!rendered.contains("A1B2C3"));
    assert!(!rendered.contains("7742"));
}
