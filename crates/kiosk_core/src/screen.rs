//! Which of the six kiosk screens is visible, and what it says.
//!
//! The machine only reads session events; it never drives the controller.

use std::fmt;

use shared::{domain::SessionKind, error::Failure};
use tracing::debug;

use crate::session::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    Home,
    DepositEntry,
    WithdrawEntry,
    Processing,
    Success,
    Error,
}

impl Screen {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::DepositEntry => "deposit",
            Self::WithdrawEntry => "withdraw",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    ChooseDeposit,
    ChooseWithdraw,
    /// Leave an entry screen before submitting.
    Back,
}

/// Customer-facing strings. Defaults are English.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenText {
    pub processing_deposit: String,
    pub processing_withdraw: String,
    pub place_package: String,
    pub take_package: String,
    pub finalizing: String,
    pub success_deposit: String,
    pub save_password: String,
    pub success_withdraw: String,
    pub error_generic: String,
}

impl Default for ScreenText {
    fn default() -> Self {
        Self {
            processing_deposit: "Opening locker for your deposit...".into(),
            processing_withdraw: "Opening locker for your pickup...".into(),
            place_package: "Place your package and close the door".into(),
            take_package: "Take your package and close the door".into(),
            finalizing: "Finalizing...".into(),
            success_deposit: "Deposit complete! Your pickup password is:".into(),
            save_password: "Save this password to retrieve your package".into(),
            success_withdraw: "Package collected. Thank you!".into(),
            error_generic: "Invalid code. Please try again.".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessView {
    pub headline: String,
    pub password: Option<String>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScreenMachine {
    screen: Screen,
    text: ScreenText,
    processing_text: String,
    success: Option<SuccessView>,
    error: Option<Failure>,
}

impl Default for ScreenMachine {
    fn default() -> Self {
        Self::new(ScreenText::default())
    }
}

impl ScreenMachine {
    pub fn new(text: ScreenText) -> Self {
        Self {
            screen: Screen::Home,
            text,
            processing_text: String::new(),
            success: None,
            error: None,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn text(&self) -> &ScreenText {
        &self.text
    }

    pub fn processing_text(&self) -> &str {
        &self.processing_text
    }

    pub fn success(&self) -> Option<&SuccessView> {
        self.success.as_ref()
    }

    pub fn error(&self) -> Option<&Failure> {
        self.error.as_ref()
    }

    /// Applies a customer navigation. Returns false when it does not apply
    /// to the visible screen.
    pub fn navigate(&mut self, nav: Navigation) -> bool {
        let next = match (self.screen, nav) {
            (Screen::Home, Navigation::ChooseDeposit) => Screen::DepositEntry,
            (Screen::Home, Navigation::ChooseWithdraw) => Screen::WithdrawEntry,
            (Screen::DepositEntry | Screen::WithdrawEntry, Navigation::Back) => Screen::Home,
            (screen, nav) => {
                debug!(screen = %screen, ?nav, "ignored navigation");
                return false;
            }
        };
        self.show(next);
        true
    }

    /// Reflects a controller event. Returns false when the event does not
    /// fit the visible screen.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Started { kind } => {
                self.processing_text = match kind {
                    SessionKind::Deposit => self.text.processing_deposit.clone(),
                    SessionKind::Withdraw => self.text.processing_withdraw.clone(),
                };
                self.show(Screen::Processing);
            }
            SessionEvent::Cleared => {
                self.show(Screen::Home);
                self.processing_text.clear();
                self.success = None;
                self.error = None;
            }
            _ if self.screen != Screen::Processing => {
                debug!(screen = %self.screen, phase = %event.phase(), "ignored session event");
                return false;
            }
            SessionEvent::AwaitingPhysicalAction { kind, message } => {
                let hint = match kind {
                    SessionKind::Deposit => &self.text.place_package,
                    SessionKind::Withdraw => &self.text.take_package,
                };
                self.processing_text = if message.trim().is_empty() {
                    hint.clone()
                } else {
                    format!("{message} - {hint}")
                };
            }
            SessionEvent::Closing { .. } => {
                self.processing_text = self.text.finalizing.clone();
            }
            SessionEvent::Completed { kind, password, .. } => {
                self.success = Some(match (kind, password) {
                    (SessionKind::Deposit, password) => SuccessView {
                        headline: self.text.success_deposit.clone(),
                        password: password.clone(),
                        hint: Some(self.text.save_password.clone()),
                    },
                    (SessionKind::Withdraw, _) => SuccessView {
                        headline: self.text.success_withdraw.clone(),
                        password: None,
                        hint: None,
                    },
                });
                self.show(Screen::Success);
            }
            SessionEvent::Failed { failure, .. } => {
                let mut failure = Failure::from(failure.clone());
                if failure.message.trim().is_empty() {
                    failure.message = self.text.error_generic.clone();
                }
                self.error = Some(failure);
                self.show(Screen::Error);
            }
        }
        true
    }

    fn show(&mut self, next: Screen) {
        if next != self.screen {
            debug!(from = %self.screen, to = %next, "screen change");
        }
        self.screen = next;
    }
}

#[cfg(test)]
#[path = "tests/screen_tests.rs"]
mod tests;
