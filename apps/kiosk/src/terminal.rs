//! Line-driven terminal front end: renders the visible screen and feeds
//! typed keys to the keypad and the session controller.

use std::io::Write;

use anyhow::{Context, Result};
use kiosk_core::{
    Keypad, Navigation, Screen, ScreenMachine, SessionController, SessionError, SessionEvent,
    SessionOutcome,
};
use shared::domain::SessionKind;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::broadcast::{
        self,
        error::{RecvError, TryRecvError},
    },
};
use tracing::{debug, info, warn};

enum Flow {
    Continue,
    Quit,
}

pub struct Kiosk<W: Write> {
    controller: SessionController,
    screen: ScreenMachine,
    events: broadcast::Receiver<SessionEvent>,
    deposit_pad: Keypad,
    withdraw_pad: Keypad,
    out: W,
}

impl<W: Write> Kiosk<W> {
    pub fn new(
        controller: SessionController,
        screen: ScreenMachine,
        keypad_max_len: Option<usize>,
        out: W,
    ) -> Self {
        let events = controller.subscribe_events();
        Self {
            controller,
            screen,
            events,
            deposit_pad: Keypad::new(keypad_max_len),
            withdraw_pad: Keypad::new(keypad_max_len),
            out,
        }
    }

    pub fn screen(&self) -> &ScreenMachine {
        &self.screen
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Runs until `q` on the home screen or until input closes.
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            self.render()?;
            if self.screen.screen() == Screen::Success {
                self.controller.expire_display().await?;
                self.pump_events();
                continue;
            }

            let Some(line) = lines
                .next_line()
                .await
                .context("failed to read kiosk input")?
            else {
                info!("kiosk input closed");
                break;
            };
            if let Flow::Quit = self.handle_line(line.trim()).await? {
                break;
            }
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        match self.screen.screen() {
            Screen::Home => match line {
                "d" => {
                    self.screen.navigate(Navigation::ChooseDeposit);
                }
                "w" => {
                    self.screen.navigate(Navigation::ChooseWithdraw);
                }
                "q" => return Ok(Flow::Quit),
                other => debug!(input = other, "unrecognised home input"),
            },
            Screen::DepositEntry => self.handle_entry(SessionKind::Deposit, line).await?,
            Screen::WithdrawEntry => self.handle_entry(SessionKind::Withdraw, line).await?,
            Screen::Error => {
                self.controller.acknowledge()?;
                self.pump_events();
            }
            Screen::Processing | Screen::Success => debug!("input ignored while busy"),
        }
        Ok(Flow::Continue)
    }

    async fn handle_entry(&mut self, kind: SessionKind, line: &str) -> Result<()> {
        match line {
            "b" => {
                self.keypad_mut(kind).clear();
                self.screen.navigate(Navigation::Back);
            }
            "" => self.submit(kind).await?,
            keys => {
                self.keypad_mut(kind).press_str(keys);
            }
        }
        Ok(())
    }

    async fn submit(&mut self, kind: SessionKind) -> Result<()> {
        let code = self.keypad_mut(kind).take();

        let outcome = {
            let Self {
                controller,
                screen,
                events,
                out,
                ..
            } = &mut *self;
            let run = controller.start(kind, &code);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Ok(event) => show_progress(out, screen, &event)?,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "kiosk fell behind session events");
                        }
                        Err(RecvError::Closed) => break (&mut run).await,
                    },
                    outcome = &mut run => break outcome,
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            show_progress(&mut self.out, &mut self.screen, &event)?;
        }

        match outcome {
            Ok(SessionOutcome::Completed { .. }) => debug!(kind = %kind, "session completed"),
            Ok(SessionOutcome::Failed(failure)) => {
                debug!(kind = %kind, failure = ?failure.kind, "session ended in failure");
            }
            Err(SessionError::EmptyCode) => debug!(kind = %kind, "nothing entered"),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn keypad_mut(&mut self, kind: SessionKind) -> &mut Keypad {
        match kind {
            SessionKind::Deposit => &mut self.deposit_pad,
            SessionKind::Withdraw => &mut self.withdraw_pad,
        }
    }

    fn pump_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.screen.apply(&event);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "kiosk fell behind session events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn render(&mut self) -> Result<()> {
        let entry = match self.screen.screen() {
            Screen::DepositEntry => self.deposit_pad.value(),
            Screen::WithdrawEntry => self.withdraw_pad.value(),
            _ => "",
        };
        write_screen(&mut self.out, &self.screen, entry)
    }
}

/// Terminal screens are drawn by the main loop; only progress is drawn here.
fn show_progress<W: Write>(
    out: &mut W,
    screen: &mut ScreenMachine,
    event: &SessionEvent,
) -> Result<()> {
    if screen.apply(event) && screen.screen() == Screen::Processing {
        write_screen(out, screen, "")?;
    }
    Ok(())
}

fn write_screen<W: Write>(out: &mut W, screen: &ScreenMachine, entry: &str) -> Result<()> {
    out.write_all(render_screen(screen, entry).as_bytes())
        .and_then(|()| out.flush())
        .context("failed to write kiosk screen")
}

pub fn render_screen(screen: &ScreenMachine, entry: &str) -> String {
    let title = screen.screen().as_str().to_uppercase();
    let body = match screen.screen() {
        Screen::Home => "[d] Deposit a package   [w] Withdraw a package   [q] Quit".to_string(),
        Screen::DepositEntry => format!(
            "Tracking code: {entry}\n(digits, c = clear, < = delete, b = back, empty line = submit)"
        ),
        Screen::WithdrawEntry => format!(
            "Password: {entry}\n(digits, c = clear, < = delete, b = back, empty line = submit)"
        ),
        Screen::Processing => screen.processing_text().to_string(),
        Screen::Success => match screen.success() {
            Some(view) => {
                let mut lines = vec![view.headline.clone()];
                if let Some(password) = &view.password {
                    lines.push(format!("    {password}"));
                }
                if let Some(hint) = &view.hint {
                    lines.push(hint.clone());
                }
                lines.join("\n")
            }
            None => String::new(),
        },
        Screen::Error => {
            let message = screen
                .error()
                .map_or(screen.text().error_generic.as_str(), |error| {
                    error.message.as_str()
                });
            format!("{message}\n(press enter to return)")
        }
    };
    format!("\n=== {title} ===\n{body}\n")
}

#[cfg(test)]
#[path = "tests/terminal_tests.rs"]
mod tests;
