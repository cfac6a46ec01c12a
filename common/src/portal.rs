use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::types::PortalMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalSession {
    pub mode: PortalMode,
    pub started_at_ms: u64,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Requested,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalTransition {
    Entered(PortalMode),
    Exited(ExitReason),
}

/// Time left in a portal session, whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub minutes: u64,
    pub seconds: u64,
}

impl Countdown {
    pub fn from_remaining_ms(remaining_ms: u64) -> Self {
        let total_secs = remaining_ms / 1_000;
        Self {
            minutes: total_secs / 60,
            seconds: total_secs % 60,
        }
    }

    pub fn message(&self) -> String {
        format!("Portal closes in {self}")
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone)]
pub struct PortalStateMachine {
    timeout_ms: u64,
    session: Option<PortalSession>,
}

impl PortalStateMachine {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&PortalSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn mode(&self) -> Option<PortalMode> {
        self.session.map(|session| session.mode)
    }

    /// Opens a session. A second enter while one is open is ignored.
    pub fn enter(&mut self, mode: PortalMode, now_ms: u64) -> Option<PortalTransition> {
        if self.session.is_some() {
            return None;
        }
        self.session = Some(PortalSession {
            mode,
            started_at_ms: now_ms,
            deadline_ms: now_ms.saturating_add(self.timeout_ms),
        });
        info!(target: "cydwx::portal", "portal opened in {}", mode.as_str());
        Some(PortalTransition::Entered(mode))
    }

    pub fn exit(&mut self, now_ms: u64) -> Option<PortalTransition> {
        self.close(ExitReason::Requested, now_ms)
    }

    /// Trigger-pin toggle: opens with `entry_mode` when inactive, closes otherwise.
    pub fn handle_toggle(
        &mut self,
        entry_mode: PortalMode,
        now_ms: u64,
    ) -> Option<PortalTransition> {
        if self.is_active() {
            self.exit(now_ms)
        } else {
            self.enter(entry_mode, now_ms)
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> Option<PortalTransition> {
        match self.session {
            Some(session) if now_ms >= session.deadline_ms => {
                self.close(ExitReason::TimedOut, now_ms)
            }
            _ => None,
        }
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.session
            .map(|session| session.deadline_ms.saturating_sub(now_ms))
    }

    pub fn countdown(&self, now_ms: u64) -> Option<Countdown> {
        self.remaining_ms(now_ms).map(Countdown::from_remaining_ms)
    }

    fn close(&mut self, reason: ExitReason, now_ms: u64) -> Option<PortalTransition> {
        let session = self.session.take()?;
        info!(
            target: "cydwx::portal",
            "portal closed ({reason:?}) after {}s",
            now_ms.saturating_sub(session.started_at_ms) / 1_000
        );
        Some(PortalTransition::Exited(reason))
    }
}
