//! Device-wide error tracking.
//!
//! One slot per [`ErrorSource`]. A failure only ever touches its own slot and a success
//! only clears its own slot, so a forecast outage cannot hide or reset a station outage.
//! Critical slots arm a reboot deadline; once any deadline passes the aggregator signals
//! [`RebootRequired`] a single time and stays latched.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::types::{ErrorSource, Outcome, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorState {
    pub source: ErrorSource,
    pub severity: Severity,
    pub raised_at_ms: Option<u64>,
    pub reboot_deadline_ms: Option<u64>,
}

impl ErrorState {
    fn clear(source: ErrorSource) -> Self {
        Self {
            source,
            severity: Severity::None,
            raised_at_ms: None,
            reboot_deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportEffect {
    Raised(Severity),
    Escalated,
    Cleared,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootRequired {
    pub source: ErrorSource,
    pub raised_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ErrorAggregator {
    wait_to_reboot_ms: u64,
    slots: [ErrorState; 3],
    reboot_signalled: bool,
}

impl ErrorAggregator {
    pub fn new(wait_to_reboot_ms: u64) -> Self {
        Self {
            wait_to_reboot_ms,
            slots: ErrorSource::ALL.map(ErrorState::clear),
            reboot_signalled: false,
        }
    }

    pub fn report(&mut self, source: ErrorSource, outcome: Outcome, now_ms: u64) -> ReportEffect {
        let wait = self.wait_to_reboot_ms;
        let slot = &mut self.slots[source.index()];

        match (outcome, slot.severity) {
            (Outcome::Success, Severity::None) => ReportEffect::Unchanged,
            (Outcome::Success, previous) => {
                *slot = ErrorState::clear(source);
                info!(
                    target: "cydwx::errors",
                    "{} recovered from {}",
                    source.as_str(),
                    previous.as_str()
                );
                ReportEffect::Cleared
            }
            (Outcome::CriticalFailure, Severity::Critical) => ReportEffect::Unchanged,
            (Outcome::CriticalFailure, previous) => {
                let deadline = now_ms.saturating_add(wait);
                slot.severity = Severity::Critical;
                slot.raised_at_ms = Some(now_ms);
                slot.reboot_deadline_ms = Some(deadline);
                error!(
                    target: "cydwx::errors",
                    "{} critical failure; reboot in {}s unless it recovers",
                    source.as_str(),
                    wait / 1_000
                );
                if previous == Severity::None {
                    ReportEffect::Raised(Severity::Critical)
                } else {
                    ReportEffect::Escalated
                }
            }
            (Outcome::NonCriticalFailure, Severity::None) => {
                slot.severity = Severity::NonCritical;
                slot.raised_at_ms = Some(now_ms);
                warn!(target: "cydwx::errors", "{} non-critical failure", source.as_str());
                ReportEffect::Raised(Severity::NonCritical)
            }
            (Outcome::NonCriticalFailure, _) => ReportEffect::Unchanged,
        }
    }

    pub fn effective_severity(&self) -> Severity {
        self.slots
            .iter()
            .map(|slot| slot.severity)
            .max()
            .unwrap_or(Severity::None)
    }

    pub fn severity(&self, source: ErrorSource) -> Severity {
        self.slots[source.index()].severity
    }

    pub fn slot(&self, source: ErrorSource) -> &ErrorState {
        &self.slots[source.index()]
    }

    pub fn slots(&self) -> &[ErrorState] {
        &self.slots
    }

    pub fn reboot_pending(&self) -> bool {
        self.reboot_signalled
    }

    /// Milliseconds until the earliest armed deadline.
    pub fn reboot_countdown_ms(&self, now_ms: u64) -> Option<u64> {
        self.earliest_deadline()
            .map(|(deadline, _)| deadline.saturating_sub(now_ms))
    }

    pub fn tick(&mut self, now_ms: u64) -> Option<RebootRequired> {
        if self.reboot_signalled {
            return None;
        }
        let (deadline, slot) = self.earliest_deadline()?;
        if now_ms < deadline {
            return None;
        }

        self.reboot_signalled = true;
        error!(
            target: "cydwx::errors",
            "{} unresolved for {}s; reboot required",
            slot.source.as_str(),
            self.wait_to_reboot_ms / 1_000
        );
        Some(RebootRequired {
            source: slot.source,
            raised_at_ms: slot.raised_at_ms.unwrap_or(deadline),
        })
    }

    fn earliest_deadline(&self) -> Option<(u64, ErrorState)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.reboot_deadline_ms.map(|deadline| (deadline, *slot)))
            .min_by_key(|(deadline, _)| *deadline)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const WAIT_MS: u64 = 300_000;

    #[test]
    fn critical_reboots_exactly_once_after_wait() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::Station, Outcome::CriticalFailure, 0);

        assert_eq!(errors.tick(299_000), None);
        assert_eq!(errors.tick(299_999), None);
        assert_eq!(
            errors.tick(300_000),
            Some(RebootRequired {
                source: ErrorSource::Station,
                raised_at_ms: 0,
            })
        );
        assert_eq!(errors.tick(300_001), None);
        assert_eq!(errors.tick(900_000), None);
        assert!(errors.reboot_pending());
    }

    #[test]
    fn late_tick_still_signals_reboot() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::WiFi, Outcome::CriticalFailure, 10_000);

        let reboot = errors.tick(1_000_000).unwrap();
        assert_eq!(reboot.source, ErrorSource::WiFi);
    }

    #[test]
    fn success_from_other_source_keeps_deadline() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::Station, Outcome::CriticalFailure, 0);
        errors.report(ErrorSource::WiFi, Outcome::Success, 1_000);
        errors.report(ErrorSource::Forecast, Outcome::Success, 2_000);

        assert_eq!(errors.slot(ErrorSource::Station).reboot_deadline_ms, Some(300_000));
        assert_eq!(errors.effective_severity(), Severity::Critical);
        assert!(errors.tick(300_000).is_some());
    }

    #[test]
    fn success_from_same_source_disarms_deadline() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::Station, Outcome::CriticalFailure, 0);

        assert_eq!(
            errors.report(ErrorSource::Station, Outcome::Success, 200_000),
            ReportEffect::Cleared
        );
        assert_eq!(errors.effective_severity(), Severity::None);
        assert_eq!(errors.tick(300_000), None);
        assert!(!errors.reboot_pending());
    }

    #[test]
    fn recovery_after_signal_does_not_unlatch() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::Station, Outcome::CriticalFailure, 0);
        assert!(errors.tick(300_000).is_some());

        errors.report(ErrorSource::Station, Outcome::Success, 300_500);
        assert!(errors.reboot_pending());
        assert_eq!(errors.tick(301_000), None);
    }

    #[test]
    fn repeated_critical_keeps_first_deadline() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        assert_eq!(
            errors.report(ErrorSource::Station, Outcome::CriticalFailure, 0),
            ReportEffect::Raised(Severity::Critical)
        );
        assert_eq!(
            errors.report(ErrorSource::Station, Outcome::CriticalFailure, 120_000),
            ReportEffect::Unchanged
        );

        assert_eq!(errors.reboot_countdown_ms(120_000), Some(180_000));
        assert!(errors.tick(300_000).is_some());
    }

    #[test]
    fn non_critical_never_arms_reboot() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        assert_eq!(
            errors.report(ErrorSource::Forecast, Outcome::NonCriticalFailure, 0),
            ReportEffect::Raised(Severity::NonCritical)
        );

        assert_eq!(errors.effective_severity(), Severity::NonCritical);
        assert_eq!(errors.reboot_countdown_ms(0), None);
        assert_eq!(errors.tick(10_000_000), None);
    }

    #[test]
    fn forecast_outage_does_not_mask_station_outage() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::Forecast, Outcome::NonCriticalFailure, 0);
        errors.report(ErrorSource::Station, Outcome::CriticalFailure, 10);
        errors.report(ErrorSource::Forecast, Outcome::Success, 20);

        assert_eq!(errors.effective_severity(), Severity::Critical);
        assert_eq!(errors.severity(ErrorSource::Forecast), Severity::None);
    }

    #[test]
    fn non_critical_does_not_downgrade_critical() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::Station, Outcome::CriticalFailure, 0);

        assert_eq!(
            errors.report(ErrorSource::Station, Outcome::NonCriticalFailure, 5),
            ReportEffect::Unchanged
        );
        assert_eq!(errors.severity(ErrorSource::Station), Severity::Critical);
    }

    #[test]
    fn non_critical_escalates_to_critical() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::Station, Outcome::NonCriticalFailure, 0);

        assert_eq!(
            errors.report(ErrorSource::Station, Outcome::CriticalFailure, 50),
            ReportEffect::Escalated
        );
        assert_eq!(
            errors.slot(ErrorSource::Station).reboot_deadline_ms,
            Some(300_050)
        );
    }

    #[test]
    fn double_success_on_clear_source_is_noop() {
        let mut errors = ErrorAggregator::new(WAIT_MS);

        assert_eq!(
            errors.report(ErrorSource::Station, Outcome::Success, 0),
            ReportEffect::Unchanged
        );
        assert_eq!(
            errors.report(ErrorSource::Station, Outcome::Success, 1),
            ReportEffect::Unchanged
        );
        assert_eq!(errors.effective_severity(), Severity::None);
    }

    #[test]
    fn earliest_deadline_wins() {
        let mut errors = ErrorAggregator::new(WAIT_MS);
        errors.report(ErrorSource::WiFi, Outcome::CriticalFailure, 50_000);
        errors.report(ErrorSource::Station, Outcome::CriticalFailure, 60_000);

        let reboot = errors.tick(350_000).unwrap();
        assert_eq!(reboot.source, ErrorSource::WiFi);
    }
}
