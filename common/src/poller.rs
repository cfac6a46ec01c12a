use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::FetchErrorKind,
    ports::FetchTransport,
    types::{ErrorSource, Outcome},
};

/// Response body, passed through unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub success: bool,
    pub payload: Option<Payload>,
    pub error_kind: Option<FetchErrorKind>,
}

impl FetchResult {
    pub fn ok(payload: Payload) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error_kind: None,
        }
    }

    pub fn failed(kind: FetchErrorKind) -> Self {
        Self {
            success: false,
            payload: None,
            error_kind: Some(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerPhase {
    Idle,
    Requesting { started_at_ms: u64 },
    Complete { at_ms: u64 },
    Failed { at_ms: u64, kind: FetchErrorKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub source: ErrorSource,
    pub outcome: Outcome,
    pub payload: Option<Payload>,
    pub error: Option<FetchErrorKind>,
}

/// One data source's fetch cycle: `Idle -> Requesting -> Complete | Failed`.
///
/// `request` starts a cycle and `advance` is pumped until the transport answers or the
/// request timeout passes. A request issued while one is still in flight is dropped.
#[derive(Debug, Clone)]
pub struct Poller {
    source: ErrorSource,
    url: String,
    request_timeout_ms: u64,
    phase: PollerPhase,
}

impl Poller {
    pub fn new(source: ErrorSource, url: impl Into<String>, request_timeout_ms: u64) -> Self {
        Self {
            source,
            url: url.into(),
            request_timeout_ms,
            phase: PollerPhase::Idle,
        }
    }

    pub fn source(&self) -> ErrorSource {
        self.source
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn phase(&self) -> &PollerPhase {
        &self.phase
    }

    pub fn is_requesting(&self) -> bool {
        matches!(self.phase, PollerPhase::Requesting { .. })
    }

    /// Starts a fetch. Returns an outcome only when the transport refused to start.
    pub fn request(
        &mut self,
        transport: &mut dyn FetchTransport,
        now_ms: u64,
    ) -> Option<PollOutcome> {
        if self.is_requesting() {
            debug!(
                target: "cydwx::poller",
                "{} request still in flight; skipping",
                self.source.as_str()
            );
            return None;
        }

        match transport.begin(&self.url) {
            Ok(()) => {
                debug!(target: "cydwx::poller", "{} GET {}", self.source.as_str(), self.url);
                self.phase = PollerPhase::Requesting {
                    started_at_ms: now_ms,
                };
                None
            }
            Err(kind) => Some(self.finish(FetchResult::failed(kind), now_ms)),
        }
    }

    pub fn advance(
        &mut self,
        transport: &mut dyn FetchTransport,
        now_ms: u64,
    ) -> Option<PollOutcome> {
        let PollerPhase::Requesting { started_at_ms } = self.phase else {
            return None;
        };

        if let Some(result) = transport.poll() {
            return Some(self.finish(result, now_ms));
        }

        if now_ms.saturating_sub(started_at_ms) >= self.request_timeout_ms {
            transport.cancel();
            return Some(self.finish(FetchResult::failed(FetchErrorKind::Timeout), now_ms));
        }
        None
    }

    fn finish(&mut self, result: FetchResult, now_ms: u64) -> PollOutcome {
        let result = match result {
            FetchResult {
                success: true,
                payload: Some(payload),
                ..
            } if !payload.is_empty() => FetchResult::ok(payload),
            FetchResult {
                success: true, ..
            } => FetchResult::failed(FetchErrorKind::Transport("empty response body".into())),
            failed => failed,
        };

        if result.success {
            self.phase = PollerPhase::Complete { at_ms: now_ms };
            return PollOutcome {
                source: self.source,
                outcome: Outcome::Success,
                payload: result.payload,
                error: None,
            };
        }

        let kind = result
            .error_kind
            .unwrap_or_else(|| FetchErrorKind::Transport("unknown failure".into()));
        warn!(target: "cydwx::poller", "{} fetch failed: {kind}", self.source.as_str());
        self.phase = PollerPhase::Failed {
            at_ms: now_ms,
            kind: kind.clone(),
        };
        PollOutcome {
            source: self.source,
            outcome: self.source.failure_outcome(),
            payload: None,
            error: Some(kind),
        }
    }
}
