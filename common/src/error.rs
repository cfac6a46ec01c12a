use thiserror::Error;

/// Boot-time configuration failures. Any of these aborts startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("task `{0}` has a zero interval")]
    InvalidInterval(&'static str),
    #[error("task `{0}` registered after the scheduler started")]
    SchedulerStarted(&'static str),
    #[error("task `{0}` is already registered")]
    DuplicateTask(&'static str),
    #[error("trigger hold count must be at least 1")]
    InvalidHoldCount,
    #[error("backlight curve needs low < high thresholds and min <= max brightness")]
    InvalidBacklightCurve,
    #[error("invalid station url: {0}")]
    InvalidStationUrl(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("transport busy with another request")]
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("settings storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    #[error("portal failed to start: {0}")]
    StartFailed(String),
}
