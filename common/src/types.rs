use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    NonCritical,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::NonCritical => "NON_CRITICAL",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSource {
    Station,
    Forecast,
    WiFi,
}

impl ErrorSource {
    pub const ALL: [ErrorSource; 3] = [Self::Station, Self::Forecast, Self::WiFi];

    pub fn index(self) -> usize {
        match self {
            Self::Station => 0,
            Self::Forecast => 1,
            Self::WiFi => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "STATION",
            Self::Forecast => "FORECAST",
            Self::WiFi => "WIFI",
        }
    }

    /// Fixed classification of a failure coming from this source.
    pub fn failure_outcome(self) -> Outcome {
        match self {
            Self::Station | Self::WiFi => Outcome::CriticalFailure,
            Self::Forecast => Outcome::NonCriticalFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NonCriticalFailure,
    CriticalFailure,
}

impl Outcome {
    pub fn severity(self) -> Severity {
        match self {
            Self::Success => Severity::None,
            Self::NonCriticalFailure => Severity::NonCritical,
            Self::CriticalFailure => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortalMode {
    ApMode,
    StationMode,
}

impl PortalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApMode => "AP_MODE",
            Self::StationMode => "STATION_MODE",
        }
    }
}
