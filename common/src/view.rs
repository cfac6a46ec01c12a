use serde::Serialize;

use crate::{
    config::{PortalConfig, ERROR_STATE_CODE},
    poller::Payload,
    portal::Countdown,
    types::{PortalMode, Severity},
};

pub const READINGS_PAGES: u8 = 2;

/// Latest successful payload per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Readings {
    pub station: Option<Payload>,
    #[serde(rename = "stationFetchedAtMs")]
    pub station_fetched_at_ms: Option<u64>,
    pub forecast: Option<Payload>,
    #[serde(rename = "forecastFetchedAtMs")]
    pub forecast_fetched_at_ms: Option<u64>,
}

impl Readings {
    pub fn station_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.station_fetched_at_ms
            .map(|at| now_ms.saturating_sub(at))
    }

    pub fn forecast_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.forecast_fetched_at_ms
            .map(|at| now_ms.saturating_sub(at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortalView {
    pub mode: PortalMode,
    pub countdown: Countdown,
    #[serde(rename = "countdownText")]
    pub countdown_text: String,
    pub message: String,
}

impl PortalView {
    pub fn new(
        mode: PortalMode,
        countdown: Countdown,
        portal: &PortalConfig,
        ip_address: Option<&str>,
    ) -> Self {
        let message = match mode {
            PortalMode::ApMode => format!(
                "WiFi Manager Portal is Active.\nCurrently in AP Mode.\nSSID: {}\nPassword: {}\nGo to: 192.168.4.1\nand set-up WiFi.",
                portal.ap_ssid, portal.ap_password
            ),
            PortalMode::StationMode => format!(
                "WiFi Manager Portal is Active.\nCurrently in Station Mode.\nPortal IP Address: {}.",
                ip_address.unwrap_or("unknown")
            ),
        };
        Self {
            mode,
            countdown,
            countdown_text: countdown.message(),
            message,
        }
    }
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub readings: Readings,
    pub severity: Severity,
    #[serde(rename = "weatherCodeOverride")]
    pub weather_code_override: Option<u16>,
    #[serde(rename = "readingsPage")]
    pub readings_page: u8,
    pub brightness: u8,
    #[serde(rename = "rebootInSecs")]
    pub reboot_in_secs: Option<u64>,
    pub portal: Option<PortalView>,
}

impl ViewState {
    pub fn weather_code_override_for(severity: Severity) -> Option<u16> {
        (severity == Severity::Critical).then_some(ERROR_STATE_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ap_message_names_credentials() {
        let view = PortalView::new(
            PortalMode::ApMode,
            Countdown::from_remaining_ms(200_000),
            &PortalConfig::default(),
            None,
        );
        assert!(view.message.contains("SSID: cydWeeWX"));
        assert_eq!(view.countdown_text, "Portal closes in 03:20");
    }

    #[test]
    fn station_message_shows_ip() {
        let view = PortalView::new(
            PortalMode::StationMode,
            Countdown::from_remaining_ms(1_000),
            &PortalConfig::default(),
            Some("10.0.0.7"),
        );
        assert!(view.message.ends_with("Portal IP Address: 10.0.0.7."));
    }

    #[test]
    fn error_code_only_for_critical() {
        assert_eq!(ViewState::weather_code_override_for(Severity::None), None);
        assert_eq!(
            ViewState::weather_code_override_for(Severity::NonCritical),
            None
        );
        assert_eq!(
            ViewState::weather_code_override_for(Severity::Critical),
            Some(ERROR_STATE_CODE)
        );
    }

    #[test]
    fn serializes_camel_case_fields() {
        let view = ViewState {
            readings: Readings::default(),
            severity: Severity::NonCritical,
            weather_code_override: None,
            readings_page: 1,
            brightness: 100,
            reboot_in_secs: None,
            portal: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["severity"], "NON_CRITICAL");
        assert_eq!(json["readingsPage"], 1);
    }
}
