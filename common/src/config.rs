use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

pub const STATION_JSON_DATA_FILE: &str = "cyd_weewx.json";
pub const STATION_URL_MAX_LEN: usize = 64;
pub const DEFAULT_STATION_URL: &str = "http://yourWeeWx.server.local/";

pub const OPEN_METEO_URL: &str = "http://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}&current=is_day,weather_code&daily=sunrise,sunset&forecast_days=1";

pub const PREFERENCES_NAMESPACE: &str = "cydWeeWX";
pub const PREFERENCES_KEY: &str = "WEEWX_JSON_URL";

/// Forces the weather icon into its error glyph.
pub const ERROR_STATE_CODE: u16 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    pub trigger_sample_ms: u64,
    pub portal_process_ms: u64,
    pub portal_countdown_ms: u64,
    pub network_ms: u64,
    pub wifi_health_ms: u64,
    pub station_poll_ms: u64,
    pub forecast_poll_ms: u64,
    pub readings_page_ms: u64,
    pub backlight_ms: u64,
    pub error_watch_ms: u64,
    pub display_refresh_ms: u64,
    pub request_timeout_ms: u64,
    pub error_wait_to_reboot_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            trigger_sample_ms: 100,
            portal_process_ms: 10,
            portal_countdown_ms: 1_000,
            network_ms: 50,
            wifi_health_ms: 1_000,
            station_poll_ms: 120_000,
            forecast_poll_ms: 300_000,
            readings_page_ms: 20_000,
            backlight_ms: 500,
            error_watch_ms: 1_000,
            display_refresh_ms: 5,
            request_timeout_ms: 15_000,
            error_wait_to_reboot_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BacklightConfig {
    pub low_threshold: u16,
    pub high_threshold: u16,
    pub min_brightness: u8,
    pub max_brightness: u8,
    pub initial_brightness: u8,
}

impl Default for BacklightConfig {
    fn default() -> Self {
        Self {
            low_threshold: 10,
            high_threshold: 400,
            min_brightness: 20,
            max_brightness: 255,
            initial_brightness: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortalConfig {
    pub timeout_ms: u64,
    pub trigger_hold_count: u16,
    pub hostname: String,
    pub ap_ssid: String,
    pub ap_password: String,
    pub title: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            trigger_hold_count: 20,
            hostname: "cydWeeWX".to_string(),
            ap_ssid: "cydWeeWX".to_string(),
            ap_password: "cydWeeWX".to_string(),
            title: "Management Portal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastConfig {
    pub latitude: f32,
    pub longitude: f32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            latitude: 45.42,
            longitude: -75.69,
        }
    }
}

impl ForecastConfig {
    pub fn url(&self) -> String {
        OPEN_METEO_URL
            .replace("{lat}", &format!("{:.4}", self.latitude))
            .replace("{lon}", &format!("{:.4}", self.longitude))
    }

    pub fn sanitize(&mut self) {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            *self = Self::default();
            return;
        }
        self.latitude = self.latitude.clamp(-90.0, 90.0);
        self.longitude = self.longitude.clamp(-180.0, 180.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub enabled: bool,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub backlight: BacklightConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default = "default_station_url")]
    pub station_url: String,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_station_url() -> String {
    DEFAULT_STATION_URL.to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            backlight: BacklightConfig::default(),
            portal: PortalConfig::default(),
            forecast: ForecastConfig::default(),
            station_url: default_station_url(),
            log: LogConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        self.forecast.sanitize();
        if self.portal.trigger_hold_count == 0 {
            self.portal.trigger_hold_count = PortalConfig::default().trigger_hold_count;
        }
        if self.portal.timeout_ms == 0 {
            self.portal.timeout_ms = PortalConfig::default().timeout_ms;
        }
        if validate_station_url(&self.station_url).is_err() {
            self.station_url = default_station_url();
        }
    }
}

/// Accepts the base URL typed into the portal field.
pub fn validate_station_url(url: &str) -> Result<(), ConfigurationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ConfigurationError::InvalidStationUrl("url is empty"));
    }
    if url.len() > STATION_URL_MAX_LEN {
        return Err(ConfigurationError::InvalidStationUrl(
            "url is longer than 64 characters",
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigurationError::InvalidStationUrl(
            "url must start with http:// or https://",
        ));
    }
    Ok(())
}

/// Full data URL for a station base URL.
pub fn station_data_url(base: &str) -> String {
    let base = base.trim();
    if base.ends_with(".json") {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{STATION_JSON_DATA_FILE}")
    } else {
        format!("{base}/{STATION_JSON_DATA_FILE}")
    }
}
