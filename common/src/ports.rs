//! Collaborator interfaces the control core calls into.
//!
//! Implementations live in the device binary (ESP-IDF or host simulator). None of these
//! may block for long: anything slow has to run elsewhere and report back through `poll`.

use crate::{
    error::{FetchErrorKind, PortalError, StoreError},
    poller::FetchResult,
    types::PortalMode,
    view::ViewState,
};

/// Non-blocking HTTP GET. `begin` starts a request, `poll` returns its result once.
pub trait FetchTransport: Send {
    fn begin(&mut self, url: &str) -> Result<(), FetchErrorKind>;
    fn poll(&mut self) -> Option<FetchResult>;
    fn cancel(&mut self);
}

pub trait SettingsStore: Send {
    fn load_url(&mut self) -> Result<Option<String>, StoreError>;
    fn save_url(&mut self, url: &str) -> Result<(), StoreError>;
}

pub trait Display: Send {
    fn render(&mut self, view: &ViewState);
}

pub trait Backlight: Send {
    fn set_brightness(&mut self, level: u8);
}

pub trait AmbientSensor: Send {
    fn read_ambient(&mut self) -> u16;
}

pub trait TriggerPin: Send {
    fn is_pressed(&mut self) -> bool;
}

pub trait Network: Send {
    fn is_connected(&self) -> bool;
    fn has_credentials(&self) -> bool;
    fn ip_address(&self) -> Option<String>;
}

/// The configuration portal server. `process` is pumped while a session is open and
/// returns a station URL when one was submitted.
pub trait PortalHost: Send {
    fn open(&mut self, mode: PortalMode) -> Result<(), PortalError>;
    fn process(&mut self) -> Option<String>;
    fn close(&mut self);
}

pub trait Platform: Send {
    fn reboot(&mut self);
}

pub struct DevicePorts {
    pub station: Box<dyn FetchTransport>,
    pub forecast: Box<dyn FetchTransport>,
    pub store: Box<dyn SettingsStore>,
    pub display: Box<dyn Display>,
    pub backlight: Box<dyn Backlight>,
    pub ambient: Box<dyn AmbientSensor>,
    pub trigger: Box<dyn TriggerPin>,
    pub network: Box<dyn Network>,
    pub portal: Box<dyn PortalHost>,
    pub platform: Box<dyn Platform>,
}
