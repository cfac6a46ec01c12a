pub mod aggregator;
pub mod backlight;
pub mod config;
pub mod debounce;
pub mod device;
pub mod error;
pub mod poller;
pub mod portal;
pub mod ports;
pub mod scheduler;
pub mod types;
pub mod view;

pub use aggregator::{ErrorAggregator, ErrorState, RebootRequired, ReportEffect};
pub use backlight::{BacklightController, BrightnessSample};
pub use config::{DeviceConfig, LogConfig, PortalConfig, TimingConfig};
pub use debounce::{TriggerDebouncer, TriggerEvent};
pub use device::Device;
pub use error::{ConfigurationError, FetchErrorKind, PortalError, StoreError};
pub use poller::{FetchResult, Payload, PollOutcome, Poller, PollerPhase};
pub use portal::{Countdown, ExitReason, PortalStateMachine, PortalTransition};
pub use ports::DevicePorts;
pub use scheduler::{PeriodicTask, TaskScheduler};
pub use types::{ErrorSource, Outcome, PortalMode, Severity};
pub use view::{PortalView, Readings, ViewState};
