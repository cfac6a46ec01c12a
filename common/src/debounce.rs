use crate::error::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    ToggleRequested,
}

/// Press-and-hold detector for the portal trigger pin.
///
/// Sampled on a fixed short period. A press only counts once it has been held for
/// `hold_count` consecutive samples, and it fires once per press no matter how long the
/// button stays down after that.
#[derive(Debug, Clone)]
pub struct TriggerDebouncer {
    hold_count: u16,
    consecutive: u16,
    armed: bool,
    pressed: bool,
    last_sample_ms: Option<u64>,
}

impl TriggerDebouncer {
    pub fn new(hold_count: u16) -> Result<Self, ConfigurationError> {
        if hold_count == 0 {
            return Err(ConfigurationError::InvalidHoldCount);
        }
        Ok(Self {
            hold_count,
            consecutive: 0,
            armed: true,
            pressed: false,
            last_sample_ms: None,
        })
    }

    pub fn sample(&mut self, pressed: bool, now_ms: u64) -> Option<TriggerEvent> {
        self.pressed = pressed;
        self.last_sample_ms = Some(now_ms);

        if !pressed {
            self.consecutive = 0;
            self.armed = true;
            return None;
        }

        self.consecutive = self.consecutive.saturating_add(1);
        if self.armed && self.consecutive >= self.hold_count {
            self.armed = false;
            return Some(TriggerEvent::ToggleRequested);
        }
        None
    }

    pub fn consecutive_samples(&self) -> u16 {
        self.consecutive
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn last_sample_ms(&self) -> Option<u64> {
        self.last_sample_ms
    }
}
