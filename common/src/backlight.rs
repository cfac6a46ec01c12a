use serde::Serialize;

use crate::{config::BacklightConfig, error::ConfigurationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrightnessSample {
    pub raw: u16,
    pub level: u8,
}

/// Maps the LDR reading to a PWM duty. The LDR reads low in bright rooms, so a low raw
/// value maps to full brightness and a high raw value to the dim floor.
#[derive(Debug, Clone)]
pub struct BacklightController {
    low_threshold: u16,
    high_threshold: u16,
    min_brightness: u8,
    max_brightness: u8,
}

impl BacklightController {
    pub fn new(config: &BacklightConfig) -> Result<Self, ConfigurationError> {
        if config.low_threshold >= config.high_threshold
            || config.min_brightness > config.max_brightness
        {
            return Err(ConfigurationError::InvalidBacklightCurve);
        }
        Ok(Self {
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
            min_brightness: config.min_brightness,
            max_brightness: config.max_brightness,
        })
    }

    pub fn compute_brightness(&self, raw: u16) -> BrightnessSample {
        let level = if raw <= self.low_threshold {
            self.max_brightness
        } else if raw >= self.high_threshold {
            self.min_brightness
        } else {
            let span = u32::from(self.high_threshold - self.low_threshold);
            let offset = u32::from(raw - self.low_threshold);
            let range = u32::from(self.max_brightness - self.min_brightness);
            let drop = (offset * range + span / 2) / span;
            self.max_brightness - drop as u8
        };
        BrightnessSample { raw, level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> BacklightController {
        BacklightController::new(&BacklightConfig {
            low_threshold: 100,
            high_threshold: 300,
            min_brightness: 20,
            max_brightness: 220,
            initial_brightness: 100,
        })
        .unwrap()
    }

    #[test]
    fn endpoints_map_to_limits() {
        let backlight = controller();
        assert_eq!(backlight.compute_brightness(100).level, 220);
        assert_eq!(backlight.compute_brightness(300).level, 20);
    }

    #[test]
    fn outside_range_clamps() {
        let backlight = controller();
        assert_eq!(backlight.compute_brightness(0).level, 220);
        assert_eq!(backlight.compute_brightness(4_095).level, 20);
    }

    #[test]
    fn midpoint_is_midway() {
        let backlight = controller();
        assert_eq!(backlight.compute_brightness(200).level, 120);
    }

    #[test]
    fn brightness_never_increases_with_raw() {
        let backlight = controller();
        let mut previous = u8::MAX;
        for raw in (0..=400).step_by(7) {
            let level = backlight.compute_brightness(raw).level;
            assert!(level <= previous);
            previous = level;
        }
    }

    #[test]
    fn rejects_inverted_curve() {
        let config = BacklightConfig {
            low_threshold: 300,
            high_threshold: 100,
            ..BacklightConfig::default()
        };
        assert_eq!(
            BacklightController::new(&config).unwrap_err(),
            ConfigurationError::InvalidBacklightCurve
        );

        let config = BacklightConfig {
            min_brightness: 200,
            max_brightness: 100,
            ..BacklightConfig::default()
        };
        assert!(BacklightController::new(&config).is_err());
    }
}
