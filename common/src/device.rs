use tracing::{debug, error, info, warn};

use crate::{
    aggregator::ErrorAggregator,
    backlight::BacklightController,
    config::{station_data_url, validate_station_url, DeviceConfig},
    debounce::{TriggerDebouncer, TriggerEvent},
    error::ConfigurationError,
    poller::{PollOutcome, Poller},
    portal::{PortalStateMachine, PortalTransition},
    ports::DevicePorts,
    scheduler::{PeriodicTask, TaskScheduler},
    types::{ErrorSource, Outcome, PortalMode, Severity},
    view::{PortalView, Readings, ViewState, READINGS_PAGES},
};

/// What a rendered frame depends on. Payloads are tracked by generation so the
/// per-tick comparison never touches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameKey {
    readings_generation: u64,
    portal_generation: u64,
    severity: Severity,
    readings_page: u8,
    brightness: u8,
    reboot_in_secs: Option<u64>,
}

/// Everything the periodic tasks operate on.
pub struct DeviceState {
    config: DeviceConfig,
    ports: DevicePorts,
    errors: ErrorAggregator,
    portal: PortalStateMachine,
    debouncer: TriggerDebouncer,
    backlight: BacklightController,
    station: Poller,
    forecast: Poller,
    readings: Readings,
    station_url: String,
    readings_page: u8,
    brightness: u8,
    portal_view: Option<PortalView>,
    readings_generation: u64,
    portal_generation: u64,
    last_frame: Option<FrameKey>,
    refresh_requested: bool,
    reboot_requested: bool,
}

/// Top-level device context: owns the task table and all state for the process lifetime.
pub struct Device {
    scheduler: TaskScheduler<DeviceState>,
    state: DeviceState,
}

impl Device {
    pub fn new(
        mut config: DeviceConfig,
        mut ports: DevicePorts,
    ) -> Result<Self, ConfigurationError> {
        config.sanitize();

        let station_url = match ports.store.load_url() {
            Ok(Some(url)) if validate_station_url(&url).is_ok() => url,
            Ok(Some(url)) => {
                warn!(target: "cydwx::device", "ignoring invalid stored station url `{url}`");
                config.station_url.clone()
            }
            Ok(None) => config.station_url.clone(),
            Err(err) => {
                warn!(target: "cydwx::device", "failed to load station url: {err}");
                config.station_url.clone()
            }
        };
        info!(target: "cydwx::device", "station url: {station_url}");

        let timing = config.timing.clone();
        let state = DeviceState {
            errors: ErrorAggregator::new(timing.error_wait_to_reboot_ms),
            portal: PortalStateMachine::new(config.portal.timeout_ms),
            debouncer: TriggerDebouncer::new(config.portal.trigger_hold_count)?,
            backlight: BacklightController::new(&config.backlight)?,
            station: Poller::new(
                ErrorSource::Station,
                station_data_url(&station_url),
                timing.request_timeout_ms,
            ),
            forecast: Poller::new(
                ErrorSource::Forecast,
                config.forecast.url(),
                timing.request_timeout_ms,
            ),
            readings: Readings::default(),
            station_url,
            readings_page: 0,
            brightness: config.backlight.initial_brightness,
            portal_view: None,
            readings_generation: 0,
            portal_generation: 0,
            last_frame: None,
            refresh_requested: false,
            reboot_requested: false,
            config,
            ports,
        };

        let mut scheduler = TaskScheduler::new();
        for task in [
            PeriodicTask::new(
                "trigger_pin",
                timing.trigger_sample_ms,
                DeviceState::sample_trigger,
            ),
            PeriodicTask::new(
                "portal_process",
                timing.portal_process_ms,
                DeviceState::process_portal,
            ),
            PeriodicTask::new(
                "portal_countdown",
                timing.portal_countdown_ms,
                DeviceState::refresh_countdown,
            ),
            PeriodicTask::new("network", timing.network_ms, DeviceState::pump_network),
            PeriodicTask::new("wifi_health", timing.wifi_health_ms, DeviceState::check_wifi)
                .run_on_start(),
            PeriodicTask::new(
                "station_poll",
                timing.station_poll_ms,
                DeviceState::poll_station,
            )
            .run_on_start(),
            PeriodicTask::new(
                "forecast_poll",
                timing.forecast_poll_ms,
                DeviceState::poll_forecast,
            )
            .run_on_start(),
            PeriodicTask::new(
                "readings_page",
                timing.readings_page_ms,
                DeviceState::rotate_page,
            ),
            PeriodicTask::new("backlight", timing.backlight_ms, DeviceState::adjust_backlight),
            PeriodicTask::new("error_watch", timing.error_watch_ms, DeviceState::watch_errors),
            PeriodicTask::new(
                "display_refresh",
                timing.display_refresh_ms,
                DeviceState::refresh_display,
            )
            .run_on_start(),
        ] {
            scheduler.register(task)?;
        }

        Ok(Self { scheduler, state })
    }

    pub fn start(&mut self, now_ms: u64) {
        let level = self.state.brightness;
        self.state.ports.backlight.set_brightness(level);
        self.scheduler.start(now_ms);
        info!(
            target: "cydwx::device",
            "started with {} tasks: {}",
            self.scheduler.len(),
            self.scheduler.task_names().join(", ")
        );
    }

    pub fn tick(&mut self, now_ms: u64) -> usize {
        self.scheduler.tick(&mut self.state, now_ms)
    }

    pub fn view(&self, now_ms: u64) -> ViewState {
        self.state.build_view(now_ms)
    }

    pub fn errors(&self) -> &ErrorAggregator {
        &self.state.errors
    }

    pub fn portal(&self) -> &PortalStateMachine {
        &self.state.portal
    }

    pub fn readings(&self) -> &Readings {
        &self.state.readings
    }

    pub fn station_url(&self) -> &str {
        &self.state.station_url
    }

    pub fn brightness(&self) -> u8 {
        self.state.brightness
    }

    pub fn reboot_requested(&self) -> bool {
        self.state.reboot_requested
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.scheduler.task_names()
    }
}

impl DeviceState {
    fn sample_trigger(&mut self, now_ms: u64) {
        let pressed = self.ports.trigger.is_pressed();
        if let Some(TriggerEvent::ToggleRequested) = self.debouncer.sample(pressed, now_ms) {
            info!(target: "cydwx::device", "trigger held; toggling portal");
            let mode = self.entry_mode();
            let transition = self.portal.handle_toggle(mode, now_ms);
            self.apply_portal_transition(transition, now_ms);
        }
    }

    fn entry_mode(&self) -> PortalMode {
        let network = &self.ports.network;
        if network.has_credentials() && network.is_connected() {
            PortalMode::StationMode
        } else {
            PortalMode::ApMode
        }
    }

    fn apply_portal_transition(&mut self, transition: Option<PortalTransition>, now_ms: u64) {
        match transition {
            Some(PortalTransition::Entered(mode)) => {
                if let Err(err) = self.ports.portal.open(mode) {
                    error!(target: "cydwx::device", "{err}; leaving portal");
                    self.portal.exit(now_ms);
                    return;
                }
                self.refresh_countdown(now_ms);
            }
            Some(PortalTransition::Exited(reason)) => {
                if let Some(url) = self.ports.portal.process() {
                    self.apply_station_url(url, now_ms);
                }
                self.ports.portal.close();
                self.set_portal_view(None);
                self.refresh_requested = true;
                debug!(target: "cydwx::device", "portal exit ({reason:?}); resuming polls");
            }
            None => {}
        }
    }

    fn process_portal(&mut self, now_ms: u64) {
        let transition = self.portal.tick(now_ms);
        if transition.is_some() {
            self.apply_portal_transition(transition, now_ms);
            return;
        }
        if !self.portal.is_active() {
            return;
        }
        if let Some(url) = self.ports.portal.process() {
            self.apply_station_url(url, now_ms);
        }
    }

    /// Persists a submitted URL and, unless the portal is in AP mode, fetches from it at
    /// once so a station error raised before the portal opened can clear.
    fn apply_station_url(&mut self, url: String, now_ms: u64) {
        let url = url.trim().to_string();
        if let Err(err) = validate_station_url(&url) {
            warn!(target: "cydwx::device", "rejected station url from portal: {err}");
            return;
        }
        if url != self.station_url {
            if let Err(err) = self.ports.store.save_url(&url) {
                error!(target: "cydwx::device", "failed to persist station url: {err}");
            }
            info!(target: "cydwx::device", "station url changed to {url}");
            self.station.set_url(station_data_url(&url));
            self.station_url = url;
        }
        // No upstream route while the radio is an access point.
        if self.portal.mode() == Some(PortalMode::ApMode) {
            return;
        }
        if let Some(outcome) = self.station.request(self.ports.station.as_mut(), now_ms) {
            self.apply_outcome(outcome, now_ms);
        }
    }

    fn set_portal_view(&mut self, view: Option<PortalView>) {
        if self.portal_view != view {
            self.portal_view = view;
            self.portal_generation += 1;
        }
    }

    fn refresh_countdown(&mut self, now_ms: u64) {
        let view = match (self.portal.mode(), self.portal.countdown(now_ms)) {
            (Some(mode), Some(countdown)) => {
                let ip = self.ports.network.ip_address();
                Some(PortalView::new(
                    mode,
                    countdown,
                    &self.config.portal,
                    ip.as_deref(),
                ))
            }
            _ => None,
        };
        self.set_portal_view(view);
    }

    fn pump_network(&mut self, now_ms: u64) {
        if self.refresh_requested && !self.portal.is_active() {
            self.refresh_requested = false;
            self.poll_station(now_ms);
            self.poll_forecast(now_ms);
        }

        if let Some(outcome) = self.station.advance(self.ports.station.as_mut(), now_ms) {
            self.apply_outcome(outcome, now_ms);
        }
        if let Some(outcome) = self.forecast.advance(self.ports.forecast.as_mut(), now_ms) {
            self.apply_outcome(outcome, now_ms);
        }
    }

    fn check_wifi(&mut self, now_ms: u64) {
        // The radio is an access point while the AP portal runs.
        if self.portal.mode() == Some(PortalMode::ApMode) {
            return;
        }
        let outcome = if self.ports.network.is_connected() {
            Outcome::Success
        } else {
            ErrorSource::WiFi.failure_outcome()
        };
        self.errors.report(ErrorSource::WiFi, outcome, now_ms);
    }

    fn poll_station(&mut self, now_ms: u64) {
        if self.portal.is_active() {
            debug!(target: "cydwx::device", "portal active; station poll skipped");
            return;
        }
        if let Some(outcome) = self.station.request(self.ports.station.as_mut(), now_ms) {
            self.apply_outcome(outcome, now_ms);
        }
    }

    fn poll_forecast(&mut self, now_ms: u64) {
        if self.portal.is_active() {
            debug!(target: "cydwx::device", "portal active; forecast poll skipped");
            return;
        }
        if let Some(outcome) = self.forecast.request(self.ports.forecast.as_mut(), now_ms) {
            self.apply_outcome(outcome, now_ms);
        }
    }

    fn apply_outcome(&mut self, outcome: PollOutcome, now_ms: u64) {
        self.errors.report(outcome.source, outcome.outcome, now_ms);
        let Some(payload) = outcome.payload else {
            return;
        };
        self.readings_generation += 1;
        match outcome.source {
            ErrorSource::Station => {
                self.readings.station = Some(payload);
                self.readings.station_fetched_at_ms = Some(now_ms);
            }
            ErrorSource::Forecast => {
                self.readings.forecast = Some(payload);
                self.readings.forecast_fetched_at_ms = Some(now_ms);
            }
            ErrorSource::WiFi => {}
        }
    }

    fn rotate_page(&mut self, _now_ms: u64) {
        self.readings_page = (self.readings_page + 1) % READINGS_PAGES;
    }

    fn adjust_backlight(&mut self, _now_ms: u64) {
        let raw = self.ports.ambient.read_ambient();
        let sample = self.backlight.compute_brightness(raw);
        if sample.level != self.brightness {
            self.brightness = sample.level;
            self.ports.backlight.set_brightness(sample.level);
        }
    }

    fn watch_errors(&mut self, now_ms: u64) {
        if let Some(reboot) = self.errors.tick(now_ms) {
            error!(
                target: "cydwx::device",
                "rebooting: {} failing since {}ms",
                reboot.source.as_str(),
                reboot.raised_at_ms
            );
            self.reboot_requested = true;
            self.ports.platform.reboot();
        }
    }

    fn refresh_display(&mut self, now_ms: u64) {
        let frame = self.frame_key(now_ms);
        if self.last_frame == Some(frame) {
            return;
        }
        let view = self.build_view(now_ms);
        self.ports.display.render(&view);
        self.last_frame = Some(frame);
    }

    fn reboot_in_secs(&self, now_ms: u64) -> Option<u64> {
        self.errors
            .reboot_countdown_ms(now_ms)
            .map(|remaining| remaining / 1_000)
    }

    fn frame_key(&self, now_ms: u64) -> FrameKey {
        FrameKey {
            readings_generation: self.readings_generation,
            portal_generation: self.portal_generation,
            severity: self.errors.effective_severity(),
            readings_page: self.readings_page,
            brightness: self.brightness,
            reboot_in_secs: self.reboot_in_secs(now_ms),
        }
    }

    fn build_view(&self, now_ms: u64) -> ViewState {
        let severity = self.errors.effective_severity();
        ViewState {
            readings: self.readings.clone(),
            severity,
            weather_code_override: ViewState::weather_code_override_for(severity),
            readings_page: self.readings_page,
            brightness: self.brightness,
            reboot_in_secs: self.reboot_in_secs(now_ms),
            portal: self.portal_view.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::DEFAULT_STATION_URL,
        error::{FetchErrorKind, PortalError, StoreError},
        poller::{FetchResult, Payload},
        ports::{
            AmbientSensor, Backlight, Display, FetchTransport, Network, Platform, PortalHost,
            SettingsStore, TriggerPin,
        },
        types::Severity,
    };

    #[derive(Default)]
    struct Bench {
        station_begun: Vec<String>,
        station_reply: Option<FetchResult>,
        forecast_begun: Vec<String>,
        forecast_reply: Option<FetchResult>,
        stored_url: Option<String>,
        store_error: Option<StoreError>,
        saved_urls: Vec<String>,
        renders: Vec<ViewState>,
        brightness: Vec<u8>,
        ambient: u16,
        pressed: bool,
        connected: bool,
        has_credentials: bool,
        portal_opens: Vec<PortalMode>,
        fail_open: bool,
        portal_closes: usize,
        portal_submissions: VecDeque<String>,
        reboots: usize,
    }

    type Shared = Arc<Mutex<Bench>>;

    struct FakeTransport {
        bench: Shared,
        station: bool,
    }

    impl FetchTransport for FakeTransport {
        fn begin(&mut self, url: &str) -> Result<(), FetchErrorKind> {
            let mut bench = self.bench.lock().unwrap();
            if self.station {
                bench.station_begun.push(url.to_string());
            } else {
                bench.forecast_begun.push(url.to_string());
            }
            Ok(())
        }

        fn poll(&mut self) -> Option<FetchResult> {
            let bench = self.bench.lock().unwrap();
            if self.station {
                bench.station_reply.clone()
            } else {
                bench.forecast_reply.clone()
            }
        }

        fn cancel(&mut self) {}
    }

    struct Fake(Shared);

    impl SettingsStore for Fake {
        fn load_url(&mut self) -> Result<Option<String>, StoreError> {
            let bench = self.0.lock().unwrap();
            match &bench.store_error {
                Some(err) => Err(err.clone()),
                None => Ok(bench.stored_url.clone()),
            }
        }

        fn save_url(&mut self, url: &str) -> Result<(), StoreError> {
            let mut bench = self.0.lock().unwrap();
            bench.saved_urls.push(url.to_string());
            bench.stored_url = Some(url.to_string());
            Ok(())
        }
    }

    impl Display for Fake {
        fn render(&mut self, view: &ViewState) {
            self.0.lock().unwrap().renders.push(view.clone());
        }
    }

    impl Backlight for Fake {
        fn set_brightness(&mut self, level: u8) {
            self.0.lock().unwrap().brightness.push(level);
        }
    }

    impl AmbientSensor for Fake {
        fn read_ambient(&mut self) -> u16 {
            self.0.lock().unwrap().ambient
        }
    }

    impl TriggerPin for Fake {
        fn is_pressed(&mut self) -> bool {
            self.0.lock().unwrap().pressed
        }
    }

    impl Network for Fake {
        fn is_connected(&self) -> bool {
            self.0.lock().unwrap().connected
        }

        fn has_credentials(&self) -> bool {
            self.0.lock().unwrap().has_credentials
        }

        fn ip_address(&self) -> Option<String> {
            Some("192.168.1.40".to_string())
        }
    }

    impl PortalHost for Fake {
        fn open(&mut self, mode: PortalMode) -> Result<(), PortalError> {
            let mut bench = self.0.lock().unwrap();
            bench.portal_opens.push(mode);
            if bench.fail_open {
                return Err(PortalError::StartFailed("address in use".to_string()));
            }
            Ok(())
        }

        fn process(&mut self) -> Option<String> {
            self.0.lock().unwrap().portal_submissions.pop_front()
        }

        fn close(&mut self) {
            self.0.lock().unwrap().portal_closes += 1;
        }
    }

    impl Platform for Fake {
        fn reboot(&mut self) {
            self.0.lock().unwrap().reboots += 1;
        }
    }

    fn ports(bench: &Shared) -> DevicePorts {
        DevicePorts {
            station: Box::new(FakeTransport {
                bench: bench.clone(),
                station: true,
            }),
            forecast: Box::new(FakeTransport {
                bench: bench.clone(),
                station: false,
            }),
            store: Box::new(Fake(bench.clone())),
            display: Box::new(Fake(bench.clone())),
            backlight: Box::new(Fake(bench.clone())),
            ambient: Box::new(Fake(bench.clone())),
            trigger: Box::new(Fake(bench.clone())),
            network: Box::new(Fake(bench.clone())),
            portal: Box::new(Fake(bench.clone())),
            platform: Box::new(Fake(bench.clone())),
        }
    }

    fn bench() -> Shared {
        Arc::new(Mutex::new(Bench {
            station_reply: Some(FetchResult::ok(Payload::new("{}"))),
            forecast_reply: Some(FetchResult::ok(Payload::new("{}"))),
            connected: true,
            has_credentials: true,
            ..Bench::default()
        }))
    }

    fn booted(bench: &Shared) -> Device {
        let mut device = Device::new(DeviceConfig::default(), ports(bench)).unwrap();
        device.start(0);
        device
    }

    fn run(device: &mut Device, from_ms: u64, to_ms: u64) {
        let mut now = from_ms;
        while now <= to_ms {
            device.tick(now);
            now += 10;
        }
    }

    #[test]
    fn registers_tasks_in_fixed_order() {
        let bench = bench();
        let device = booted(&bench);

        assert_eq!(
            device.task_names(),
            vec![
                "trigger_pin",
                "portal_process",
                "portal_countdown",
                "network",
                "wifi_health",
                "station_poll",
                "forecast_poll",
                "readings_page",
                "backlight",
                "error_watch",
                "display_refresh",
            ]
        );
    }

    #[test]
    fn stored_url_overrides_default_and_is_polled_at_boot() {
        let bench = bench();
        bench.lock().unwrap().stored_url = Some("http://wx.lan/".to_string());
        let mut device = booted(&bench);

        device.tick(0);

        let bench = bench.lock().unwrap();
        assert_eq!(device.station_url(), "http://wx.lan/");
        assert_eq!(bench.station_begun, vec!["http://wx.lan/cyd_weewx.json".to_string()]);
        assert_eq!(bench.forecast_begun.len(), 1);
        assert!(bench.forecast_begun[0].starts_with("http://api.open-meteo.com/"));
    }

    #[test]
    fn successful_polls_land_in_readings() {
        let bench = bench();
        {
            let mut bench = bench.lock().unwrap();
            bench.station_reply = Some(FetchResult::ok(Payload::new("{\"outTemp\":\"21.0\"}")));
            bench.forecast_reply = Some(FetchResult::ok(Payload::new("{\"current\":{}}")));
        }
        let mut device = booted(&bench);

        run(&mut device, 0, 100);

        let readings = device.readings();
        assert_eq!(
            readings.station,
            Some(Payload::new("{\"outTemp\":\"21.0\"}"))
        );
        assert_eq!(readings.station_fetched_at_ms, Some(50));
        assert!(readings.forecast.is_some());
        assert_eq!(device.errors().effective_severity(), Severity::None);
    }

    #[test]
    fn unresolved_station_failure_reboots_once() {
        let bench = bench();
        bench.lock().unwrap().station_reply =
            Some(FetchResult::failed(FetchErrorKind::HttpStatus(500)));
        let mut device = booted(&bench);

        run(&mut device, 0, 300_000);
        assert_eq!(device.errors().effective_severity(), Severity::Critical);
        assert_eq!(bench.lock().unwrap().reboots, 0);

        run(&mut device, 300_010, 400_000);
        assert_eq!(bench.lock().unwrap().reboots, 1);
        assert!(device.reboot_requested());

        let last = bench.lock().unwrap().renders.last().cloned().unwrap();
        assert_eq!(last.weather_code_override, Some(1000));
    }

    #[test]
    fn forecast_failure_only_degrades() {
        let bench = bench();
        bench.lock().unwrap().forecast_reply = Some(FetchResult::failed(FetchErrorKind::Timeout));
        let mut device = booted(&bench);

        run(&mut device, 0, 400_000);

        assert_eq!(
            device.errors().severity(ErrorSource::Forecast),
            Severity::NonCritical
        );
        assert_eq!(bench.lock().unwrap().reboots, 0);
    }

    #[test]
    fn held_trigger_opens_portal_until_timeout() {
        let bench = bench();
        {
            bench.lock().unwrap().has_credentials = false;
        }
        let mut device = booted(&bench);
        run(&mut device, 0, 1_000);

        bench.lock().unwrap().pressed = true;
        run(&mut device, 1_010, 3_500);
        bench.lock().unwrap().pressed = false;

        assert_eq!(device.portal().mode(), Some(PortalMode::ApMode));
        assert_eq!(bench.lock().unwrap().portal_opens, vec![PortalMode::ApMode]);
        let portal_view = device.view(3_500).portal.unwrap();
        assert!(portal_view.message.contains("AP Mode"));

        let polls_before = bench.lock().unwrap().station_begun.len();
        run(&mut device, 3_510, 250_000);
        assert_eq!(bench.lock().unwrap().station_begun.len(), polls_before);
        assert!(device.portal().is_active());

        run(&mut device, 250_010, 305_000);
        assert!(!device.portal().is_active());
        assert_eq!(bench.lock().unwrap().portal_closes, 1);
        assert_eq!(device.view(305_000).portal, None);
        assert!(bench.lock().unwrap().station_begun.len() > polls_before);
    }

    #[test]
    fn second_hold_closes_portal() {
        let bench = bench();
        let mut device = booted(&bench);

        bench.lock().unwrap().pressed = true;
        run(&mut device, 0, 2_500);
        bench.lock().unwrap().pressed = false;
        run(&mut device, 2_510, 3_000);
        assert_eq!(device.portal().mode(), Some(PortalMode::StationMode));

        bench.lock().unwrap().pressed = true;
        run(&mut device, 3_010, 6_000);

        assert!(!device.portal().is_active());
        assert_eq!(bench.lock().unwrap().portal_closes, 1);
    }

    #[test]
    fn portal_submission_persists_station_url() {
        let bench = bench();
        let mut device = booted(&bench);
        bench.lock().unwrap().pressed = true;
        run(&mut device, 0, 2_500);
        bench.lock().unwrap().pressed = false;

        {
            let mut bench = bench.lock().unwrap();
            bench.portal_submissions.push_back("not a url".to_string());
            bench
                .portal_submissions
                .push_back(" http://weewx.home/ ".to_string());
        }
        run(&mut device, 2_510, 3_000);

        assert_eq!(device.station_url(), "http://weewx.home/");
        assert_eq!(
            bench.lock().unwrap().saved_urls,
            vec!["http://weewx.home/".to_string()]
        );
    }

    #[test]
    fn display_renders_only_on_change() {
        let bench = bench();
        let mut device = booted(&bench);

        // Boot frame, then the first poll results at 50ms.
        run(&mut device, 0, 400);
        assert_eq!(bench.lock().unwrap().renders.len(), 2);

        // Backlight change at 500ms and the page flip at 20s.
        run(&mut device, 410, 20_500);
        let renders = bench.lock().unwrap().renders.clone();
        assert_eq!(renders.len(), 4);
        assert_eq!(renders[2].brightness, 255);
        assert_eq!(renders[3].readings_page, 1);
    }

    #[test]
    fn backlight_follows_ambient_and_skips_repeats() {
        let bench = bench();
        bench.lock().unwrap().ambient = 4_000;
        let mut device = booted(&bench);

        run(&mut device, 0, 2_000);
        assert_eq!(bench.lock().unwrap().brightness, vec![100, 20]);

        bench.lock().unwrap().ambient = 0;
        run(&mut device, 2_010, 3_000);
        assert_eq!(bench.lock().unwrap().brightness, vec![100, 20, 255]);
        assert_eq!(device.brightness(), 255);
    }

    #[test]
    fn wifi_loss_is_critical_and_recovers() {
        let bench = bench();
        let mut device = booted(&bench);
        bench.lock().unwrap().connected = false;

        run(&mut device, 0, 5_000);
        assert_eq!(device.errors().severity(ErrorSource::WiFi), Severity::Critical);

        bench.lock().unwrap().connected = true;
        run(&mut device, 5_010, 7_000);
        assert_eq!(device.errors().severity(ErrorSource::WiFi), Severity::None);
    }

    #[test]
    fn unreadable_store_falls_back_to_default_url() {
        let bench = bench();
        bench.lock().unwrap().store_error = Some(StoreError::Unavailable("nvs".to_string()));
        let device = booted(&bench);

        assert_eq!(device.station_url(), DEFAULT_STATION_URL);
    }

    #[test]
    fn invalid_stored_url_falls_back_to_default() {
        let bench = bench();
        bench.lock().unwrap().stored_url = Some("ftp://wx.lan/".to_string());
        let device = booted(&bench);

        assert_eq!(device.station_url(), DEFAULT_STATION_URL);
    }

    #[test]
    fn failed_portal_open_leaves_portal_inactive() {
        let bench = bench();
        bench.lock().unwrap().fail_open = true;
        let mut device = booted(&bench);

        bench.lock().unwrap().pressed = true;
        run(&mut device, 0, 2_500);

        assert!(!device.portal().is_active());
        assert_eq!(device.view(2_500).portal, None);
        let bench = bench.lock().unwrap();
        assert_eq!(bench.portal_opens, vec![PortalMode::StationMode]);
        assert_eq!(bench.portal_closes, 0);
    }

    #[test]
    fn fixed_url_in_station_portal_clears_critical_before_reboot() {
        let bench = bench();
        bench.lock().unwrap().station_reply =
            Some(FetchResult::failed(FetchErrorKind::HttpStatus(404)));
        let mut device = booted(&bench);
        run(&mut device, 0, 199_990);
        assert_eq!(
            device.errors().severity(ErrorSource::Station),
            Severity::Critical
        );

        bench.lock().unwrap().pressed = true;
        run(&mut device, 200_000, 202_000);
        bench.lock().unwrap().pressed = false;
        assert_eq!(device.portal().mode(), Some(PortalMode::StationMode));

        {
            let mut bench = bench.lock().unwrap();
            bench.station_reply = Some(FetchResult::ok(Payload::new("{}")));
            bench
                .portal_submissions
                .push_back("http://fixed.lan/".to_string());
        }
        run(&mut device, 202_010, 301_000);

        assert!(device.portal().is_active());
        assert_eq!(device.errors().severity(ErrorSource::Station), Severity::None);
        let bench = bench.lock().unwrap();
        assert_eq!(bench.reboots, 0);
        assert_eq!(
            bench.station_begun.last().map(String::as_str),
            Some("http://fixed.lan/cyd_weewx.json")
        );
    }

    #[test]
    fn submission_on_timeout_tick_is_applied() {
        let bench = bench();
        let mut device = booted(&bench);
        bench.lock().unwrap().pressed = true;
        run(&mut device, 0, 2_500);
        bench.lock().unwrap().pressed = false;

        let deadline = device.portal().session().unwrap().deadline_ms;
        run(&mut device, 2_510, deadline - 10);
        assert!(device.portal().is_active());

        bench
            .lock()
            .unwrap()
            .portal_submissions
            .push_back("http://late.lan/".to_string());
        run(&mut device, deadline, deadline);

        assert!(!device.portal().is_active());
        assert_eq!(device.station_url(), "http://late.lan/");
        let bench = bench.lock().unwrap();
        assert_eq!(bench.saved_urls, vec!["http://late.lan/".to_string()]);
        assert!(bench.portal_submissions.is_empty());
        assert_eq!(bench.portal_closes, 1);
    }

    #[test]
    fn repeated_poll_renders_new_fetch_time() {
        let bench = bench();
        let mut device = booted(&bench);

        run(&mut device, 0, 120_100);

        let last = bench.lock().unwrap().renders.last().cloned().unwrap();
        assert_eq!(last.readings.station_fetched_at_ms, Some(120_050));
        assert_eq!(last.readings.station, Some(Payload::new("{}")));
    }
}
