use core::convert::TryInto;
use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::{Gpio0, Gpio34, Input, PinDriver, Pull},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn, LevelFilter};
use serde::{Deserialize, Serialize};

use cydwx_common::{
    config::{validate_station_url, PREFERENCES_KEY, PREFERENCES_NAMESPACE, STATION_URL_MAX_LEN},
    ports::{
        AmbientSensor, Backlight, Display, FetchTransport, Network, Platform, PortalHost,
        SettingsStore, TriggerPin,
    },
    Device, DeviceConfig, DevicePorts, FetchErrorKind, FetchResult, LogConfig, Payload,
    PortalConfig, PortalError, PortalMode, Severity, StoreError, ViewState,
};

const TICK_PERIOD_MS: u64 = 5;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const WIFI_RESTART_DELAY_MS: u64 = 3_000;
const BACKLIGHT_FREQUENCY_HZ: u32 = 5_000;
const MAX_HTTP_BODY: usize = 512;
const MAX_FETCH_BODY: usize = 16 * 1024;
const FETCH_CHUNK_SIZE: usize = 1024;
const FETCH_WORKER_STACK: usize = 12 * 1024;
const PORTAL_AP_IP: &str = "192.168.4.1";

const PORTAL_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>cydWeeWX</title>
</head>
<body>
  <h1 id="title">Management Portal</h1>
  <form id="station">
    <label>WeeWX JSON URL <input name="url" maxlength="64"></label>
    <button type="submit">Save</button>
  </form>
  <form id="wifi">
    <label>SSID <input name="ssid" maxlength="32"></label>
    <label>Password <input name="password" type="password" maxlength="64"></label>
    <button type="submit">Save and restart</button>
  </form>
  <p id="status"></p>
  <script>
    const status = document.getElementById("status");
    async function put(path, body) {
      const res = await fetch(path, {
        method: "PUT",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify(body),
      });
      const json = await res.json();
      status.textContent = res.ok ? "Saved" : json.error;
    }
    fetch("/api/station-url").then((res) => res.json()).then((json) => {
      document.querySelector("#station input").value = json.url;
    });
    document.getElementById("station").addEventListener("submit", (event) => {
      event.preventDefault();
      put("/api/station-url", { url: new FormData(event.target).get("url") });
    });
    document.getElementById("wifi").addEventListener("submit", (event) => {
      event.preventDefault();
      const form = new FormData(event.target);
      put("/api/wifi", { ssid: form.get("ssid"), password: form.get("password") });
    });
  </script>
</body>
</html>
"#;

type SharedWifi = Arc<Mutex<EspWifi<'static>>>;

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StationUrlBody {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WifiCredentials {
    ssid: String,
    #[serde(default)]
    password: String,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = DeviceConfig::default();
    apply_log_config(&config.log);

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let peripherals = Peripherals::take()?;

    let (wifi, station) = connect_wifi(
        peripherals.modem,
        sys_loop,
        nvs_partition,
        &config.portal,
    )
    .context("wifi startup failed")?;
    let wifi = Arc::new(Mutex::new(wifi));

    let backlight = LedcBacklight::new(
        LedcDriver::new(
            peripherals.ledc.channel0,
            LedcTimerDriver::new(
                peripherals.ledc.timer0,
                &TimerConfig::new()
                    .frequency(Hertz(BACKLIGHT_FREQUENCY_HZ))
                    .resolution(Resolution::Bits8),
            )?,
            peripherals.pins.gpio21,
        )
        .context("failed to configure backlight pwm")?,
    );

    let ambient = LdrSensor::new(
        AdcChannelDriver::new(
            AdcDriver::new(peripherals.adc1)?,
            peripherals.pins.gpio34,
            &AdcChannelConfig {
                attenuation: DB_11,
                ..Default::default()
            },
        )
        .context("failed to configure ambient light adc")?,
    );

    let mut trigger = PinDriver::input(peripherals.pins.gpio0)?;
    trigger.set_pull(Pull::Up)?;

    let ports = DevicePorts {
        station: Box::new(WorkerTransport::spawn(
            "station",
            config.timing.request_timeout_ms,
        )?),
        forecast: Box::new(WorkerTransport::spawn(
            "forecast",
            config.timing.request_timeout_ms,
        )?),
        store: Box::new(nvs_store.clone()),
        display: Box::new(LogDisplay::default()),
        backlight: Box::new(backlight),
        ambient: Box::new(ambient),
        trigger: Box::new(BootButton { pin: trigger }),
        network: Box::new(EspNetwork {
            wifi: wifi.clone(),
            has_credentials: station.is_some(),
        }),
        portal: Box::new(EspPortal::new(
            wifi,
            station,
            nvs_store,
            config.portal.clone(),
        )),
        platform: Box::new(EspPlatform),
    };

    let mut device = Device::new(config, ports).context("device configuration rejected")?;
    device.start(monotonic_ms());
    info!("tasks registered: {}", device.task_names().join(", "));

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    loop {
        device.tick(monotonic_ms());
        feed_watchdog();
        thread::sleep(Duration::from_millis(TICK_PERIOD_MS));
    }
}

fn apply_log_config(log: &LogConfig) {
    let level = if log.enabled {
        log.level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)
    } else {
        LevelFilter::Off
    };
    log::set_max_level(level);
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    portal: &PortalConfig,
) -> anyhow::Result<(EspWifi<'static>, Option<ClientConfiguration>)> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    if let Err(err) = esp_wifi.sta_netif_mut().set_hostname(&portal.hostname) {
        warn!("failed to set hostname `{}`: {err}", portal.hostname);
    }

    let Some(station) = stored_station_config(&esp_wifi) else {
        warn!("wifi credentials missing; hold the trigger button to open the portal");
        return Ok((esp_wifi, None));
    };

    {
        let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;
        wifi.set_configuration(&Configuration::Client(station.clone()))?;
        wifi.start()?;
        info!("wifi started, connecting to `{}`", station.ssid);

        for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
            info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
            match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    break;
                }
                Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
            }

            if attempt < WIFI_CONNECT_ATTEMPTS {
                let _ = wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            }
        }
    }

    Ok((esp_wifi, Some(station)))
}

fn stored_station_config(wifi: &EspWifi<'static>) -> Option<ClientConfiguration> {
    match wifi.get_configuration() {
        Ok(Configuration::Client(client) | Configuration::Mixed(client, _))
            if !client.ssid.is_empty() =>
        {
            Some(client)
        }
        _ => None,
    }
}

/// Runs inside a device tick under the task watchdog, so it only issues the driver calls
/// and does not wait for the AP netif to come up.
fn start_portal_ap(wifi: &mut EspWifi<'static>, portal: &PortalConfig) -> anyhow::Result<()> {
    let _ = wifi.stop();
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: portal
            .ap_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("portal AP SSID too long"))?,
        password: portal
            .ap_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("portal AP password too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    info!("portal AP starting on `{}`", portal.ap_ssid);
    Ok(())
}

fn restore_station(
    wifi: &mut EspWifi<'static>,
    station: Option<&ClientConfiguration>,
) -> anyhow::Result<()> {
    wifi.stop()?;
    let Some(station) = station else {
        return Ok(());
    };
    wifi.set_configuration(&Configuration::Client(station.clone()))?;
    wifi.start()?;
    wifi.connect()?;
    info!("portal AP stopped; reconnecting to `{}`", station.ssid);
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs blocking `EspHttpConnection` GETs on a dedicated thread. Each request carries an
/// id so a result arriving after `cancel` is discarded.
struct WorkerTransport {
    requests: Sender<(u64, String)>,
    results: Receiver<(u64, FetchResult)>,
    next_id: u64,
    in_flight: Option<u64>,
}

impl WorkerTransport {
    fn spawn(name: &str, timeout_ms: u64) -> anyhow::Result<Self> {
        let (requests, request_rx) = mpsc::channel::<(u64, String)>();
        let (result_tx, results) = mpsc::channel();

        thread::Builder::new()
            .name(format!("fetch-{name}"))
            .stack_size(FETCH_WORKER_STACK)
            .spawn(move || {
                while let Ok((id, url)) = request_rx.recv() {
                    let result = http_get(&url, timeout_ms).unwrap_or_else(|err| {
                        FetchResult::failed(FetchErrorKind::Transport(format!("{err:#}")))
                    });
                    if result_tx.send((id, result)).is_err() {
                        break;
                    }
                }
            })
            .with_context(|| format!("failed to spawn {name} fetch worker"))?;

        Ok(Self {
            requests,
            results,
            next_id: 0,
            in_flight: None,
        })
    }
}

impl FetchTransport for WorkerTransport {
    fn begin(&mut self, url: &str) -> Result<(), FetchErrorKind> {
        if self.in_flight.is_some() {
            return Err(FetchErrorKind::Busy);
        }

        self.next_id = self.next_id.wrapping_add(1);
        self.requests
            .send((self.next_id, url.to_string()))
            .map_err(|_| FetchErrorKind::Transport("fetch worker stopped".into()))?;
        self.in_flight = Some(self.next_id);
        Ok(())
    }

    fn poll(&mut self) -> Option<FetchResult> {
        let expected = self.in_flight?;
        while let Ok((id, result)) = self.results.try_recv() {
            if id == expected {
                self.in_flight = None;
                return Some(result);
            }
        }
        None
    }

    fn cancel(&mut self) {
        self.in_flight = None;
    }
}

fn http_get(url: &str, timeout_ms: u64) -> anyhow::Result<FetchResult> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(Duration::from_millis(timeout_ms)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);
    let request = client.request(Method::Get, url, &[])?;
    let mut response = request.submit().map_err(|e| anyhow!("{e:?}"))?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Ok(FetchResult::failed(FetchErrorKind::HttpStatus(status)));
    }

    let mut body = Vec::new();
    let mut chunk = [0_u8; FETCH_CHUNK_SIZE];
    loop {
        let read = response.read(&mut chunk).map_err(|e| anyhow!("{e:?}"))?;
        if read == 0 {
            break;
        }
        if body.len() + read > MAX_FETCH_BODY {
            return Err(anyhow!("response body exceeds {MAX_FETCH_BODY} bytes"));
        }
        body.extend_from_slice(&chunk[..read]);
    }

    let body = String::from_utf8(body).context("non utf8 response body")?;
    Ok(FetchResult::ok(Payload::new(body)))
}

impl NvsStore {
    fn read_url(&self) -> anyhow::Result<Option<String>> {
        let _guard = lock(&self.lock);
        let nvs = EspNvs::new(self.partition.clone(), PREFERENCES_NAMESPACE, true)?;
        let mut buffer = [0_u8; STATION_URL_MAX_LEN + 1];
        Ok(nvs.get_str(PREFERENCES_KEY, &mut buffer)?.map(str::to_string))
    }

    fn write_url(&self, url: &str) -> anyhow::Result<()> {
        let _guard = lock(&self.lock);
        let mut nvs = EspNvs::new(self.partition.clone(), PREFERENCES_NAMESPACE, true)?;
        nvs.set_str(PREFERENCES_KEY, url)?;
        Ok(())
    }
}

impl SettingsStore for NvsStore {
    fn load_url(&mut self) -> Result<Option<String>, StoreError> {
        self.read_url()
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))
    }

    fn save_url(&mut self, url: &str) -> Result<(), StoreError> {
        self.write_url(url)
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;
        info!("saved {PREFERENCES_KEY} to NVS");
        Ok(())
    }
}

/// The panel itself is driven by LVGL elsewhere; this port only traces frame changes.
#[derive(Default)]
struct LogDisplay {
    severity: Option<Severity>,
}

impl Display for LogDisplay {
    fn render(&mut self, view: &ViewState) {
        if self.severity != Some(view.severity) {
            info!("display severity: {}", view.severity.as_str());
            self.severity = Some(view.severity);
        }
        if let Some(portal) = &view.portal {
            log::debug!("{}", portal.countdown_text);
        }
    }
}

struct LedcBacklight {
    channel: LedcDriver<'static>,
}

impl LedcBacklight {
    fn new(channel: LedcDriver<'static>) -> Self {
        Self { channel }
    }
}

impl Backlight for LedcBacklight {
    fn set_brightness(&mut self, level: u8) {
        let duty = u32::from(level).min(self.channel.get_max_duty());
        if let Err(err) = self.channel.set_duty(duty) {
            warn!("failed to set backlight duty {duty}: {err}");
        }
    }
}

struct LdrSensor {
    channel: AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>,
    last: u16,
}

impl LdrSensor {
    fn new(channel: AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>) -> Self {
        Self { channel, last: 0 }
    }
}

impl AmbientSensor for LdrSensor {
    fn read_ambient(&mut self) -> u16 {
        match self.channel.read_raw() {
            Ok(raw) => self.last = raw,
            Err(err) => warn!("ambient light read failed: {err}"),
        }
        self.last
    }
}

/// GPIO0 with pull-up; pressed pulls it low.
struct BootButton {
    pin: PinDriver<'static, Gpio0, Input>,
}

impl TriggerPin for BootButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low()
    }
}

struct EspNetwork {
    wifi: SharedWifi,
    has_credentials: bool,
}

impl Network for EspNetwork {
    fn is_connected(&self) -> bool {
        lock(&self.wifi).is_connected().unwrap_or(false)
    }

    fn has_credentials(&self) -> bool {
        self.has_credentials
    }

    fn ip_address(&self) -> Option<String> {
        let wifi = lock(&self.wifi);
        let info = wifi.sta_netif().get_ip_info().ok()?;
        (!info.ip.is_unspecified()).then(|| info.ip.to_string())
    }
}

struct EspPortal {
    wifi: SharedWifi,
    station: Option<ClientConfiguration>,
    store: NvsStore,
    config: PortalConfig,
    submissions_tx: Sender<String>,
    submissions_rx: Receiver<String>,
    server: Option<EspHttpServer<'static>>,
    mode: Option<PortalMode>,
}

impl EspPortal {
    fn new(
        wifi: SharedWifi,
        station: Option<ClientConfiguration>,
        store: NvsStore,
        config: PortalConfig,
    ) -> Self {
        let (submissions_tx, submissions_rx) = mpsc::channel();
        Self {
            wifi,
            station,
            store,
            config,
            submissions_tx,
            submissions_rx,
            server: None,
            mode: None,
        }
    }

    fn start(&mut self, mode: PortalMode) -> anyhow::Result<()> {
        if mode == PortalMode::ApMode {
            start_portal_ap(&mut lock(&self.wifi), &self.config)?;
            info!("portal reachable at http://{PORTAL_AP_IP}");
        }
        self.server = Some(create_portal_http_server(
            self.store.clone(),
            self.wifi.clone(),
            self.submissions_tx.clone(),
        )?);
        self.mode = Some(mode);
        Ok(())
    }
}

impl PortalHost for EspPortal {
    fn open(&mut self, mode: PortalMode) -> Result<(), PortalError> {
        if self.server.is_some() {
            return Ok(());
        }
        self.start(mode)
            .map_err(|err| PortalError::StartFailed(format!("{err:#}")))
    }

    fn process(&mut self) -> Option<String> {
        self.submissions_rx.try_recv().ok()
    }

    fn close(&mut self) {
        self.server = None;
        if self.mode.take() == Some(PortalMode::ApMode) {
            if let Err(err) = restore_station(&mut lock(&self.wifi), self.station.as_ref()) {
                warn!("failed to restore station wifi: {err:#}");
            }
        }
        while self.submissions_rx.try_recv().is_ok() {}
    }
}

fn create_portal_http_server(
    store: NvsStore,
    wifi: SharedWifi,
    submissions: Sender<String>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    for path in [
        "/",
        "/generate_204",
        "/gen_204",
        "/hotspot-detect.html",
        "/connecttest.txt",
        "/ncsi.txt",
        "/fwlink",
    ] {
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            req.into_ok_response()?
                .write_all(PORTAL_INDEX_HTML.as_bytes())?;
            Ok(())
        })?;
    }

    {
        let store = store.clone();
        server.fn_handler("/api/station-url", Method::Get, move |req| {
            let url = store.read_url().unwrap_or_default().unwrap_or_default();
            write_json(req, &StationUrlBody { url })
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/station-url", Method::Put, move |mut req| {
        let body = read_request_body(&mut req)?;
        let update: StationUrlBody =
            serde_json::from_slice(&body).context("invalid station url payload")?;
        let url = update.url.trim().to_string();

        if let Err(err) = validate_station_url(&url) {
            return write_error(req, 400, &err.to_string());
        }
        if submissions.send(url.clone()).is_err() {
            return write_error(req, 503, "portal is closing");
        }
        write_json(req, &StationUrlBody { url })
    })?;

    server.fn_handler::<anyhow::Error, _>("/api/wifi", Method::Put, move |mut req| {
        let body = read_request_body(&mut req)?;
        let update: WifiCredentials =
            serde_json::from_slice(&body).context("invalid wifi payload")?;

        let ssid = update.ssid.trim();
        if ssid.is_empty() {
            return write_error(req, 400, "ssid is required");
        }
        let auth_method = if update.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        let client = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
            password: update
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        };
        lock(&wifi).set_configuration(&Configuration::Client(client))?;
        info!("wifi credentials saved for `{ssid}`; restarting");

        thread::Builder::new()
            .name("portal-restart".into())
            .spawn(|| {
                thread::sleep(Duration::from_millis(WIFI_RESTART_DELAY_MS));
                unsafe { esp_idf_svc::sys::esp_restart() };
            })
            .context("failed to spawn restart thread")?;

        let payload = serde_json::json!({ "restarting": true });
        write_json(req, &payload)
    })?;

    Ok(server)
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

struct EspPlatform;

impl Platform for EspPlatform {
    fn reboot(&mut self) {
        warn!("unresolved critical error; restarting");
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
