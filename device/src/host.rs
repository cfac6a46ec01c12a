use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU16, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use cydwx_common::{
    config::{validate_station_url, PREFERENCES_KEY, PREFERENCES_NAMESPACE},
    ports::{
        AmbientSensor, Backlight, Display, FetchTransport, Network, Platform, PortalHost,
        SettingsStore, TriggerPin,
    },
    Device, DeviceConfig, DevicePorts, FetchErrorKind, FetchResult, LogConfig, Payload,
    PortalConfig, PortalError, PortalMode, StoreError, ViewState,
};

const TICK_PERIOD_MS: u64 = 5;
const DEFAULT_AMBIENT_RAW: u16 = 200;

#[derive(Clone)]
struct AppState {
    device: Arc<Mutex<Device>>,
    inputs: SimInputs,
}

/// Simulated hardware levels, driven through the control API.
#[derive(Clone)]
struct SimInputs {
    trigger_pressed: Arc<AtomicBool>,
    ambient_raw: Arc<AtomicU16>,
    connected: Arc<AtomicBool>,
    credentials: Arc<AtomicBool>,
}

#[derive(Clone)]
struct AppStore {
    settings_path: Arc<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSettings {
    #[serde(rename = "WEEWX_JSON_URL", default)]
    station_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct AmbientUpdate {
    raw: u16,
}

#[derive(Debug, Deserialize)]
struct NetworkUpdate {
    connected: bool,
    #[serde(default)]
    credentials: Option<bool>,
}

#[derive(Debug, Serialize)]
struct NetworkView {
    connected: bool,
    credentials: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StationUrlBody {
    url: String,
}

pub async fn run() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_tracing(&config.log);

    let store = AppStore::new();
    let inputs = SimInputs::new();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timing.request_timeout_ms))
        .build()
        .context("failed to build http client")?;

    let portal_port = std::env::var("CYDWX_PORTAL_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8081);

    let ports = DevicePorts {
        station: Box::new(HttpTransport::new(client.clone())),
        forecast: Box::new(HttpTransport::new(client)),
        store: Box::new(store.clone()),
        display: Box::new(LogDisplay),
        backlight: Box::new(LogBacklight),
        ambient: Box::new(inputs.clone()),
        trigger: Box::new(inputs.clone()),
        network: Box::new(inputs.clone()),
        portal: Box::new(HostPortal::new(portal_port, config.portal.clone(), store.clone())),
        platform: Box::new(ProcessPlatform),
    };

    let mut device = Device::new(config, ports).context("device configuration rejected")?;
    device.start(monotonic_ms());
    info!("tasks registered: {}", device.task_names().join(", "));

    let app_state = AppState {
        device: Arc::new(Mutex::new(device)),
        inputs,
    };

    spawn_control_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/trigger/press", post(handle_trigger_press))
        .route("/api/trigger/release", post(handle_trigger_release))
        .route("/api/ambient", put(handle_put_ambient))
        .route("/api/network", get(handle_get_network).put(handle_put_network))
        .with_state(app_state);

    let port = std::env::var("CYDWX_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control server at {addr}"))?;

    info!("control api listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn load_config() -> anyhow::Result<DeviceConfig> {
    let Ok(path) = std::env::var("CYDWX_CONFIG") else {
        return Ok(DeviceConfig::default());
    };

    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<DeviceConfig>(&raw)
            .with_context(|| format!("invalid device config in {path}")),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeviceConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {path}")),
    }
}

fn init_tracing(log: &LogConfig) {
    if !log.enabled {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_PERIOD_MS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();
            app_state.device.lock().await.tick(now_ms);
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.device.lock().await.view(monotonic_ms());
    Json(view)
}

async fn handle_trigger_press(State(state): State<AppState>) -> impl IntoResponse {
    state.inputs.trigger_pressed.store(true, Ordering::Relaxed);
    StatusCode::NO_CONTENT
}

async fn handle_trigger_release(State(state): State<AppState>) -> impl IntoResponse {
    state.inputs.trigger_pressed.store(false, Ordering::Relaxed);
    StatusCode::NO_CONTENT
}

async fn handle_put_ambient(
    State(state): State<AppState>,
    Json(update): Json<AmbientUpdate>,
) -> impl IntoResponse {
    state.inputs.ambient_raw.store(update.raw, Ordering::Relaxed);
    StatusCode::NO_CONTENT
}

async fn handle_get_network(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.inputs.network_view())
}

async fn handle_put_network(
    State(state): State<AppState>,
    Json(update): Json<NetworkUpdate>,
) -> impl IntoResponse {
    state
        .inputs
        .connected
        .store(update.connected, Ordering::Relaxed);
    if let Some(credentials) = update.credentials {
        state
            .inputs
            .credentials
            .store(credentials, Ordering::Relaxed);
    }
    Json(state.inputs.network_view())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
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

impl SimInputs {
    fn new() -> Self {
        Self {
            trigger_pressed: Arc::new(AtomicBool::new(false)),
            ambient_raw: Arc::new(AtomicU16::new(DEFAULT_AMBIENT_RAW)),
            connected: Arc::new(AtomicBool::new(true)),
            credentials: Arc::new(AtomicBool::new(true)),
        }
    }

    fn network_view(&self) -> NetworkView {
        NetworkView {
            connected: self.connected.load(Ordering::Relaxed),
            credentials: self.credentials.load(Ordering::Relaxed),
        }
    }
}

impl TriggerPin for SimInputs {
    fn is_pressed(&mut self) -> bool {
        self.trigger_pressed.load(Ordering::Relaxed)
    }
}

impl AmbientSensor for SimInputs {
    fn read_ambient(&mut self) -> u16 {
        self.ambient_raw.load(Ordering::Relaxed)
    }
}

impl Network for SimInputs {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn has_credentials(&self) -> bool {
        self.credentials.load(Ordering::Relaxed)
    }

    fn ip_address(&self) -> Option<String> {
        self.is_connected().then(|| "127.0.0.1".to_string())
    }
}

/// GET over reqwest on a spawned task; the result comes back through a oneshot.
struct HttpTransport {
    client: reqwest::Client,
    pending: Option<(oneshot::Receiver<FetchResult>, JoinHandle<()>)>,
}

impl HttpTransport {
    fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            pending: None,
        }
    }
}

impl FetchTransport for HttpTransport {
    fn begin(&mut self, url: &str) -> Result<(), FetchErrorKind> {
        if self.pending.is_some() {
            return Err(FetchErrorKind::Busy);
        }

        let (tx, rx) = oneshot::channel();
        let request = self.client.get(url);
        let handle = tokio::spawn(async move {
            let _ = tx.send(fetch(request).await);
        });
        self.pending = Some((rx, handle));
        Ok(())
    }

    fn poll(&mut self) -> Option<FetchResult> {
        let (rx, _) = self.pending.as_mut()?;
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => {
                FetchResult::failed(FetchErrorKind::Transport("request task dropped".into()))
            }
        };
        self.pending = None;
        Some(result)
    }

    fn cancel(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }
}

async fn fetch(request: reqwest::RequestBuilder) -> FetchResult {
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return FetchResult::failed(fetch_error_kind(&err)),
    };

    let status = response.status();
    if !status.is_success() {
        return FetchResult::failed(FetchErrorKind::HttpStatus(status.as_u16()));
    }

    match response.text().await {
        Ok(body) => FetchResult::ok(Payload::new(body)),
        Err(err) => FetchResult::failed(fetch_error_kind(&err)),
    }
}

fn fetch_error_kind(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Transport(err.to_string())
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("CYDWX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.cydwx"));

        Self {
            settings_path: Arc::new(data_dir.join(format!("{PREFERENCES_NAMESPACE}.json"))),
        }
    }

    fn read_settings(&self) -> Result<StoredSettings, StoreError> {
        match std::fs::read(self.settings_path.as_ref()) {
            Ok(raw) => serde_json::from_slice::<StoredSettings>(&raw)
                .map_err(|err| StoreError::Corrupt(err.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(StoredSettings::default()),
            Err(err) => Err(StoreError::Unavailable(err.to_string())),
        }
    }

    fn write_settings(&self, settings: &StoredSettings) -> Result<(), StoreError> {
        let path = self.settings_path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        }
        let payload = serde_json::to_vec_pretty(settings)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        std::fs::write(path, payload).map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}

impl SettingsStore for AppStore {
    fn load_url(&mut self) -> Result<Option<String>, StoreError> {
        Ok(self.read_settings()?.station_url)
    }

    fn save_url(&mut self, url: &str) -> Result<(), StoreError> {
        let mut settings = self.read_settings().unwrap_or_default();
        settings.station_url = Some(url.to_string());
        self.write_settings(&settings)?;
        info!(
            "saved {PREFERENCES_KEY} to {}",
            self.settings_path.display()
        );
        Ok(())
    }
}

struct LogDisplay;

impl Display for LogDisplay {
    fn render(&mut self, view: &ViewState) {
        debug!(
            target: "cydwx::display",
            severity = view.severity.as_str(),
            page = view.readings_page,
            brightness = view.brightness,
            "render"
        );
        if let Some(portal) = &view.portal {
            debug!(target: "cydwx::display", "{}", portal.countdown_text);
        }
    }
}

struct LogBacklight;

impl Backlight for LogBacklight {
    fn set_brightness(&mut self, level: u8) {
        info!(target: "cydwx::backlight", "brightness -> {level}");
    }
}

struct ProcessPlatform;

impl Platform for ProcessPlatform {
    fn reboot(&mut self) {
        warn!("reboot requested; exiting");
        std::process::exit(1);
    }
}

#[derive(Clone)]
struct PortalState {
    submissions: mpsc::UnboundedSender<String>,
    store: AppStore,
    config: Arc<PortalConfig>,
    mode: PortalMode,
}

/// The configuration portal: an axum server that only runs while a session is open.
struct HostPortal {
    port: u16,
    config: Arc<PortalConfig>,
    store: AppStore,
    submissions_tx: mpsc::UnboundedSender<String>,
    submissions_rx: mpsc::UnboundedReceiver<String>,
    server: Option<JoinHandle<()>>,
}

impl HostPortal {
    fn new(port: u16, config: PortalConfig, store: AppStore) -> Self {
        let (submissions_tx, submissions_rx) = mpsc::unbounded_channel();
        Self {
            port,
            config: Arc::new(config),
            store,
            submissions_tx,
            submissions_rx,
            server: None,
        }
    }
}

impl PortalHost for HostPortal {
    fn open(&mut self, mode: PortalMode) -> Result<(), PortalError> {
        if self.server.is_some() {
            return Ok(());
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = std::net::TcpListener::bind(addr)
            .and_then(|listener| listener.set_nonblocking(true).map(|()| listener))
            .and_then(TcpListener::from_std)
            .map_err(|err| PortalError::StartFailed(format!("bind {addr}: {err}")))?;

        let state = PortalState {
            submissions: self.submissions_tx.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            mode,
        };
        let app = Router::new()
            .route("/", get(handle_portal_index))
            .route(
                "/api/station-url",
                get(handle_get_station_url).put(handle_put_station_url),
            )
            .with_state(state);

        info!(
            target: "cydwx::portal",
            "{} serving {} on http://{addr}",
            self.config.hostname,
            self.config.title
        );
        self.server = Some(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                warn!(target: "cydwx::portal", "portal server stopped: {err}");
            }
        }));
        Ok(())
    }

    fn process(&mut self) -> Option<String> {
        self.submissions_rx.try_recv().ok()
    }

    fn close(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            info!(target: "cydwx::portal", "portal server closed");
        }
        // Submissions the device did not take are dropped with the session.
        while self.submissions_rx.try_recv().is_ok() {}
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

async fn handle_portal_index(State(state): State<PortalState>) -> impl IntoResponse {
    let current = state
        .store
        .read_settings()
        .ok()
        .and_then(|settings| settings.station_url)
        .map(|url| escape_html(&url))
        .unwrap_or_default();

    Html(format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
</head>
<body>
  <h1>{title}</h1>
  <p>{mode}</p>
  <form id="station">
    <label>WeeWX JSON URL <input name="url" maxlength="64" value="{current}"></label>
    <button type="submit">Save</button>
  </form>
  <script>
    document.getElementById("station").addEventListener("submit", async (event) => {{
      event.preventDefault();
      const url = new FormData(event.target).get("url");
      await fetch("/api/station-url", {{
        method: "PUT",
        headers: {{ "Content-Type": "application/json" }},
        body: JSON.stringify({{ url }}),
      }});
    }});
  </script>
</body>
</html>"#,
        title = escape_html(&state.config.title),
        mode = state.mode.as_str(),
        current = current,
    ))
}

async fn handle_get_station_url(State(state): State<PortalState>) -> impl IntoResponse {
    match state.store.read_settings() {
        Ok(settings) => Json(StationUrlBody {
            url: settings.station_url.unwrap_or_default(),
        })
        .into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn handle_put_station_url(
    State(state): State<PortalState>,
    Json(body): Json<StationUrlBody>,
) -> impl IntoResponse {
    let url = body.url.trim().to_string();
    if let Err(err) = validate_station_url(&url) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    if state.submissions.send(url.clone()).is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "portal is closing");
    }
    (StatusCode::ACCEPTED, Json(StationUrlBody { url })).into_response()
}
