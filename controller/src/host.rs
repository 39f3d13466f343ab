use std::{
    io::{ErrorKind, Read},
    net::{SocketAddr, UdpSocket},
    path::PathBuf,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::{
    net::TcpListener,
    sync::watch,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use lamp_common::{
    Clock, ClockError, ConnectivityManager, GammaLed, HttpRequest, HttpResponse, HttpTransport,
    LampConfig, LampController, LampStatus, LedError, Method, NetError, Platform, PwmChannel,
    Radio, Tick,
};

use crate::udp_ntp::UdpNtp;

const DEFAULT_CONFIG_PATH: &str = "./lamp.json";
const DEFAULT_STATUS_PORT: u16 = 8080;
const PROBE_ADDR: &str = "1.1.1.1:53";
const MAX_HTTP_BODY: u64 = 64 * 1024;
const SIMULATED_MAX_DUTY: u32 = (1 << 13) - 1;

struct HostPlatform;

impl Platform for HostPlatform {
    type Radio = HostRadio;
    type Http = UreqTransport;
    type Ntp = UdpNtp;
    type Clock = HostClock;
    type Led = GammaLed<LogPwm>;
}

type HostLamp = LampController<HostPlatform>;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = load_config().await.unwrap_or_else(|err| {
        warn!("failed to load lamp config: {err:#}");
        LampConfig::default()
    });
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.sanitize();

    let demo = demo_requested(std::env::args(), std::env::var("LAMP_DEMO").ok());
    let status_port = std::env::var("LAMP_STATUS_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_STATUS_PORT);

    info!(
        "lamp config loaded: schedule=`{}`, mode={}, demo={demo}",
        config.api.schedule_url,
        config.default_mode.as_str()
    );

    let net = ConnectivityManager::<HostPlatform>::new(
        &config,
        HostRadio::new(PROBE_ADDR),
        UreqTransport::new(),
        UdpNtp,
        HostClock::default(),
    );
    let led = GammaLed::new(
        LogPwm::new("warm", config.pwm.warm_pin),
        LogPwm::new("cool", config.pwm.cool_pin),
        config.pwm.gamma,
    );
    let lamp = LampController::new(&config, net, led);

    let (lamp, startup) = tokio::task::spawn_blocking(move || {
        let mut lamp = lamp;
        let result = if demo {
            lamp.start_demo()
        } else {
            lamp.startup()
        };
        (lamp, result)
    })
    .await
    .context("startup task panicked")?;

    match startup {
        Ok(()) => info!("lamp started in {}", lamp.state().as_str()),
        Err(err) => warn!("startup ended in night light fallback: {err}"),
    }

    let (status_tx, status_rx) = watch::channel(lamp.status());
    start_status_server(status_port, status_rx).await;

    run_tick_loop(lamp, status_tx).await
}

async fn run_tick_loop(mut lamp: HostLamp, status: watch::Sender<LampStatus>) -> anyhow::Result<()> {
    let mut period = lamp.interval();
    let mut ticker = ticker(period);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            _ = ticker.tick() => {}
        }

        lamp = tokio::task::spawn_blocking(move || {
            lamp.tick();
            lamp
        })
        .await
        .context("tick task panicked")?;
        status.send_replace(lamp.status());

        let next = lamp.interval();
        if next != period {
            debug!("tick interval {}ms -> {}ms", period.as_millis(), next.as_millis());
            period = next;
            ticker = self::ticker(period);
        }
    }

    info!("shutdown requested");
    if let Err(err) = lamp.shutdown() {
        warn!("failed to turn leds off: {err}");
    }
    Ok(())
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// The status endpoint is optional; the tick loop runs whether or not it binds.
async fn start_status_server(port: u16, status: watch::Receiver<LampStatus>) -> bool {
    match serve_status(port, status).await {
        Ok(()) => true,
        Err(err) => {
            warn!("status endpoint unavailable, continuing without it: {err:#}");
            false
        }
    }
}

async fn serve_status(port: u16, status: watch::Receiver<LampStatus>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .with_state(status);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status endpoint on http://{addr}/api/status");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("status server stopped: {err}");
        }
    });
    Ok(())
}

async fn handle_get_status(State(status): State<watch::Receiver<LampStatus>>) -> impl IntoResponse {
    let snapshot = status.borrow().clone();
    Json(snapshot)
}

async fn load_config() -> anyhow::Result<LampConfig> {
    let path = std::env::var("LAMP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<LampConfig>(&raw)
            .with_context(|| format!("invalid lamp config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(LampConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_env_overrides(config: &mut LampConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("LAMP_SCHEDULE_URL") {
        config.api.schedule_url = url;
    }
    if let Some(token) = lookup("LAMP_SCHEDULE_TOKEN") {
        config.api.schedule_token = token;
    }
    if let Some(url) = lookup("LAMP_LOGGING_URL") {
        config.api.logging_url = url;
    }
    if let Some(token) = lookup("LAMP_LOGGING_TOKEN") {
        config.api.logging_token = token;
    }
}

fn demo_requested(mut args: impl Iterator<Item = String>, env: Option<String>) -> bool {
    args.any(|arg| arg == "--demo")
        || env.is_some_and(|value| matches!(value.trim(), "1" | "true" | "yes"))
}

/// Treats "a route to the probe address exists" as being associated.
struct HostRadio {
    probe: String,
}

impl HostRadio {
    fn new(probe: &str) -> Self {
        Self {
            probe: probe.to_string(),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
        socket.connect(self.probe.as_str()).ok()?;
        socket.local_addr().ok()
    }
}

impl Radio for HostRadio {
    fn begin_association(&mut self) -> Result<(), NetError> {
        info!("host network is managed by the OS, waiting for a route to {}", self.probe);
        Ok(())
    }

    fn is_associated(&self) -> bool {
        self.local_addr().is_some()
    }

    fn ip_address(&self) -> Option<String> {
        self.local_addr().map(|addr| addr.ip().to_string())
    }
}

struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn execute(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, NetError> {
        let mut call = self
            .agent
            .request(request.method.as_str(), request.url)
            .timeout(request.timeout);
        for (name, value) in request.headers {
            call = call.set(name, value);
        }

        let result = match (request.method, request.body) {
            (Method::Post, Some(body)) => call.send_bytes(body),
            _ => call.call(),
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => return Err(NetError::Transport(err.to_string())),
        };

        let status = response.status();
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_HTTP_BODY)
            .read_to_end(&mut body)
            .map_err(|err| NetError::Transport(format!("failed reading body: {err}")))?;

        Ok(HttpResponse { status, body })
    }
}

/// System time plus whatever correction the last NTP sync asked for.
#[derive(Debug, Clone, Default)]
struct HostClock {
    offset_ms: Arc<AtomicI64>,
}

impl Clock for HostClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + TimeDelta::milliseconds(self.offset_ms.load(Ordering::Relaxed))
    }

    fn set(&self, now: DateTime<Utc>) -> Result<(), ClockError> {
        let offset = now.timestamp_millis() - Utc::now().timestamp_millis();
        self.offset_ms.store(offset, Ordering::Relaxed);
        info!("clock offset set to {offset}ms");
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Stand-in PWM output that logs duty changes.
struct LogPwm {
    name: &'static str,
    pin: i32,
    duty: Option<u32>,
}

impl LogPwm {
    fn new(name: &'static str, pin: i32) -> Self {
        Self {
            name,
            pin,
            duty: None,
        }
    }
}

impl PwmChannel for LogPwm {
    fn max_duty(&self) -> u32 {
        SIMULATED_MAX_DUTY
    }

    fn set_duty(&mut self, duty: u32) -> Result<(), LedError> {
        if duty > SIMULATED_MAX_DUTY {
            return Err(LedError::Duty {
                channel: self.name,
                duty,
                reason: format!("exceeds max duty {SIMULATED_MAX_DUTY}"),
            });
        }
        if self.duty != Some(duty) {
            debug!(channel = self.name, pin = self.pin, duty, "pwm duty");
            self.duty = Some(duty);
        }
        Ok(())
    }
}
