use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use embedded_svc::{
    http::{client::Client as HttpClient, Method as HttpMethod, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::AnyOutputPin,
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver},
    prelude::*,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::EspWifi,
};
use log::{info, warn};

use lamp_common::{
    Clock, ClockError, ConnectivityManager, GammaLed, HttpRequest, HttpResponse, HttpTransport,
    LampConfig, LampController, LedError, Method, NetError, Platform, PwmChannel, Radio, Tick,
};

use crate::udp_ntp::UdpNtp;

const MAX_HTTP_BODY: usize = 16 * 1024;
const HTTP_READ_CHUNK: usize = 512;

struct EspPlatform;

impl Platform for EspPlatform {
    type Radio = EspRadio;
    type Http = EspHttp;
    type Ntp = UdpNtp;
    type Clock = EspClock;
    type Led = GammaLed<LedcPwm>;
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = LampConfig::default();
    ensure_build_defaults(&mut config);
    config.sanitize();

    info!(
        "lamp config: ssid=`{}`, schedule=`{}`, warm GPIO{}, cool GPIO{}",
        config.network.wifi_ssid, config.api.schedule_url, config.pwm.warm_pin, config.pwm.cool_pin
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, ledc, .. } = Peripherals::take()?;

    let timer = LedcTimerDriver::new(
        ledc.timer0,
        &TimerConfig::default().frequency(config.pwm.frequency_hz.Hz()),
    )
    .context("failed to configure LEDC timer")?;
    let warm = LedcDriver::new(ledc.channel0, &timer, unsafe {
        AnyOutputPin::new(config.pwm.warm_pin)
    })
    .context("failed to attach warm LED channel")?;
    let cool = LedcDriver::new(ledc.channel1, &timer, unsafe {
        AnyOutputPin::new(config.pwm.cool_pin)
    })
    .context("failed to attach cool LED channel")?;
    let led = GammaLed::new(
        LedcPwm::new("warm", warm),
        LedcPwm::new("cool", cool),
        config.pwm.gamma,
    );

    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
    let auth_method = if config.network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: config
            .network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: config
            .network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    let net = ConnectivityManager::<EspPlatform>::new(
        &config,
        EspRadio { wifi },
        EspHttp,
        UdpNtp,
        EspClock,
    );
    let mut lamp = LampController::new(&config, net, led);

    if let Err(err) = lamp.startup() {
        warn!("startup ended in night light fallback: {err}");
    }

    loop {
        let started = Instant::now();
        lamp.tick();
        // An overrunning tick is not caught up; the next one starts right away.
        thread::sleep(lamp.interval().saturating_sub(started.elapsed()));
    }
}

fn ensure_build_defaults(config: &mut LampConfig) {
    let defaults = [
        (&mut config.network.wifi_ssid, option_env!("WIFI_SSID")),
        (&mut config.network.wifi_pass, option_env!("WIFI_PASS")),
        (&mut config.api.schedule_token, option_env!("LAMP_SCHEDULE_TOKEN")),
        (&mut config.api.logging_url, option_env!("LAMP_LOGGING_URL")),
        (&mut config.api.logging_token, option_env!("LAMP_LOGGING_TOKEN")),
    ];
    for (field, value) in defaults {
        if field.is_empty() {
            if let Some(value) = value {
                *field = value.to_string();
            }
        }
    }

    if let Some(url) = option_env!("LAMP_SCHEDULE_URL") {
        config.api.schedule_url = url.to_string();
    }
}

struct EspRadio {
    wifi: EspWifi<'static>,
}

impl Radio for EspRadio {
    fn begin_association(&mut self) -> Result<(), NetError> {
        let started = self.wifi.is_started().map_err(radio_error)?;
        if !started {
            self.wifi.start().map_err(radio_error)?;
            info!("wifi started");
        }
        self.wifi.connect().map_err(radio_error)
    }

    fn is_associated(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn ip_address(&self) -> Option<String> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }
}

fn radio_error(err: esp_idf_svc::sys::EspError) -> NetError {
    NetError::Radio(err.to_string())
}

/// One `EspHttpConnection` per request; connections are not kept alive
/// between schedule fetches minutes apart.
struct EspHttp;

impl HttpTransport for EspHttp {
    fn execute(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, NetError> {
        let conf = HttpClientConfiguration {
            timeout: Some(request.timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&conf)
            .map_err(|err| NetError::Transport(format!("http client init failed: {err}")))?;
        let mut client = HttpClient::wrap(connection);

        let content_length = request.body.map(|body| body.len().to_string());
        let mut headers: Vec<(&str, &str)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        if let Some(length) = content_length.as_deref() {
            headers.push(("content-length", length));
        }

        let method = match request.method {
            Method::Get => HttpMethod::Get,
            Method::Post => HttpMethod::Post,
        };
        let mut outgoing = client
            .request(method, request.url, &headers)
            .map_err(|err| NetError::Transport(format!("{err:?}")))?;
        if let Some(body) = request.body {
            outgoing
                .write_all(body)
                .map_err(|err| NetError::Transport(format!("{err:?}")))?;
            outgoing
                .flush()
                .map_err(|err| NetError::Transport(format!("{err:?}")))?;
        }

        let mut response = outgoing
            .submit()
            .map_err(|err| NetError::Transport(format!("{err:?}")))?;
        let status = response.status();

        let mut body = Vec::new();
        let mut chunk = [0_u8; HTTP_READ_CHUNK];
        loop {
            let read = response
                .read(&mut chunk)
                .map_err(|err| NetError::Transport(format!("{err:?}")))?;
            if read == 0 {
                break;
            }
            if body.len() + read > MAX_HTTP_BODY {
                return Err(NetError::Decode(format!(
                    "response body exceeds {MAX_HTTP_BODY} bytes"
                )));
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Ok(HttpResponse { status, body })
    }
}

/// The newlib system clock, set through `settimeofday`.
#[derive(Debug, Clone, Copy)]
struct EspClock;

impl Clock for EspClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn set(&self, now: DateTime<Utc>) -> Result<(), ClockError> {
        let tv = esp_idf_svc::sys::timeval {
            tv_sec: now.timestamp() as _,
            tv_usec: now.timestamp_subsec_micros() as _,
        };
        let rc = unsafe { esp_idf_svc::sys::settimeofday(&tv, core::ptr::null()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(ClockError::Platform(format!("settimeofday returned {rc}")))
        }
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

struct LedcPwm {
    name: &'static str,
    driver: LedcDriver<'static>,
}

impl LedcPwm {
    fn new(name: &'static str, driver: LedcDriver<'static>) -> Self {
        Self { name, driver }
    }
}

impl PwmChannel for LedcPwm {
    fn max_duty(&self) -> u32 {
        self.driver.get_max_duty()
    }

    fn set_duty(&mut self, duty: u32) -> Result<(), LedError> {
        self.driver.set_duty(duty).map_err(|err| LedError::Duty {
            channel: self.name,
            duty,
            reason: err.to_string(),
        })
    }
}
