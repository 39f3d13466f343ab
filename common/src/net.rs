use std::time::Duration;

use log::{info, warn};
use serde_json::{Map, Value};

use crate::{
    clock::{from_unix, Clock},
    config::{LampConfig, RetryConfig},
    error::NetError,
    ntp,
    platform::{HttpRequest, HttpResponse, HttpTransport, Method, NtpTransport, Platform, Radio},
    types::ConnectionState,
};

pub type JsonObject = Map<String, Value>;

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const SINGLE_ATTEMPT: Self = Self {
        max_retries: 1,
        base_delay: Duration::ZERO,
    };

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// `base_delay * 2^attempt`, saturating instead of overflowing.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

pub struct ConnectivityManager<P: Platform> {
    radio: P::Radio,
    http: P::Http,
    ntp: P::Ntp,
    clock: P::Clock,
    ntp_servers: Vec<String>,
    ntp_timeout: Duration,
    retry: RetryPolicy,
    state: ConnectionState,
}

impl<P: Platform> ConnectivityManager<P> {
    pub fn new(
        config: &LampConfig,
        radio: P::Radio,
        http: P::Http,
        ntp: P::Ntp,
        clock: P::Clock,
    ) -> Self {
        Self {
            radio,
            http,
            ntp,
            clock,
            ntp_servers: config.network.ntp_servers.clone(),
            ntp_timeout: config.ntp_timeout(),
            retry: RetryPolicy::from_config(&config.retry),
            state: ConnectionState::default(),
        }
    }

    pub fn clock(&self) -> &P::Clock {
        &self.clock
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_time_synced(&self) -> bool {
        self.state.time_synced
    }

    pub fn connect(&mut self, timeout: Duration) -> Result<(), NetError> {
        if self.radio.is_associated() {
            self.state.associated = true;
            return Ok(());
        }

        if let Err(err) = self.radio.begin_association() {
            warn!("wifi association could not start: {err}");
            self.state.associated = false;
            return Err(err);
        }

        let mut waited = Duration::ZERO;
        while waited < timeout && !self.radio.is_associated() {
            let step = CONNECT_POLL_INTERVAL.min(timeout - waited);
            self.clock.sleep(step);
            waited += step;
        }

        self.state.associated = self.radio.is_associated();
        if self.state.associated {
            match self.radio.ip_address() {
                Some(ip) => info!("wifi associated, ip {ip}"),
                None => info!("wifi associated"),
            }
            Ok(())
        } else {
            warn!("wifi association timed out after {}ms", timeout.as_millis());
            Err(NetError::AssociationTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    pub fn is_connected(&mut self) -> bool {
        self.state.associated = self.radio.is_associated();
        self.state.associated
    }

    pub fn ensure_connected(&mut self, timeout: Duration) -> Result<(), NetError> {
        if self.is_connected() {
            return Ok(());
        }
        info!("wifi disconnected, reconnecting");
        self.connect(timeout)
    }

    /// Queries each configured NTP server once, in order, and sets the clock
    /// from the first answer. Returns the adopted Unix time.
    pub fn sync_time(&mut self) -> Result<i64, NetError> {
        let request = ntp::client_request();

        for server in &self.ntp_servers {
            info!("requesting time from {server}");
            let unix = match self
                .ntp
                .exchange(server, &request, self.ntp_timeout)
                .and_then(|response| ntp::parse_response(&response))
            {
                Ok(unix) => unix,
                Err(err) => {
                    warn!("ntp request to {server} failed: {err}");
                    continue;
                }
            };

            let adopted = from_unix(unix)?;
            self.clock.set(adopted)?;
            self.state.time_synced = true;
            info!("clock synced from {server}: {adopted}");
            return Ok(unix);
        }

        warn!("ntp sync failed, all servers exhausted");
        Err(NetError::NtpExhausted {
            servers: self.ntp_servers.len(),
        })
    }

    pub fn http_get(
        &mut self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<JsonObject, NetError> {
        let request = HttpRequest {
            method: Method::Get,
            url,
            headers,
            body: None,
            timeout,
        };
        let policy = self.retry;
        self.execute_with_retry(&request, policy, |response| {
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(Value::Object(object)) => Ok(object),
                Ok(other) => Err(NetError::Decode(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                ))),
                Err(err) => Err(NetError::Decode(err.to_string())),
            }
        })
    }

    pub fn http_post(
        &mut self,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), NetError> {
        let policy = self.retry;
        self.http_post_with(url, body, headers, timeout, policy)
    }

    pub fn http_post_with(
        &mut self,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<(), NetError> {
        let payload = serde_json::to_vec(body).map_err(|err| NetError::Decode(err.to_string()))?;
        let request = HttpRequest {
            method: Method::Post,
            url,
            headers,
            body: Some(&payload),
            timeout,
        };
        self.execute_with_retry(&request, policy, |_| Ok(()))
    }

    fn execute_with_retry<T>(
        &mut self,
        request: &HttpRequest<'_>,
        policy: RetryPolicy,
        mut accept: impl FnMut(HttpResponse) -> Result<T, NetError>,
    ) -> Result<T, NetError> {
        let method = request.method.as_str();
        let attempts = policy.max_retries.max(1);
        let mut last = NetError::Transport("no attempt made".to_string());

        for attempt in 0..attempts {
            let outcome = self.http.execute(request).and_then(|response| {
                if response.is_success() {
                    accept(response)
                } else {
                    Err(NetError::Status(response.status))
                }
            });

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        "HTTP {method} attempt {}/{attempts} failed: {err}",
                        attempt + 1
                    );
                    last = err;
                }
            }

            if attempt + 1 < attempts {
                let delay = policy.backoff_delay(attempt);
                info!("retrying HTTP {method} in {}ms", delay.as_millis());
                self.clock.sleep(delay);
            }
        }

        warn!("HTTP {method} {} failed after {attempts} attempts", request.url);
        Err(NetError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
