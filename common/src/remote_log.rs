use std::time::Duration;

use log::{debug, log};
use serde::Serialize;

use crate::{
    config::LampConfig,
    net::{ConnectivityManager, RetryPolicy},
    platform::Platform,
    types::LogLevel,
};

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    message: &'a str,
    level: &'static str,
    service_name: &'a str,
    client_name: &'a str,
}

/// Mirrors lifecycle messages to the logging endpoint. Shipping is
/// best-effort: one attempt, only while associated, errors stay local.
pub struct RemoteLogger {
    url: String,
    headers: Vec<(String, String)>,
    service_name: String,
    client_name: String,
    timeout: Duration,
}

impl RemoteLogger {
    pub fn new(config: &LampConfig) -> Self {
        Self {
            url: config.api.logging_url.clone(),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                (
                    config.api.auth_header.clone(),
                    config.api.logging_token.clone(),
                ),
            ],
            service_name: config.device.logging_service_name.clone(),
            client_name: config.device.client_name.clone(),
            timeout: config.http_timeout(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Logs locally, then ships the message if possible. Returns whether the
    /// endpoint accepted it.
    pub fn emit<P: Platform>(
        &self,
        net: &mut ConnectivityManager<P>,
        level: LogLevel,
        message: &str,
    ) -> bool {
        log!(level.to_log(), "{message}");

        if !self.is_enabled() || !net.is_connected() {
            return false;
        }

        let record = LogRecord {
            message,
            level: level.as_str(),
            service_name: &self.service_name,
            client_name: &self.client_name,
        };
        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(err) => {
                debug!("remote log encode failed: {err}");
                return false;
            }
        };

        match net.http_post_with(
            &self.url,
            &body,
            &self.headers,
            self.timeout,
            RetryPolicy::SINGLE_ATTEMPT,
        ) {
            Ok(()) => true,
            Err(err) => {
                debug!("remote log not delivered: {err}");
                false
            }
        }
    }
}
