use std::time::Duration;

use crate::{clock::Clock, error::NetError, led::LedSink, ntp::NTP_PACKET_LEN};

/// WiFi station interface.
pub trait Radio {
    /// Kicks off association with the configured network and returns without
    /// waiting for it to complete.
    fn begin_association(&mut self) -> Result<(), NetError>;

    fn is_associated(&self) -> bool;

    fn ip_address(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: &'a [(String, String)],
    pub body: Option<&'a [u8]>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs exactly one HTTP exchange. Retries live in the connectivity manager.
pub trait HttpTransport {
    fn execute(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, NetError>;
}

/// Sends one NTP request to `host:123` and returns the raw response datagram.
pub trait NtpTransport {
    fn exchange(
        &mut self,
        host: &str,
        request: &[u8; NTP_PACKET_LEN],
        timeout: Duration,
    ) -> Result<Vec<u8>, NetError>;
}

/// Bundles the hardware-facing pieces a lamp build runs on.
pub trait Platform {
    type Radio: Radio;
    type Http: HttpTransport;
    type Ntp: NtpTransport;
    type Clock: Clock;
    type Led: LedSink;
}
