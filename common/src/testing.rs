//! In-memory stand-ins for the hardware seams, shared by the unit tests.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    clock::Clock,
    config::LampConfig,
    error::{ClockError, LedError, NetError},
    led::{LedSink, PwmChannel},
    net::ConnectivityManager,
    ntp::{NTP_DELTA, NTP_PACKET_LEN},
    platform::{HttpRequest, HttpResponse, HttpTransport, Method, NtpTransport, Platform, Radio},
    types::Brightness,
};

/// 2026-01-05T08:00:00Z
pub const T0: i64 = 1_767_600_000;

pub struct FakePlatform;

impl Platform for FakePlatform {
    type Radio = FakeRadio;
    type Http = FakeHttp;
    type Ntp = FakeNtp;
    type Clock = ManualClock;
    type Led = FakeLed;
}

pub fn fake_connectivity(
    radio: FakeRadio,
    http: FakeHttp,
    ntp: FakeNtp,
    clock: ManualClock,
) -> ConnectivityManager<FakePlatform> {
    ConnectivityManager::new(&LampConfig::default(), radio, http, ntp, clock)
}

pub fn ntp_reply(unix: i64) -> Vec<u8> {
    let mut packet = vec![0_u8; NTP_PACKET_LEN];
    packet[0] = 0x1C;
    packet[40..44].copy_from_slice(&((unix + NTP_DELTA) as u32).to_be_bytes());
    packet
}

#[derive(Debug)]
struct ClockState {
    now_ms: i64,
    sleeps: Vec<Duration>,
    set_calls: usize,
}

/// Clock that only moves when slept on or set.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Rc<RefCell<ClockState>>,
}

impl ManualClock {
    pub fn at(unix: i64) -> Self {
        Self {
            state: Rc::new(RefCell::new(ClockState {
                now_ms: unix * 1_000,
                sleeps: Vec::new(),
                set_calls: 0,
            })),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.state.borrow_mut().now_ms += duration.as_millis() as i64;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.borrow().sleeps.clone()
    }

    pub fn set_calls(&self) -> usize {
        self.state.borrow().set_calls
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.state.borrow().now_ms).unwrap_or_default()
    }

    fn set(&self, now: DateTime<Utc>) -> Result<(), ClockError> {
        let mut state = self.state.borrow_mut();
        state.now_ms = now.timestamp_millis();
        state.set_calls += 1;
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.borrow_mut();
        state.sleeps.push(duration);
        state.now_ms += duration.as_millis() as i64;
    }
}

#[derive(Debug, Default)]
struct RadioState {
    up: bool,
    associating: bool,
    polls_until_up: Option<u32>,
    remaining: u32,
    attempts: usize,
    refuse: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeRadio {
    state: Rc<RefCell<RadioState>>,
}

impl FakeRadio {
    fn with(state: RadioState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn associated() -> Self {
        Self::with(RadioState {
            up: true,
            polls_until_up: Some(0),
            ..RadioState::default()
        })
    }

    pub fn associates_after_polls(polls: u32) -> Self {
        Self::with(RadioState {
            polls_until_up: Some(polls),
            ..RadioState::default()
        })
    }

    pub fn never_associates() -> Self {
        Self::with(RadioState::default())
    }

    pub fn refusing() -> Self {
        Self::with(RadioState {
            refuse: true,
            ..RadioState::default()
        })
    }

    pub fn drop_link(&self) {
        let mut state = self.state.borrow_mut();
        state.up = false;
        state.associating = false;
    }

    /// Drops the link and keeps later association attempts from completing.
    pub fn lose_signal(&self) {
        let mut state = self.state.borrow_mut();
        state.up = false;
        state.associating = false;
        state.polls_until_up = None;
    }

    /// Makes the next association attempt succeed on its first poll.
    pub fn restore(&self) {
        let mut state = self.state.borrow_mut();
        state.polls_until_up = Some(0);
        state.refuse = false;
    }

    pub fn association_attempts(&self) -> usize {
        self.state.borrow().attempts
    }
}

impl Radio for FakeRadio {
    fn begin_association(&mut self) -> Result<(), NetError> {
        let mut state = self.state.borrow_mut();
        state.attempts += 1;
        if state.refuse {
            return Err(NetError::Radio("interface down".to_string()));
        }
        state.associating = true;
        state.remaining = state.polls_until_up.unwrap_or(0);
        Ok(())
    }

    fn is_associated(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.up {
            return true;
        }
        if !state.associating || state.polls_until_up.is_none() {
            return false;
        }
        if state.remaining == 0 {
            state.up = true;
        } else {
            state.remaining -= 1;
        }
        state.up
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct HttpState {
    script: VecDeque<Result<HttpResponse, NetError>>,
    requests: Vec<RecordedRequest>,
}

/// Answers requests from a queue; an empty queue behaves like a dead network.
#[derive(Debug, Clone, Default)]
pub struct FakeHttp {
    state: Rc<RefCell<HttpState>>,
}

impl FakeHttp {
    pub fn respond(self, status: u16, body: &str) -> Self {
        self.enqueue(status, body);
        self
    }

    pub fn fail(self, err: NetError) -> Self {
        self.state.borrow_mut().script.push_back(Err(err));
        self
    }

    pub fn enqueue(&self, status: u16, body: &str) {
        self.state.borrow_mut().script.push_back(Ok(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        }));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.borrow().requests.clone()
    }
}

impl HttpTransport for FakeHttp {
    fn execute(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, NetError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(RecordedRequest {
            method: request.method,
            url: request.url.to_string(),
            headers: request.headers.to_vec(),
            body: request.body.map(<[u8]>::to_vec),
        });
        state
            .script
            .pop_front()
            .unwrap_or_else(|| Err(NetError::Transport("connection refused".to_string())))
    }
}

#[derive(Debug, Default)]
struct NtpState {
    replies: HashMap<String, Result<Vec<u8>, NetError>>,
    queried: Vec<String>,
}

/// Unknown hosts time out.
#[derive(Debug, Clone, Default)]
pub struct FakeNtp {
    state: Rc<RefCell<NtpState>>,
}

impl FakeNtp {
    pub fn reply(self, host: &str, packet: Vec<u8>) -> Self {
        self.set_reply(host, packet);
        self
    }

    pub fn fail(self, host: &str) -> Self {
        self.state
            .borrow_mut()
            .replies
            .insert(host.to_string(), Err(NetError::Timeout));
        self
    }

    pub fn set_reply(&self, host: &str, packet: Vec<u8>) {
        self.state
            .borrow_mut()
            .replies
            .insert(host.to_string(), Ok(packet));
    }

    pub fn queried(&self) -> Vec<String> {
        self.state.borrow().queried.clone()
    }
}

impl NtpTransport for FakeNtp {
    fn exchange(
        &mut self,
        host: &str,
        _request: &[u8; NTP_PACKET_LEN],
        _timeout: Duration,
    ) -> Result<Vec<u8>, NetError> {
        let mut state = self.state.borrow_mut();
        state.queried.push(host.to_string());
        state
            .replies
            .get(host)
            .cloned()
            .unwrap_or(Err(NetError::Timeout))
    }
}

#[derive(Debug, Clone)]
pub struct RecordingPwm {
    max_duty: u32,
    duties: Rc<RefCell<Vec<u32>>>,
}

impl RecordingPwm {
    pub fn new(max_duty: u32) -> Self {
        Self {
            max_duty,
            duties: Rc::default(),
        }
    }

    pub fn duties(&self) -> Vec<u32> {
        self.duties.borrow().clone()
    }

    pub fn last_duty(&self) -> Option<u32> {
        self.duties.borrow().last().copied()
    }
}

impl PwmChannel for RecordingPwm {
    fn max_duty(&self) -> u32 {
        self.max_duty
    }

    fn set_duty(&mut self, duty: u32) -> Result<(), LedError> {
        self.duties.borrow_mut().push(duty);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LedState {
    current: Brightness,
    history: Vec<Brightness>,
    failures: usize,
    panics: usize,
}

/// Records every applied pair. Can be told to fail or panic on upcoming sets.
#[derive(Debug, Clone, Default)]
pub struct FakeLed {
    state: Rc<RefCell<LedState>>,
}

impl FakeLed {
    pub fn fail_next(&self, count: usize) {
        self.state.borrow_mut().failures = count;
    }

    pub fn panic_next(&self) {
        self.state.borrow_mut().panics = 1;
    }

    pub fn history(&self) -> Vec<Brightness> {
        self.state.borrow().history.clone()
    }

    pub fn current(&self) -> Brightness {
        self.state.borrow().current
    }
}

impl LedSink for FakeLed {
    fn set(&mut self, value: Brightness) -> Result<(), LedError> {
        let should_panic = {
            let mut state = self.state.borrow_mut();
            if state.panics > 0 {
                state.panics -= 1;
                true
            } else {
                false
            }
        };
        if should_panic {
            panic!("led driver fault");
        }

        let mut state = self.state.borrow_mut();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(LedError::Duty {
                channel: "warm",
                duty: 0,
                reason: "bus error".to_string(),
            });
        }
        let value = value.clamped();
        state.current = value;
        state.history.push(value);
        Ok(())
    }

    fn brightness(&self) -> Brightness {
        self.current()
    }
}
