use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetError {
    #[error("radio error: {0}")]
    Radio(String),
    #[error("association not established within {timeout_ms}ms")]
    AssociationTimeout { timeout_ms: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("malformed NTP response: {0}")]
    NtpResponse(String),
    #[error("no NTP server answered ({servers} tried)")]
    NtpExhausted { servers: usize },
    #[error("failed to set clock: {0}")]
    Clock(#[from] ClockError),
    #[error("gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<NetError> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("timestamp {0} is out of range")]
    OutOfRange(i64),
    #[error("platform refused clock update: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("schedule request failed: {0}")]
    Fetch(#[from] NetError),
    #[error("schedule response is not a recognized shape: {0}")]
    Parse(String),
    #[error("schedule contained no valid entries ({dropped} dropped)")]
    NoValidEntries { dropped: usize },
    #[error("demo schedule has no waypoints")]
    DemoNotConfigured,
    #[error("demo cycle duration must be positive, got {0}s")]
    InvalidCycle(i64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedError {
    #[error("pwm channel `{channel}` rejected duty {duty}: {reason}")]
    Duty {
        channel: &'static str,
        duty: u32,
        reason: String,
    },
    #[error("refusing non-finite brightness ({warm}, {cool})")]
    NonFinite { warm: f64, cool: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StartupError {
    #[error("led output unavailable: {0}")]
    Output(#[source] LedError),
    #[error("wifi association failed: {0}")]
    Association(#[source] NetError),
    #[error("time sync failed: {0}")]
    TimeSync(#[source] NetError),
    #[error("schedule fetch failed: {0}")]
    Schedule(#[source] ScheduleError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickError {
    #[error("led update failed: {0}")]
    Output(#[from] LedError),
    #[error("tick panicked: {0}")]
    Panicked(String),
}
