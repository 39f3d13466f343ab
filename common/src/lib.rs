pub mod clock;
pub mod config;
pub mod error;
pub mod lamp;
pub mod led;
pub mod net;
pub mod ntp;
pub mod platform;
pub mod remote_log;
pub mod schedule;
pub mod transition;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use clock::Clock;
pub use config::LampConfig;
pub use error::{ClockError, LedError, NetError, ScheduleError, StartupError, TickError};
pub use lamp::{LampController, Tick};
pub use led::{GammaLed, LedSink, PwmChannel};
pub use net::{ConnectivityManager, RetryPolicy};
pub use platform::{HttpRequest, HttpResponse, HttpTransport, Method, NtpTransport, Platform, Radio};
pub use schedule::{ScheduleCache, ScheduleEntry, ScheduleManager};
pub use transition::TransitionEngine;
pub use types::{Brightness, ConnectionState, ControllerState, LampStatus, LogLevel, ScheduleMode};
