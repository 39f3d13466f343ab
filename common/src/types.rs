use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleMode {
    #[default]
    DayNight,
    Scheduled,
    Demo,
}

impl ScheduleMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DayNight => "dayNight",
            Self::Scheduled => "scheduled",
            Self::Demo => "demo",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dayNight" => Some(Self::DayNight),
            "scheduled" => Some(Self::Scheduled),
            "demo" => Some(Self::Demo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    Booting,
    NightLightFallback,
    Running,
    DemoLooping,
}

impl ControllerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booting => "BOOTING",
            Self::NightLightFallback => "NIGHT_LIGHT_FALLBACK",
            Self::Running => "RUNNING",
            Self::DemoLooping => "DEMO_LOOPING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    pub associated: bool,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
}

/// Perceptual brightness pair, both channels in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Brightness {
    pub warm: f64,
    pub cool: f64,
}

impl Brightness {
    pub const OFF: Self = Self {
        warm: 0.0,
        cool: 0.0,
    };

    pub fn new(warm: f64, cool: f64) -> Self {
        Self { warm, cool }
    }

    pub fn from_percent(warm_pct: f64, cool_pct: f64) -> Self {
        Self {
            warm: warm_pct / 100.0,
            cool: cool_pct / 100.0,
        }
    }

    pub fn lerp(self, next: Self, progress: f64) -> Self {
        Self {
            warm: self.warm + (next.warm - self.warm) * progress,
            cool: self.cool + (next.cool - self.cool) * progress,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            warm: clamp_unit(self.warm),
            cool: clamp_unit(self.cool),
        }
    }

    pub fn is_finite(self) -> bool {
        self.warm.is_finite() && self.cool.is_finite()
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    pub fn to_log(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// Snapshot of the controller published after every tick.
#[derive(Debug, Clone, Serialize)]
pub struct LampStatus {
    pub state: &'static str,
    pub warm: f64,
    pub cool: f64,
    pub mode: &'static str,
    pub entries: usize,
    #[serde(rename = "lastFetchTime")]
    pub last_fetch_time: i64,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    pub connected: bool,
    #[serde(rename = "startupComplete")]
    pub startup_complete: bool,
}
