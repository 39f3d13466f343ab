use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Brightness, ScheduleMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub client_name: String,
    pub logging_service_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_name: "Sunrise Lamp".to_string(),
            logging_service_name: "sunrise-lamp-aws".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub ntp_servers: Vec<String>,
    pub wifi_timeout_ms: u64,
    pub ntp_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            ntp_servers: vec![
                "pool.ntp.org".to_string(),
                "time.google.com".to_string(),
                "time.cloudflare.com".to_string(),
            ],
            wifi_timeout_ms: 30_000,
            ntp_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub schedule_url: String,
    pub schedule_token: String,
    pub logging_url: String,
    pub logging_token: String,
    pub auth_header: String,
    pub http_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            schedule_url: "https://api.example.com/lights".to_string(),
            schedule_token: String::new(),
            logging_url: String::new(),
            logging_token: String::new(),
            auth_header: "x-custom-auth".to_string(),
            http_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub update_interval_ms: u64,
    pub demo_update_interval_ms: u64,
    pub schedule_refresh_hours: u32,
    pub stale_threshold_s: i64,
    pub drift_threshold_s: i64,
    pub resync_interval_s: i64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 5_000,
            demo_update_interval_ms: 50,
            schedule_refresh_hours: 6,
            stale_threshold_s: 3_600,
            drift_threshold_s: 300,
            resync_interval_s: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NightLightConfig {
    pub warm: f64,
    pub cool: f64,
}

impl Default for NightLightConfig {
    fn default() -> Self {
        Self {
            warm: 0.25,
            cool: 0.0,
        }
    }
}

impl NightLightConfig {
    pub fn brightness(&self) -> Brightness {
        Brightness::new(self.warm, self.cool)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoWaypoint {
    pub offset_s: i64,
    pub warm_pct: u8,
    pub cool_pct: u8,
    pub label: String,
}

impl DemoWaypoint {
    fn new(offset_s: i64, warm_pct: u8, cool_pct: u8, label: &str) -> Self {
        Self {
            offset_s,
            warm_pct,
            cool_pct,
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub cycle_duration_s: i64,
    pub waypoints: Vec<DemoWaypoint>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            cycle_duration_s: 15,
            waypoints: vec![
                DemoWaypoint::new(0, 10, 0, "night"),
                DemoWaypoint::new(2, 25, 0, "pre_dawn"),
                DemoWaypoint::new(4, 60, 20, "dawn"),
                DemoWaypoint::new(6, 100, 80, "sunrise"),
                DemoWaypoint::new(8, 90, 100, "midday"),
                DemoWaypoint::new(10, 80, 50, "afternoon"),
                DemoWaypoint::new(12, 50, 10, "sunset"),
                DemoWaypoint::new(14, 20, 0, "dusk"),
                DemoWaypoint::new(15, 10, 0, "night_end"),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    pub warm_pin: i32,
    pub cool_pin: i32,
    pub frequency_hz: u32,
    pub gamma: f64,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            warm_pin: 10,
            cool_pin: 20,
            frequency_hz: 8_000,
            gamma: 2.2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LampConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub timing: TimingConfig,
    pub night_light: NightLightConfig,
    pub demo: DemoConfig,
    pub default_mode: ScheduleMode,
    pub pwm: PwmConfig,
}

impl LampConfig {
    pub fn sanitize(&mut self) {
        self.network.wifi_timeout_ms = self.network.wifi_timeout_ms.clamp(1_000, 300_000);
        self.network.ntp_timeout_ms = self.network.ntp_timeout_ms.clamp(500, 30_000);
        self.network.ntp_servers.retain(|server| !server.trim().is_empty());
        if self.network.ntp_servers.is_empty() {
            self.network.ntp_servers = NetworkConfig::default().ntp_servers;
        }

        self.api.http_timeout_ms = self.api.http_timeout_ms.clamp(1_000, 120_000);
        if self.api.auth_header.trim().is_empty() {
            self.api.auth_header = ApiConfig::default().auth_header;
        }

        self.retry.max_retries = self.retry.max_retries.clamp(1, 10);
        self.retry.base_delay_ms = self.retry.base_delay_ms.min(60_000);

        self.timing.update_interval_ms = self.timing.update_interval_ms.clamp(100, 600_000);
        self.timing.demo_update_interval_ms = self.timing.demo_update_interval_ms.clamp(10, 5_000);
        self.timing.schedule_refresh_hours = self.timing.schedule_refresh_hours.clamp(1, 168);
        self.timing.stale_threshold_s = self.timing.stale_threshold_s.max(0);
        self.timing.drift_threshold_s = self.timing.drift_threshold_s.max(0);
        self.timing.resync_interval_s = self.timing.resync_interval_s.max(1);

        let night = self.night_light.brightness().clamped();
        self.night_light.warm = night.warm;
        self.night_light.cool = night.cool;

        self.demo.cycle_duration_s = self.demo.cycle_duration_s.max(1);
        for waypoint in &mut self.demo.waypoints {
            waypoint.warm_pct = waypoint.warm_pct.min(100);
            waypoint.cool_pct = waypoint.cool_pct.min(100);
            waypoint.offset_s = waypoint.offset_s.clamp(0, self.demo.cycle_duration_s);
        }
        self.demo.waypoints.sort_by_key(|waypoint| waypoint.offset_s);

        if !self.pwm.gamma.is_finite() || self.pwm.gamma <= 0.0 {
            self.pwm.gamma = PwmConfig::default().gamma;
        }
        self.pwm.frequency_hz = self.pwm.frequency_hz.clamp(100, 40_000);
    }

    pub fn wifi_timeout(&self) -> Duration {
        Duration::from_millis(self.network.wifi_timeout_ms)
    }

    pub fn ntp_timeout(&self) -> Duration {
        Duration::from_millis(self.network.ntp_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.api.http_timeout_ms)
    }

    pub fn refresh_interval_s(&self) -> i64 {
        i64::from(self.timing.schedule_refresh_hours) * 3_600
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_missing_sections() {
        let raw = r#"{
            "network": { "wifi_ssid": "lamp-net" },
            "retry": { "max_retries": 5 }
        }"#;

        let config: LampConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.network.wifi_ssid, "lamp-net");
        assert_eq!(config.network.ntp_servers.len(), 3);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.timing.stale_threshold_s, 3_600);
        assert_eq!(config.default_mode, ScheduleMode::DayNight);
        assert_eq!(config.demo.waypoints.len(), 9);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut config = LampConfig::default();
        config.retry.max_retries = 0;
        config.night_light.warm = 3.0;
        config.network.ntp_servers = vec!["  ".to_string()];
        config.demo.cycle_duration_s = 10;
        config.demo.waypoints = vec![
            DemoWaypoint::new(40, 150, 20, "late"),
            DemoWaypoint::new(0, 10, 0, "start"),
        ];

        config.sanitize();

        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.night_light.warm, 1.0);
        assert_eq!(config.network.ntp_servers[0], "pool.ntp.org");
        assert_eq!(config.demo.waypoints[0].label, "start");
        assert_eq!(config.demo.waypoints[1].offset_s, 10);
        assert_eq!(config.demo.waypoints[1].warm_pct, 100);
    }
}
