use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    clock::Clock,
    config::{DemoConfig, LampConfig},
    error::ScheduleError,
    net::ConnectivityManager,
    platform::Platform,
    types::{Brightness, ScheduleMode},
};

/// Keys the legacy response uses for its fixed day/night waypoints.
const NAMED_KEYS: [&str; 8] = [
    "civil_twilight_begin",
    "sunrise",
    "sunset",
    "natural_sunset",
    "civil_twilight_end",
    "natural_twilight_end",
    "bed_time",
    "night_time",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEntry {
    #[serde(rename = "unixTime")]
    pub unix_time: i64,
    pub warm: f64,
    pub cool: f64,
    pub label: String,
}

impl ScheduleEntry {
    pub fn new(unix_time: i64, warm: f64, cool: f64, label: impl Into<String>) -> Self {
        Self {
            unix_time,
            warm,
            cool,
            label: label.into(),
        }
    }

    pub fn brightness(&self) -> Brightness {
        Brightness::new(self.warm, self.cool)
    }
}

/// The most recent successfully fetched schedule. Replaced wholesale, never
/// edited in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCache {
    mode: ScheduleMode,
    entries: Vec<ScheduleEntry>,
    last_fetch_time: i64,
    cycle_duration: Option<i64>,
}

impl ScheduleCache {
    pub fn empty(mode: ScheduleMode) -> Self {
        Self {
            mode,
            entries: Vec::new(),
            last_fetch_time: 0,
            cycle_duration: None,
        }
    }

    /// A non-looping schedule. Entries are stable-sorted by time.
    pub fn fixed(mode: ScheduleMode, mut entries: Vec<ScheduleEntry>, fetched_at: i64) -> Self {
        debug_assert_ne!(mode, ScheduleMode::Demo, "demo caches need a cycle duration");
        entries.sort_by_key(|entry| entry.unix_time);
        Self {
            mode,
            entries,
            last_fetch_time: fetched_at,
            cycle_duration: None,
        }
    }

    pub fn demo(
        mut entries: Vec<ScheduleEntry>,
        cycle_duration: i64,
        fetched_at: i64,
    ) -> Result<Self, ScheduleError> {
        if cycle_duration <= 0 {
            return Err(ScheduleError::InvalidCycle(cycle_duration));
        }
        if entries.is_empty() {
            return Err(ScheduleError::DemoNotConfigured);
        }
        entries.sort_by_key(|entry| entry.unix_time);
        Ok(Self {
            mode: ScheduleMode::Demo,
            entries,
            last_fetch_time: fetched_at,
            cycle_duration: Some(cycle_duration),
        })
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn last_fetch_time(&self) -> i64 {
        self.last_fetch_time
    }

    pub fn cycle_duration(&self) -> Option<i64> {
        self.cycle_duration
    }

    pub fn is_demo(&self) -> bool {
        self.mode == ScheduleMode::Demo
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The two body shapes the schedule endpoint is known to send.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ScheduleResponse {
    Unified(UnifiedResponse),
    Legacy(LegacyResponse),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedResponse {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub server_time: Option<i64>,
    /// Kept as raw values so one malformed entry does not reject the rest.
    pub brightness_schedule: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyResponse {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub utc_offset: Option<i64>,
    #[serde(default)]
    pub entries: Option<Vec<Value>>,
    #[serde(default)]
    pub schedule: Option<Vec<Value>>,
    #[serde(flatten)]
    pub named: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnifiedEntry {
    unix_time: Option<i64>,
    warm_brightness: Option<f64>,
    cool_brightness: Option<f64>,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    time: Option<String>,
    warm: Option<f64>,
    #[serde(rename = "warmBrightness")]
    warm_brightness: Option<f64>,
    cool: Option<f64>,
    #[serde(rename = "coolBrightness")]
    cool_brightness: Option<f64>,
    #[serde(default)]
    label: Option<String>,
}

pub struct ScheduleManager {
    url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
    default_mode: ScheduleMode,
    stale_threshold_s: i64,
    refresh_interval_s: i64,
    drift_threshold_s: i64,
    demo: DemoConfig,
    cache: ScheduleCache,
}

impl ScheduleManager {
    pub fn new(config: &LampConfig) -> Self {
        Self {
            url: config.api.schedule_url.clone(),
            headers: vec![(
                config.api.auth_header.clone(),
                config.api.schedule_token.clone(),
            )],
            timeout: config.http_timeout(),
            default_mode: config.default_mode,
            stale_threshold_s: config.timing.stale_threshold_s,
            refresh_interval_s: config.refresh_interval_s(),
            drift_threshold_s: config.timing.drift_threshold_s,
            demo: config.demo.clone(),
            cache: ScheduleCache::empty(config.default_mode),
        }
    }

    /// Fetches and installs a fresh schedule. On any error the previous cache
    /// stays in place. Returns the number of cached entries.
    pub fn fetch<P: Platform>(
        &mut self,
        net: &mut ConnectivityManager<P>,
    ) -> Result<usize, ScheduleError> {
        let body = net.http_get(&self.url, &self.headers, self.timeout)?;
        let now = net.clock().now();
        let cache = self.parse_response(Value::Object(body), now)?;

        info!(
            "schedule fetched: {} entries, mode={}",
            cache.entries().len(),
            cache.mode().as_str()
        );
        self.cache = cache;
        Ok(self.cache.entries().len())
    }

    /// Installs the configured demo schedule anchored at `now` without touching
    /// the network.
    pub fn load_demo(&mut self, now: i64) -> Result<(), ScheduleError> {
        self.cache = self.demo_cache(now)?;
        info!(
            "demo schedule loaded: {} entries, {}s cycle",
            self.cache.entries().len(),
            self.demo.cycle_duration_s
        );
        Ok(())
    }

    pub fn parse_response(
        &self,
        body: Value,
        now: DateTime<Utc>,
    ) -> Result<ScheduleCache, ScheduleError> {
        let response: ScheduleResponse =
            serde_json::from_value(body).map_err(|err| ScheduleError::Parse(err.to_string()))?;

        match response {
            ScheduleResponse::Unified(response) => {
                if let Some(server_time) = response.server_time {
                    self.clock_drift(server_time, now.timestamp());
                }

                let mode = self.resolve_mode(response.mode.as_deref());
                if mode == ScheduleMode::Demo {
                    return self.demo_cache(now.timestamp());
                }

                let total = response.brightness_schedule.len();
                let entries: Vec<_> = response
                    .brightness_schedule
                    .into_iter()
                    .enumerate()
                    .filter_map(|(index, raw)| match parse_unified_entry(raw) {
                        Ok(entry) => Some(entry),
                        Err(reason) => {
                            warn!("dropping schedule entry {index}: {reason}");
                            None
                        }
                    })
                    .collect();

                self.finish(mode, entries, total, now.timestamp())
            }
            ScheduleResponse::Legacy(response) => {
                let mode = self.resolve_mode(response.mode.as_deref());
                if mode == ScheduleMode::Demo {
                    return self.demo_cache(now.timestamp());
                }

                let zone = match response.utc_offset {
                    Some(offset) => i32::try_from(offset)
                        .ok()
                        .and_then(FixedOffset::east_opt)
                        .unwrap_or_else(|| {
                            warn!("utc_offset {offset} out of range, using UTC");
                            Utc.fix()
                        }),
                    None => {
                        warn!("no utc_offset in schedule, using UTC");
                        Utc.fix()
                    }
                };

                let raw = legacy_entries(response.entries, response.schedule, response.named);
                let total = raw.len();
                let entries: Vec<_> = raw
                    .into_iter()
                    .filter_map(|(default_label, raw)| {
                        match parse_legacy_entry(raw, &default_label, zone, now) {
                            Ok(entry) => Some(entry),
                            Err(reason) => {
                                warn!("dropping schedule entry `{default_label}`: {reason}");
                                None
                            }
                        }
                    })
                    .collect();

                self.finish(mode, entries, total, now.timestamp())
            }
        }
    }

    fn finish(
        &self,
        mode: ScheduleMode,
        entries: Vec<ScheduleEntry>,
        total: usize,
        now: i64,
    ) -> Result<ScheduleCache, ScheduleError> {
        if entries.is_empty() {
            return Err(ScheduleError::NoValidEntries { dropped: total });
        }
        if entries.len() < total {
            warn!("{} of {total} schedule entries were invalid", total - entries.len());
        }
        Ok(ScheduleCache::fixed(mode, entries, now))
    }

    fn resolve_mode(&self, mode: Option<&str>) -> ScheduleMode {
        match mode {
            None => self.default_mode,
            Some(raw) => ScheduleMode::parse(raw).unwrap_or_else(|| {
                warn!(
                    "unknown schedule mode `{raw}`, using {}",
                    self.default_mode.as_str()
                );
                self.default_mode
            }),
        }
    }

    pub fn demo_cache(&self, now: i64) -> Result<ScheduleCache, ScheduleError> {
        let entries = self
            .demo
            .waypoints
            .iter()
            .map(|waypoint| {
                let value = Brightness::from_percent(
                    f64::from(waypoint.warm_pct),
                    f64::from(waypoint.cool_pct),
                );
                ScheduleEntry::new(
                    now + waypoint.offset_s,
                    value.warm,
                    value.cool,
                    waypoint.label.clone(),
                )
            })
            .collect();

        ScheduleCache::demo(entries, self.demo.cycle_duration_s, now)
    }

    /// Logs and returns the drift when the server clock disagrees with ours by
    /// more than the configured threshold. The local clock is left alone.
    pub fn clock_drift(&self, server_time: i64, local_time: i64) -> Option<i64> {
        let drift = local_time - server_time;
        if drift.abs() > self.drift_threshold_s {
            warn!(
                "clock drift of {drift}s against server time exceeds {}s",
                self.drift_threshold_s
            );
            Some(drift)
        } else {
            None
        }
    }

    pub fn needs_refresh(&self, now: i64) -> bool {
        let Some(last) = self.cache.entries().last() else {
            return true;
        };

        if now > last.unix_time.saturating_add(self.stale_threshold_s) {
            return true;
        }

        now - self.cache.last_fetch_time() > self.refresh_interval_s
    }

    pub fn cache(&self) -> &ScheduleCache {
        &self.cache
    }

    pub fn mode(&self) -> ScheduleMode {
        self.cache.mode()
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        self.cache.entries()
    }

    pub fn has_valid_schedule(&self) -> bool {
        !self.cache.is_empty()
    }

    pub fn last_fetch_time(&self) -> i64 {
        self.cache.last_fetch_time()
    }

    pub fn is_demo_mode(&self) -> bool {
        self.cache.is_demo()
    }

    pub fn demo_cycle_duration(&self) -> i64 {
        self.cache
            .cycle_duration()
            .unwrap_or(self.demo.cycle_duration_s)
    }
}

fn valid_percent(value: f64) -> bool {
    (0.0..=100.0).contains(&value)
}

fn parse_unified_entry(raw: Value) -> Result<ScheduleEntry, String> {
    let entry: UnifiedEntry = serde_json::from_value(raw).map_err(|err| err.to_string())?;

    let unix_time = entry.unix_time.ok_or("missing unixTime")?;
    let warm = entry.warm_brightness.ok_or("missing warmBrightness")?;
    let cool = entry.cool_brightness.ok_or("missing coolBrightness")?;
    if !valid_percent(warm) || !valid_percent(cool) {
        return Err(format!("brightness out of range: warm={warm}, cool={cool}"));
    }

    let value = Brightness::from_percent(warm, cool);
    Ok(ScheduleEntry::new(
        unix_time,
        value.warm,
        value.cool,
        entry.label.unwrap_or_default(),
    ))
}

/// Flattens the three legacy layouts into `(default label, raw entry)` pairs.
fn legacy_entries(
    entries: Option<Vec<Value>>,
    schedule: Option<Vec<Value>>,
    mut named: Map<String, Value>,
) -> Vec<(String, Value)> {
    if let Some(list) = entries.filter(|list| !list.is_empty()).or(schedule) {
        return list.into_iter().map(|raw| (String::new(), raw)).collect();
    }

    NAMED_KEYS
        .iter()
        .filter_map(|key| named.remove(*key).map(|raw| ((*key).to_string(), raw)))
        .collect()
}

fn parse_hhmm(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn parse_legacy_entry(
    raw: Value,
    default_label: &str,
    zone: FixedOffset,
    now: DateTime<Utc>,
) -> Result<ScheduleEntry, String> {
    let entry: LegacyEntry = serde_json::from_value(raw).map_err(|err| err.to_string())?;

    let time = entry.time.ok_or("missing time")?;
    let (hour, minute) = parse_hhmm(&time).ok_or_else(|| format!("invalid time `{time}`"))?;

    let warm = entry.warm.or(entry.warm_brightness).unwrap_or(0.0);
    let cool = entry.cool.or(entry.cool_brightness).unwrap_or(0.0);
    if !valid_percent(warm) || !valid_percent(cool) {
        return Err(format!("brightness out of range: warm={warm}, cool={cool}"));
    }

    let today = now.with_timezone(&zone).date_naive();
    let local = today
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| format!("invalid time `{time}`"))?;
    let unix_time = zone
        .from_local_datetime(&local)
        .single()
        .ok_or_else(|| format!("ambiguous local time `{time}`"))?
        .timestamp();

    let value = Brightness::from_percent(warm, cool);
    Ok(ScheduleEntry::new(
        unix_time,
        value.warm,
        value.cool,
        entry.label.unwrap_or_else(|| default_label.to_string()),
    ))
}
