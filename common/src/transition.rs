use crate::{
    error::LedError,
    led::LedSink,
    schedule::{ScheduleCache, ScheduleEntry},
    types::Brightness,
};

/// Turns the cached schedule into a target brightness for a point in time.
#[derive(Debug, Clone, Copy)]
pub struct TransitionEngine {
    night_light: Brightness,
}

impl TransitionEngine {
    pub fn new(night_light: Brightness) -> Self {
        Self { night_light }
    }

    pub fn night_light(&self) -> Brightness {
        self.night_light
    }

    /// `now` is Unix seconds with sub-second precision.
    pub fn current_target(&self, cache: &ScheduleCache, now: f64) -> Brightness {
        let entries = cache.entries();
        let target = match cache.cycle_duration() {
            Some(cycle) => interpolate_cycle(entries, cycle, now),
            None => interpolate(entries, now),
        };
        target.unwrap_or(self.night_light)
    }

    pub fn update<S: LedSink>(
        &self,
        cache: &ScheduleCache,
        now: f64,
        sink: &mut S,
    ) -> Result<Brightness, LedError> {
        let target = self.current_target(cache, now);
        sink.set(target)?;
        Ok(target)
    }
}

/// Linear interpolation over entries sorted by time. `None` when empty.
pub fn interpolate(entries: &[ScheduleEntry], now: f64) -> Option<Brightness> {
    let first = entries.first()?;
    let next_index = entries.partition_point(|entry| entry.unix_time as f64 <= now);

    let Some(next) = entries.get(next_index) else {
        return entries.last().map(ScheduleEntry::brightness);
    };
    if next_index == 0 {
        return Some(first.brightness());
    }

    let prev = run_start(entries, next_index - 1);
    Some(blend(prev, next, prev.unix_time as f64, next.unix_time as f64, now))
}

/// Interpolation for a looping schedule whose first entry marks the start of
/// a cycle `cycle_duration` seconds long.
pub fn interpolate_cycle(
    entries: &[ScheduleEntry],
    cycle_duration: i64,
    now: f64,
) -> Option<Brightness> {
    let first = entries.first()?;
    if cycle_duration <= 0 {
        return interpolate(entries, now);
    }

    let start = first.unix_time;
    let cycle = cycle_duration as f64;
    let cycle_time = (now - start as f64).rem_euclid(cycle);
    let offset = |entry: &ScheduleEntry| (entry.unix_time - start) as f64;

    let next_index = entries.partition_point(|entry| offset(entry) <= cycle_time);
    match entries.get(next_index) {
        // The first entry sits at offset zero, so `next_index` is at least one here.
        Some(next) => {
            let prev = run_start(entries, next_index.saturating_sub(1));
            Some(blend(prev, next, offset(prev), offset(next), cycle_time))
        }
        None => {
            let prev = run_start(entries, entries.len() - 1);
            Some(blend(prev, first, offset(prev), cycle, cycle_time))
        }
    }
}

/// First entry sharing the timestamp of `entries[index]`.
fn run_start(entries: &[ScheduleEntry], index: usize) -> &ScheduleEntry {
    let time = entries[index].unix_time;
    let start = entries[..index]
        .iter()
        .rposition(|entry| entry.unix_time != time)
        .map_or(0, |before| before + 1);
    &entries[start]
}

fn blend(
    prev: &ScheduleEntry,
    next: &ScheduleEntry,
    prev_time: f64,
    next_time: f64,
    now: f64,
) -> Brightness {
    let duration = next_time - prev_time;
    if duration <= 0.0 {
        return next.brightness();
    }
    let progress = ((now - prev_time) / duration).clamp(0.0, 1.0);
    prev.brightness().lerp(next.brightness(), progress)
}
