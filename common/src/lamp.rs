use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use log::{debug, error, info, warn};

use crate::{
    clock::Clock,
    config::LampConfig,
    error::{LedError, StartupError, TickError},
    led::LedSink,
    net::ConnectivityManager,
    platform::Platform,
    remote_log::RemoteLogger,
    schedule::ScheduleManager,
    transition::TransitionEngine,
    types::{Brightness, ControllerState, LampStatus, LogLevel},
};

/// Something driven at a fixed cadence by the runtime.
pub trait Tick {
    /// Runs one iteration. Never fails; problems are handled internally.
    fn tick(&mut self);

    /// Delay until the next call.
    fn interval(&self) -> Duration;
}

pub struct LampController<P: Platform> {
    net: ConnectivityManager<P>,
    schedule: ScheduleManager,
    engine: TransitionEngine,
    led: P::Led,
    logger: RemoteLogger,
    state: ControllerState,
    startup_complete: bool,
    offline_demo: bool,
    wifi_timeout: Duration,
    update_interval: Duration,
    demo_interval: Duration,
    resync_interval_s: i64,
    last_resync_attempt: Option<i64>,
}

impl<P: Platform> LampController<P> {
    pub fn new(config: &LampConfig, net: ConnectivityManager<P>, led: P::Led) -> Self {
        Self {
            net,
            schedule: ScheduleManager::new(config),
            engine: TransitionEngine::new(config.night_light.brightness()),
            led,
            logger: RemoteLogger::new(config),
            state: ControllerState::Booting,
            startup_complete: false,
            offline_demo: false,
            wifi_timeout: config.wifi_timeout(),
            update_interval: Duration::from_millis(config.timing.update_interval_ms),
            demo_interval: Duration::from_millis(config.timing.demo_update_interval_ms),
            resync_interval_s: config.timing.resync_interval_s,
            last_resync_attempt: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_startup_complete(&self) -> bool {
        self.startup_complete
    }

    pub fn schedule(&self) -> &ScheduleManager {
        &self.schedule
    }

    pub fn led(&self) -> &P::Led {
        &self.led
    }

    pub fn net(&self) -> &ConnectivityManager<P> {
        &self.net
    }

    /// Boot sequence. Any failing phase leaves the lamp on the night light in
    /// `NightLightFallback`; ticks take over recovery from there.
    pub fn startup(&mut self) -> Result<(), StartupError> {
        let result = self.run_startup();
        if let Err(err) = &result {
            self.report(LogLevel::Error, &format!("startup failed: {err}"));
            self.enter_fallback();
        }
        result
    }

    fn run_startup(&mut self) -> Result<(), StartupError> {
        self.state = ControllerState::Booting;

        info!("startup 1/5: night light");
        self.led
            .set(self.engine.night_light())
            .map_err(StartupError::Output)?;

        info!("startup 2/5: connecting to wifi");
        self.last_resync_attempt = Some(self.net.clock().unix_now());
        self.net
            .connect(self.wifi_timeout)
            .map_err(StartupError::Association)?;
        self.report(LogLevel::Info, "wifi connected");

        info!("startup 3/5: syncing clock");
        let synced = self.net.sync_time().map_err(StartupError::TimeSync)?;
        self.report(LogLevel::Info, &format!("clock synced to {synced}"));

        info!("startup 4/5: fetching schedule");
        let entries = self
            .schedule
            .fetch(&mut self.net)
            .map_err(StartupError::Schedule)?;
        self.report(
            LogLevel::Info,
            &format!(
                "schedule loaded: {entries} entries, mode={}",
                self.schedule.mode().as_str()
            ),
        );

        info!("startup 5/5: applying schedule");
        self.apply_schedule().map_err(StartupError::Output)?;
        self.startup_complete = true;
        self.report(
            LogLevel::Info,
            &format!("startup complete, state={}", self.state.as_str()),
        );
        Ok(())
    }

    /// Runs the built-in demo cycle without touching the network.
    pub fn start_demo(&mut self) -> Result<(), StartupError> {
        self.offline_demo = true;
        self.state = ControllerState::Booting;
        info!("starting offline demo");

        let now = self.net.clock().unix_now();
        let result = self
            .schedule
            .load_demo(now)
            .map_err(StartupError::Schedule)
            .and_then(|()| {
                self.apply_schedule()
                    .map(|_| ())
                    .map_err(StartupError::Output)
            });

        match result {
            Ok(()) => {
                self.startup_complete = true;
                Ok(())
            }
            Err(err) => {
                error!("offline demo failed to start: {err}");
                self.enter_fallback();
                Err(err)
            }
        }
    }

    /// One tick without the panic guard. `tick` wraps this.
    pub fn try_tick(&mut self) -> Result<Brightness, TickError> {
        if self.offline_demo {
            let now = self.net.clock().unix_now();
            if self.schedule.needs_refresh(now) {
                debug!("regenerating demo schedule");
                if let Err(err) = self.schedule.load_demo(now) {
                    warn!("demo schedule regeneration failed: {err}");
                }
            }
        } else {
            if !self.net.is_time_synced() {
                self.recover_clock();
            }
            if !self.net.is_time_synced() {
                let night = self.engine.night_light();
                self.led.set(night)?;
                self.state = ControllerState::NightLightFallback;
                return Ok(night);
            }

            if self.schedule.needs_refresh(self.net.clock().unix_now()) {
                self.refresh_schedule();
            }
        }

        let target = self.apply_schedule()?;
        Ok(target)
    }

    pub fn shutdown(&mut self) -> Result<(), LedError> {
        info!("shutting down, turning leds off");
        self.led.off()
    }

    pub fn status(&self) -> LampStatus {
        let current = self.led.brightness();
        let connection = self.net.state();
        LampStatus {
            state: self.state.as_str(),
            warm: current.warm,
            cool: current.cool,
            mode: self.schedule.mode().as_str(),
            entries: self.schedule.entries().len(),
            last_fetch_time: self.schedule.last_fetch_time(),
            time_synced: connection.time_synced,
            connected: connection.associated,
            startup_complete: self.startup_complete,
        }
    }

    fn apply_schedule(&mut self) -> Result<Brightness, LedError> {
        let now = self.net.clock().unix_now_f64();
        let target = self
            .engine
            .update(self.schedule.cache(), now, &mut self.led)?;

        let next = if self.schedule.is_demo_mode() {
            ControllerState::DemoLooping
        } else if self.schedule.has_valid_schedule() {
            ControllerState::Running
        } else {
            ControllerState::NightLightFallback
        };
        if next != self.state {
            info!("state {} -> {}", self.state.as_str(), next.as_str());
        }
        self.state = next;
        Ok(target)
    }

    fn refresh_schedule(&mut self) {
        if let Err(err) = self.net.ensure_connected(self.wifi_timeout) {
            warn!("reconnect failed, keeping cached schedule: {err}");
            return;
        }

        match self.schedule.fetch(&mut self.net) {
            Ok(entries) => debug!("schedule refreshed with {entries} entries"),
            Err(err) => self.report(
                LogLevel::Warn,
                &format!("schedule refresh failed, keeping cached schedule: {err}"),
            ),
        }
    }

    fn recover_clock(&mut self) {
        let now = self.net.clock().unix_now();
        if let Some(last) = self.last_resync_attempt {
            if now - last < self.resync_interval_s {
                return;
            }
        }
        self.last_resync_attempt = Some(now);

        if let Err(err) = self.net.ensure_connected(self.wifi_timeout) {
            warn!("clock recovery: wifi unavailable: {err}");
            return;
        }
        match self.net.sync_time() {
            Ok(unix) => self.report(LogLevel::Info, &format!("clock recovered, now {unix}")),
            Err(err) => warn!("clock recovery: {err}"),
        }
    }

    fn enter_fallback(&mut self) {
        if let Err(err) = self.led.set(self.engine.night_light()) {
            error!("night light unavailable: {err}");
        }
        if self.state != ControllerState::NightLightFallback {
            warn!("state {} -> NIGHT_LIGHT_FALLBACK", self.state.as_str());
        }
        self.state = ControllerState::NightLightFallback;
    }

    fn report(&mut self, level: LogLevel, message: &str) {
        self.logger.emit(&mut self.net, level, message);
    }
}

impl<P: Platform> Tick for LampController<P> {
    fn tick(&mut self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_tick()));
        let err = match outcome {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => err,
            Err(payload) => TickError::Panicked(panic_message(payload.as_ref())),
        };

        self.report(LogLevel::Error, &format!("tick failed: {err}"));
        self.enter_fallback();
    }

    fn interval(&self) -> Duration {
        if self.state == ControllerState::DemoLooping {
            self.demo_interval
        } else {
            self.update_interval
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        error::{NetError, ScheduleError},
        testing::{ntp_reply, FakeHttp, FakeLed, FakeNtp, FakePlatform, FakeRadio, ManualClock, T0},
        types::ScheduleMode,
    };

    const NIGHT: Brightness = Brightness {
        warm: 0.25,
        cool: 0.0,
    };

    struct Rig {
        radio: FakeRadio,
        http: FakeHttp,
        ntp: FakeNtp,
        clock: ManualClock,
        led: FakeLed,
        lamp: LampController<FakePlatform>,
    }

    fn rig(radio: FakeRadio, http: FakeHttp, ntp: FakeNtp) -> Rig {
        let config = LampConfig::default();
        let clock = ManualClock::at(T0);
        let led = FakeLed::default();
        let net = ConnectivityManager::new(
            &config,
            radio.clone(),
            http.clone(),
            ntp.clone(),
            clock.clone(),
        );
        let lamp = LampController::new(&config, net, led.clone());
        Rig {
            radio,
            http,
            ntp,
            clock,
            led,
            lamp,
        }
    }

    fn working_ntp() -> FakeNtp {
        FakeNtp::default().reply("pool.ntp.org", ntp_reply(T0))
    }

    fn sunrise_body() -> String {
        json!({
            "mode": "scheduled",
            "serverTime": T0,
            "brightnessSchedule": [
                { "unixTime": T0 - 1_800, "warmBrightness": 20, "coolBrightness": 0, "label": "dawn" },
                { "unixTime": T0 + 1_800, "warmBrightness": 100, "coolBrightness": 100, "label": "day" },
            ]
        })
        .to_string()
    }

    fn assert_close(actual: Brightness, warm: f64, cool: f64) {
        assert!(
            (actual.warm - warm).abs() < 1e-4 && (actual.cool - cool).abs() < 1e-4,
            "expected ({warm}, {cool}), got {actual:?}"
        );
    }

    fn running_rig() -> Rig {
        let mut rig = rig(
            FakeRadio::associated(),
            FakeHttp::default().respond(200, &sunrise_body()),
            working_ntp(),
        );
        rig.lamp.startup().unwrap();
        rig
    }

    #[test]
    fn startup_runs_all_phases_into_running() {
        let rig = running_rig();

        assert_eq!(rig.lamp.state(), ControllerState::Running);
        assert!(rig.lamp.is_startup_complete());
        assert_eq!(rig.led.history()[0], NIGHT);
        assert_close(rig.led.current(), 0.6, 0.5);
        assert_eq!(rig.lamp.interval(), Duration::from_secs(5));
    }

    #[test]
    fn association_failure_falls_back_without_network_traffic() {
        let mut rig = rig(FakeRadio::refusing(), FakeHttp::default(), working_ntp());

        let result = rig.lamp.startup();

        assert!(matches!(result, Err(StartupError::Association(NetError::Radio(_)))));
        assert_eq!(rig.lamp.state(), ControllerState::NightLightFallback);
        assert!(!rig.lamp.is_startup_complete());
        assert!(rig.led.history().iter().all(|value| *value == NIGHT));
        assert!(rig.http.requests().is_empty());
        assert!(rig.ntp.queried().is_empty());
    }

    #[test]
    fn schedule_failure_at_startup_recovers_on_next_tick() {
        let mut rig = rig(
            FakeRadio::associated(),
            FakeHttp::default()
                .respond(500, "")
                .respond(500, "")
                .respond(500, ""),
            working_ntp(),
        );

        let result = rig.lamp.startup();
        assert!(matches!(result, Err(StartupError::Schedule(ScheduleError::Fetch(_)))));
        assert_eq!(rig.lamp.state(), ControllerState::NightLightFallback);
        assert_eq!(rig.led.current(), NIGHT);

        rig.http.enqueue(200, &sunrise_body());
        rig.lamp.tick();

        assert_eq!(rig.lamp.state(), ControllerState::Running);
        assert_eq!(rig.lamp.schedule().entries().len(), 2);
    }

    #[test]
    fn unsynced_clock_holds_night_light_until_resync_succeeds() {
        let mut rig = rig(
            FakeRadio::associated(),
            FakeHttp::default(),
            FakeNtp::default(),
        );

        let result = rig.lamp.startup();
        assert!(matches!(result, Err(StartupError::TimeSync(NetError::NtpExhausted { servers: 3 }))));
        assert_eq!(rig.ntp.queried().len(), 3);

        // Inside the resync interval nothing is retried and nothing is fetched.
        rig.lamp.tick();
        assert_eq!(rig.ntp.queried().len(), 3);
        assert!(rig.http.requests().is_empty());
        assert_eq!(rig.lamp.state(), ControllerState::NightLightFallback);
        assert_eq!(rig.led.current(), NIGHT);

        rig.ntp.set_reply("pool.ntp.org", ntp_reply(T0 + 120));
        rig.http.enqueue(200, &sunrise_body());
        rig.clock.advance(Duration::from_secs(61));
        rig.lamp.tick();

        assert!(rig.lamp.net().is_time_synced());
        assert_eq!(rig.lamp.state(), ControllerState::Running);
        assert_eq!(rig.http.requests().len(), 1);
    }

    #[test]
    fn failed_refresh_keeps_stale_schedule() {
        let mut rig = running_rig();
        let before = rig.lamp.schedule().cache().clone();

        rig.clock.advance(Duration::from_secs(6 * 3_600 + 1));
        rig.lamp.tick();

        assert_eq!(rig.http.requests().len(), 1 + 3);
        assert_eq!(rig.lamp.schedule().cache(), &before);
        assert_eq!(rig.lamp.state(), ControllerState::Running);
        assert_close(rig.led.current(), 1.0, 1.0);
    }

    #[test]
    fn refresh_reconnects_dropped_wifi_first() {
        let mut rig = running_rig();
        rig.radio.drop_link();
        rig.http.enqueue(200, &sunrise_body());

        rig.clock.advance(Duration::from_secs(6 * 3_600 + 1));
        rig.lamp.tick();

        assert_eq!(rig.radio.association_attempts(), 1);
        assert_eq!(rig.lamp.schedule().last_fetch_time(), T0 + 6 * 3_600 + 1);
    }

    #[test]
    fn unreachable_network_keeps_interpolating_stale_schedule() {
        let body = json!({
            "mode": "scheduled",
            "brightnessSchedule": [
                { "unixTime": T0 - 1_800, "warmBrightness": 20, "coolBrightness": 0 },
                { "unixTime": T0 + 43_200, "warmBrightness": 100, "coolBrightness": 100 },
            ]
        })
        .to_string();
        let mut rig = rig(
            FakeRadio::associated(),
            FakeHttp::default().respond(200, &body),
            working_ntp(),
        );
        rig.lamp.startup().unwrap();
        let before = rig.lamp.schedule().cache().clone();
        rig.radio.lose_signal();

        rig.clock.advance(Duration::from_secs(6 * 3_600 + 1));
        rig.lamp.tick();

        assert_eq!(rig.http.requests().len(), 1);
        assert_eq!(rig.lamp.schedule().cache(), &before);
        assert_eq!(rig.lamp.state(), ControllerState::Running);
        let expected = TransitionEngine::new(NIGHT)
            .current_target(rig.lamp.schedule().cache(), rig.clock.unix_now_f64());
        assert_close(rig.led.current(), expected.warm, expected.cool);
        assert!(expected.warm > 0.2 && expected.warm < 1.0);

        rig.radio.restore();
        rig.http.enqueue(200, &body);
        rig.lamp.tick();

        assert_eq!(rig.http.requests().len(), 2);
        assert_eq!(rig.lamp.schedule().last_fetch_time(), rig.clock.unix_now());
    }

    #[test]
    fn led_error_during_tick_forces_fallback_then_recovers() {
        let mut rig = running_rig();

        rig.led.fail_next(1);
        rig.lamp.tick();
        assert_eq!(rig.lamp.state(), ControllerState::NightLightFallback);
        assert_eq!(rig.led.current(), NIGHT);

        rig.lamp.tick();
        assert_eq!(rig.lamp.state(), ControllerState::Running);
    }

    #[test]
    fn panic_during_tick_is_contained() {
        let mut rig = running_rig();

        rig.led.panic_next();
        rig.lamp.tick();

        assert_eq!(rig.lamp.state(), ControllerState::NightLightFallback);
        assert_eq!(rig.led.current(), NIGHT);
    }

    #[test]
    fn demo_mode_from_server_loops_fast() {
        let body = json!({ "mode": "demo", "brightnessSchedule": [] }).to_string();
        let mut rig = rig(
            FakeRadio::associated(),
            FakeHttp::default().respond(200, &body),
            working_ntp(),
        );

        rig.lamp.startup().unwrap();

        assert_eq!(rig.lamp.state(), ControllerState::DemoLooping);
        assert_eq!(rig.lamp.interval(), Duration::from_millis(50));
        assert_eq!(rig.lamp.schedule().mode(), ScheduleMode::Demo);
    }

    #[test]
    fn offline_demo_never_touches_network() {
        let mut rig = rig(FakeRadio::never_associates(), FakeHttp::default(), FakeNtp::default());

        rig.lamp.start_demo().unwrap();
        assert_eq!(rig.lamp.state(), ControllerState::DemoLooping);
        assert_close(rig.led.current(), 0.1, 0.0);

        rig.clock.advance(Duration::from_secs(7));
        rig.lamp.tick();
        assert_eq!(rig.lamp.state(), ControllerState::DemoLooping);
        assert_close(rig.led.current(), 0.95, 0.9);

        rig.clock.advance(Duration::from_secs(4_000));
        rig.lamp.tick();
        assert_eq!(rig.lamp.schedule().last_fetch_time(), T0 + 4_007);

        assert_eq!(rig.radio.association_attempts(), 0);
        assert!(rig.http.requests().is_empty());
        assert!(rig.ntp.queried().is_empty());
    }

    #[test]
    fn shutdown_turns_leds_off() {
        let mut rig = running_rig();

        rig.lamp.shutdown().unwrap();

        assert_eq!(rig.led.current(), Brightness::OFF);
    }

    #[test]
    fn status_reflects_controller() {
        let rig = running_rig();

        let status = rig.lamp.status();

        assert_eq!(status.state, "RUNNING");
        assert_eq!(status.mode, "scheduled");
        assert_eq!(status.entries, 2);
        assert_eq!(status.last_fetch_time, T0);
        assert!(status.time_synced && status.connected && status.startup_complete);
        assert_close(Brightness::new(status.warm, status.cool), 0.6, 0.5);
    }
}
