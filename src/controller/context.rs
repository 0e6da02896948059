//! Per-session autofocus state and the per-frame state machine.
//!
//! Everything here runs under the session lock; nothing blocks. Effects that
//! cross threads (shot-check answers, re-queued commands, events) are
//! collected in [`FrameEffects`] and delivered by the handle after the lock is
//! released.

use super::commands::{AfmCommand, SocCommand};
use super::shot::{raw_log_check, SharpnessHistory, ShotMode};
use crate::config::{AfConfig, FallbackPosition};
use crate::errors::AfError;
use crate::lens::{AfmWindowQuery, LensActuator, MotoDriveInfo, MotoDriveKind};
use crate::search::{relative_delta, SearchContext};
use crate::timing::FrameIntervalCalibration;
use crate::types::{
    AfEvent, AfState, AfStatus, AfmMeasurement, AfmWindow, AfmWindowId, FrameStatus,
    LockOutcome, SearchState, SearchStatus, SearchStrategy,
};

/// Side effects of one frame.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct FrameEffects {
    pub events: Vec<AfEvent>,
    /// Shot-check answer to post, with the ticket it answers.
    pub ack: Option<(u64, bool)>,
    /// Command to put back on the queue for the next frame.
    pub requeue: Option<AfmCommand>,
}

/// Where a control request has to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Frame(AfmCommand),
    Soc(SocCommand),
    Nowhere,
}

pub(crate) struct AfContext {
    config: AfConfig,
    state: AfState,
    state_before_lock: AfState,
    strategy: Option<SearchStrategy>,
    search: SearchContext,
    lens: Option<Box<dyn LensActuator>>,
    windows: Option<Box<dyn AfmWindowQuery>>,
    soc: bool,
    moto: MotoDriveInfo,
    lens_pos: i32,

    /// Sharpness at focus time, the reference for drift checks.
    sharpness: f32,
    old_sharpness: f32,
    history: SharpnessHistory,
    calibration: FrameIntervalCalibration,

    vcm_move_idx: u32,
    vcm_move_frames: u32,
    afm_cnt: u32,
    afm_inval: u32,
    one_shot_wait: u32,

    measure_window: AfmWindow,
    window_changed: bool,
    machine_moved: bool,
    stable_frames: u32,
    track_notify: bool,
    move_notified: bool,

    actuation_failures: u32,
}

impl AfContext {
    pub fn new(config: AfConfig) -> Self {
        let search = SearchContext::new(&config.search);
        let afm_inval = config.engine.afm_warmup_frames;
        Self {
            config,
            state: AfState::Initialized,
            state_before_lock: AfState::Initialized,
            strategy: None,
            search,
            lens: None,
            windows: None,
            soc: false,
            moto: MotoDriveInfo {
                max_focus: 0,
                full_travel_ms: 0,
            },
            lens_pos: 0,
            sharpness: 0.0,
            old_sharpness: 0.0,
            history: SharpnessHistory::default(),
            calibration: FrameIntervalCalibration::default(),
            vcm_move_idx: 0,
            vcm_move_frames: 0,
            afm_cnt: 0,
            afm_inval,
            one_shot_wait: 0,
            measure_window: AfmWindow::default(),
            window_changed: false,
            machine_moved: false,
            stable_frames: 0,
            track_notify: false,
            move_notified: false,
            actuation_failures: 0,
        }
    }

    pub fn state(&self) -> AfState {
        self.state
    }

    pub fn is_soc(&self) -> bool {
        self.soc
    }

    pub fn lens_position(&self) -> i32 {
        self.lens_pos
    }

    pub fn search(&self) -> &SearchContext {
        &self.search
    }

    pub fn frame_interval_ms(&self) -> u32 {
        self.calibration.interval_ms()
    }

    pub fn configure(
        &mut self,
        mut lens: Box<dyn LensActuator>,
        windows: Box<dyn AfmWindowQuery>,
        strategy: SearchStrategy,
    ) -> Result<MotoDriveKind, AfError> {
        if !matches!(self.state, AfState::Initialized | AfState::Stopped) {
            return Err(AfError::wrong_state("configure", self.state));
        }

        let kind = lens.init_moto_drive()?;
        self.windows = Some(windows);
        self.strategy = Some(strategy);

        if kind == MotoDriveKind::Soc {
            log::info!("sensor runs autofocus on-board, routing commands to it");
            self.soc = true;
            self.lens = Some(lens);
            return Ok(kind);
        }

        self.soc = false;
        self.moto = lens.setup_moto_drive()?;
        self.lens_pos = lens.focus_get()? as i32;
        self.lens = Some(lens);
        self.arm_search(strategy)?;

        log::info!(
            "configured {} search over 0..={}, lens at {}",
            strategy.as_str(),
            self.moto.max_focus,
            self.lens_pos
        );
        Ok(kind)
    }

    pub fn reset(&mut self, strategy: SearchStrategy) -> Result<(), AfError> {
        if matches!(self.state, AfState::Running | AfState::Locked) {
            return Err(AfError::wrong_state("reset", self.state));
        }

        self.strategy = Some(strategy);
        if self.soc {
            return Ok(());
        }

        let lens = self
            .lens
            .as_mut()
            .ok_or_else(|| AfError::WrongConfig("reset before configure".into()))?;
        self.moto = lens.setup_moto_drive()?;
        self.lens_pos = lens.focus_get()? as i32;
        self.calibration.reset();
        self.arm_search(strategy)?;

        self.history.clear();
        self.vcm_move_idx = 0;
        self.vcm_move_frames = 0;
        self.one_shot_wait = 0;
        self.window_changed = false;
        self.machine_moved = false;
        self.stable_frames = 0;
        self.state = AfState::Stopped;

        log::debug!(
            "reset to {} search, full travel {} ms",
            strategy.as_str(),
            self.moto.full_travel_ms
        );
        Ok(())
    }

    pub fn reconfigure(&self) -> Result<(), AfError> {
        match self.state {
            AfState::Locked | AfState::Running | AfState::Stopped => Ok(()),
            state => Err(AfError::wrong_state("reconfigure", state)),
        }
    }

    pub fn start(&self, strategy: SearchStrategy) -> Result<Route, AfError> {
        if matches!(self.state, AfState::Running | AfState::Locked) {
            return Err(AfError::wrong_state("start", self.state));
        }
        self.require_strategy("start", strategy)?;
        Ok(Route::Frame(AfmCommand::Tracking))
    }

    pub fn one_shot(&self, strategy: SearchStrategy) -> Result<Route, AfError> {
        if matches!(
            self.state,
            AfState::Running | AfState::Locked | AfState::DownloadingFirmware
        ) {
            return Err(AfError::wrong_state("one_shot", self.state));
        }
        if self.soc {
            return Ok(Route::Soc(SocCommand::Focus));
        }
        self.require_strategy("one_shot", strategy)?;
        Ok(Route::Frame(AfmCommand::OneShot))
    }

    pub fn stop(&self) -> Result<Route, AfError> {
        match self.state {
            AfState::Locked => Err(AfError::wrong_state("stop", self.state)),
            AfState::Running | AfState::Tracking | AfState::DownloadingFirmware => {
                if self.soc {
                    Ok(Route::Soc(SocCommand::Stop))
                } else {
                    Ok(Route::Frame(AfmCommand::Stop))
                }
            }
            state => {
                log::debug!("stop ignored while {:?}", state);
                Ok(Route::Nowhere)
            }
        }
    }

    pub fn try_lock(&mut self) -> Result<LockOutcome, AfError> {
        match self.state {
            AfState::Running => Ok(LockOutcome::Pending),
            AfState::Stopped | AfState::Tracking => {
                if !self.settled() {
                    return Ok(LockOutcome::Pending);
                }
                self.state_before_lock = self.state;
                self.state = AfState::Locked;
                Ok(LockOutcome::Locked)
            }
            state => Err(AfError::wrong_state("try_lock", state)),
        }
    }

    pub fn unlock(&mut self) -> Result<(), AfError> {
        match self.state {
            AfState::Locked => {
                self.state = self.state_before_lock;
                Ok(())
            }
            state => Err(AfError::wrong_state("unlock", state)),
        }
    }

    pub fn status(&self) -> AfStatus {
        AfStatus {
            running: matches!(self.state, AfState::Running | AfState::Locked),
            strategy: self.strategy,
            sharpness: self.sharpness,
        }
    }

    pub fn settled(&self) -> bool {
        matches!(self.state, AfState::Stopped | AfState::Tracking)
            && self.search.state() == SearchState::FocusFound
    }

    pub fn measure_restart(&mut self) {
        self.afm_cnt = 0;
        self.afm_inval = self.config.engine.afm_warmup_frames;
        self.calibration.reset();
    }

    /// Hand the lens to the on-board autofocus worker, entering `state`.
    pub fn lend_lens(&mut self, state: AfState) -> Option<Box<dyn LensActuator>> {
        self.state = state;
        self.lens.take()
    }

    pub fn return_lens(&mut self, lens: Option<Box<dyn LensActuator>>, state: AfState) {
        if lens.is_some() {
            self.lens = lens;
        }
        self.state = state;
    }

    pub fn set_state(&mut self, state: AfState) {
        self.state = state;
    }

    pub fn release_collaborators(&mut self) {
        self.lens = None;
        self.windows = None;
        self.search.init(0, 0);
        self.state = AfState::Invalid;
    }

    /// Normalised sharpness of the first enabled window with light in it.
    pub fn single_sharpness(&self, measurement: &AfmMeasurement) -> f32 {
        let Some(windows) = self.windows.as_ref() else {
            return f32::MAX;
        };
        AfmWindowId::ALL
            .iter()
            .map(|&id| (id, measurement.window(id)))
            .find(|(id, result)| windows.is_window_enabled(*id) && result.luminance != 0)
            .map(|(_, result)| {
                let l = result.mean_luminance();
                if l > f32::EPSILON {
                    result.sharpness as f32 / (l * l)
                } else {
                    f32::MAX
                }
            })
            .unwrap_or(f32::MAX)
    }

    /// Geometry of the first enabled window.
    pub fn measurement_window(&self, measurement: &AfmMeasurement) -> Option<AfmWindow> {
        let windows = self.windows.as_ref()?;
        AfmWindowId::ALL
            .iter()
            .find(|&&id| windows.is_window_enabled(id))
            .map(|&id| measurement.window(id).window)
    }

    pub fn process_frame(
        &mut self,
        measurement: &AfmMeasurement,
        command: Option<AfmCommand>,
        now_us: u64,
        effects: &mut FrameEffects,
    ) -> Result<FrameStatus, AfError> {
        if self.soc {
            return Ok(FrameStatus::Canceled);
        }
        if self.strategy.is_none() {
            return Err(AfError::WrongConfig("no search strategy configured".into()));
        }

        self.calibration.on_frame(now_us);
        let cur = self.single_sharpness(measurement);
        let window = self.measurement_window(measurement);

        match command {
            Some(AfmCommand::Tracking) => {
                log::debug!("received command: tracking");
                self.afm_cnt = 0;
                self.afm_inval = self.config.engine.afm_warmup_frames;
                self.history.clear();
                if let Some(window) = window {
                    self.measure_window = window;
                }
                self.state = AfState::Tracking;
            }
            Some(AfmCommand::Stop) => {
                log::debug!("received command: stop");
                self.state = AfState::Stopped;
            }
            Some(AfmCommand::ShotCheck(ticket)) => {
                let shot = self.shot_ready(cur);
                log::debug!("received command: shot check {} -> {}", ticket, shot);
                effects.ack = Some((ticket, shot));
            }
            Some(AfmCommand::OneShot) | None => {}
        }

        if self.vcm_move_idx < self.vcm_move_frames {
            self.vcm_move_idx += 1;
            if command == Some(AfmCommand::OneShot) {
                log::debug!("lens still settling, one-shot deferred to the next frame");
                effects.requeue = Some(AfmCommand::OneShot);
            }
            return Ok(FrameStatus::Canceled);
        }

        if command == Some(AfmCommand::OneShot) {
            log::debug!("received command: one-shot");
            self.restart_search(cur, effects)?;
            self.afm_cnt = self.afm_inval;
            self.state = AfState::Running;
            return Ok(FrameStatus::Success);
        }

        if self.afm_cnt < self.afm_inval {
            self.afm_cnt += 1;
            log::trace!("warm-up frame {}/{}", self.afm_cnt, self.afm_inval);
            return Ok(FrameStatus::Canceled);
        }

        let d = relative_delta(self.old_sharpness, cur).abs();
        self.old_sharpness = cur;
        self.history.push(d);

        if self.search.state().is_active() {
            let status = self.searching(cur, effects)?;
            if self.search.state() == SearchState::FocusFound {
                self.history.clear();
            }
            if status == FrameStatus::Pending {
                self.search.path().log_dump(self.lens_pos);
            }
            return Ok(status);
        }
        self.vcm_move_idx = self.vcm_move_frames + 1;

        match self.state {
            AfState::Tracking => {
                self.track(cur, d, window, effects)?;
                Ok(FrameStatus::Success)
            }
            AfState::Stopped => {
                self.judge_one_shot(cur, window, effects);
                Ok(FrameStatus::Canceled)
            }
            _ => Ok(FrameStatus::Success),
        }
    }

    fn require_strategy(&self, operation: &str, requested: SearchStrategy) -> Result<(), AfError> {
        match self.strategy {
            None => Err(AfError::WrongConfig(format!(
                "{}: no search strategy configured",
                operation
            ))),
            Some(configured) if configured != requested => Err(AfError::WrongConfig(format!(
                "{}: {} requested but {} is configured, reset first",
                operation,
                requested.as_str(),
                configured.as_str()
            ))),
            Some(_) => Ok(()),
        }
    }

    fn arm_search(&mut self, strategy: SearchStrategy) -> Result<(), AfError> {
        let max = self.moto.max_focus as i32;
        match strategy {
            SearchStrategy::AdaptiveRange => self.search.init_with_path(0, max),
            SearchStrategy::FullRange | SearchStrategy::HillClimbing => {
                self.search.init(0, max);
                Ok(())
            }
        }
    }

    fn frame_interval_or_fallback(&self) -> u32 {
        self.calibration
            .interval_or(self.config.engine.fallback_frame_interval_ms)
    }

    /// Command the lens and arm the settle counter for the distance moved.
    fn move_lens(&mut self, target: i32) -> Result<(), AfError> {
        let position = u32::try_from(target)
            .map_err(|_| AfError::invalid_parameter(format!("lens position {}", target)))?;
        let lens = self
            .lens
            .as_mut()
            .ok_or_else(|| AfError::WrongConfig("no lens actuator".into()))?;
        lens.focus_set(position)?;

        let distance = (target - self.lens_pos).unsigned_abs();
        let interval = self.frame_interval_or_fallback();
        self.vcm_move_idx = 0;
        self.vcm_move_frames = self.moto.settle_frames(distance, interval);
        log::debug!(
            "lens {} -> {}, frame interval {} ms, {} frame(s) to settle",
            self.lens_pos,
            target,
            interval,
            self.vcm_move_frames
        );
        self.lens_pos = target;
        Ok(())
    }

    /// [`move_lens`](Self::move_lens) with failure bookkeeping; false when
    /// the lens did not accept the move.
    fn actuate(&mut self, target: i32, effects: &mut FrameEffects) -> bool {
        match self.move_lens(target) {
            Ok(()) => {
                self.actuation_failures = 0;
                true
            }
            Err(e) => {
                self.actuation_failures = self.actuation_failures.saturating_add(1);
                log::error!(
                    "failed to move lens to {} ({} in a row): {}",
                    target,
                    self.actuation_failures,
                    e
                );
                if self.actuation_failures == self.config.engine.stall_report_after {
                    effects.events.push(AfEvent::AutofocusStalled {
                        failures: self.actuation_failures,
                    });
                }
                false
            }
        }
    }

    fn restart_search(&mut self, cur: f32, effects: &mut FrameEffects) -> Result<(), AfError> {
        let strategy = self
            .strategy
            .ok_or_else(|| AfError::WrongConfig("no search strategy configured".into()))?;
        let lens = self
            .lens
            .as_mut()
            .ok_or_else(|| AfError::WrongConfig("no lens actuator".into()))?;
        self.lens_pos = lens.focus_get()? as i32;
        self.move_notified = false;

        if let Some(target) = self.search.restart(strategy, self.lens_pos, cur)? {
            self.actuate(target, effects);
        }
        Ok(())
    }

    fn fallback_position(&self) -> i32 {
        let max = self.moto.max_focus as i32;
        match self.config.search.low_sharpness_fallback {
            FallbackPosition::MaxFocus => max,
            FallbackPosition::MinFocus => 0,
            FallbackPosition::Position(pos) => (pos as i32).clamp(0, max),
        }
    }

    fn searching(&mut self, cur: f32, effects: &mut FrameEffects) -> Result<FrameStatus, AfError> {
        let strategy = self
            .strategy
            .ok_or_else(|| AfError::WrongConfig("no search strategy configured".into()))?;
        let tracking = match self.state {
            AfState::Running => false,
            AfState::Tracking => true,
            _ => return Ok(FrameStatus::Success),
        };

        let mut target = self.lens_pos;
        match self.search.search(strategy, cur, &mut target)? {
            SearchStatus::Pending => {
                if target != self.lens_pos {
                    if !self.actuate(target, effects) {
                        return Ok(FrameStatus::Success);
                    }
                    if tracking
                        && self.track_notify
                        && !self.move_notified
                        && self.search.step().abs() != 1
                    {
                        self.move_notified = true;
                        effects.events.push(AfEvent::AutofocusMove { start: true });
                    }
                }
                Ok(FrameStatus::Pending)
            }
            SearchStatus::Success if self.search.state() == SearchState::FocusFound => {
                let best = self.search.max_sharpness();
                if best <= self.config.search.sharpness_min {
                    target = self.fallback_position();
                    log::info!(
                        "best sharpness {} is below {}, falling back to lens position {}",
                        best,
                        self.config.search.sharpness_min,
                        target
                    );
                }
                if !self.actuate(target, effects) {
                    return Ok(FrameStatus::Success);
                }
                self.sharpness = best;

                if tracking {
                    if self.track_notify {
                        effects.events.push(AfEvent::AutofocusMove { start: false });
                    }
                } else {
                    self.state = AfState::Stopped;
                    self.one_shot_wait = self.config.shot_check.one_shot_wait_frames;
                }
                log::info!("focus found at lens position {} (sharpness {})", target, best);
                Ok(FrameStatus::Success)
            }
            SearchStatus::Success => {
                if !tracking {
                    self.one_shot_wait = 0;
                }
                Ok(FrameStatus::Success)
            }
        }
    }

    /// Watch a focused scene for motion or a new measuring window and
    /// restart the search once the scene has been still long enough.
    fn track(
        &mut self,
        cur: f32,
        d: f32,
        window: Option<AfmWindow>,
        effects: &mut FrameEffects,
    ) -> Result<(), AfError> {
        let found = self.search.state() == SearchState::FocusFound;
        if found && self.history.pushed() == 1 {
            self.sharpness = cur;
        }

        match window {
            Some(window) if window != self.measure_window => {
                log::debug!("measuring window changed to {:?}", window);
                self.window_changed = true;
                self.stable_frames = 0;
                self.measure_window = window;
            }
            _ => {
                let settling = found && self.history.pushed() <= 3;
                if !settling
                    && !self.machine_moved
                    && d > self.config.tracking.scene_change_threshold
                {
                    log::debug!("scene moved (sharpness delta {:.3})", d);
                    self.machine_moved = true;
                    self.stable_frames = 0;
                }
            }
        }

        if !(self.machine_moved || self.window_changed) {
            return Ok(());
        }

        if d > self.config.tracking.stable_threshold {
            self.stable_frames = 0;
        } else {
            self.stable_frames += 1;
        }

        let still_ms = self.stable_frames as u64 * self.frame_interval_or_fallback() as u64;
        if still_ms >= self.config.tracking.stable_time_ms as u64 {
            self.stable_frames = 0;
            self.track_notify = !self.window_changed;
            self.machine_moved = false;
            self.window_changed = false;
            log::info!("scene settled, restarting the tracking search");
            self.restart_search(cur, effects)?;
            if let Some(window) = window {
                self.measure_window = window;
            }
        }
        Ok(())
    }

    /// After a one-shot, check once that the focused sharpness held.
    fn judge_one_shot(&mut self, cur: f32, window: Option<AfmWindow>, effects: &mut FrameEffects) {
        if self.one_shot_wait == 0 {
            return;
        }
        self.one_shot_wait -= 1;
        if self.one_shot_wait > 0 {
            return;
        }

        let drift = relative_delta(self.sharpness, cur).abs();
        let focus = drift < self.config.shot_check.drift_fail_threshold;
        log::info!(
            "one-shot finished, sharpness {} -> {} (drift {:.3}, focus {})",
            self.sharpness,
            cur,
            drift,
            focus
        );
        effects.events.push(AfEvent::AutofocusFinished { focus });
        self.sharpness = cur;
        if let Some(window) = window {
            self.measure_window = window;
        }
    }

    fn shot_ready(&self, cur: f32) -> bool {
        let mode = match self.state {
            AfState::Running => return false,
            AfState::Stopped => ShotMode::OneShot,
            AfState::Tracking if self.search.state() == SearchState::FocusFound => {
                ShotMode::Continuous
            }
            _ => return true,
        };
        raw_log_check(
            &self.config.shot_check,
            mode,
            self.sharpness,
            self.old_sharpness,
            cur,
            &self.history,
        )
    }
}
