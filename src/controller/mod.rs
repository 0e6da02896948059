//! Autofocus session handle
//!
//! An [`AfHandle`] owns one autofocus session. Control calls (`start`,
//! `one_shot`, `stop`, `shot_check`) may come from any thread; they validate
//! against the current state and queue a command that the frame-processing
//! thread drains in [`AfHandle::process_frame`], one per frame. Events are
//! fanned out to registered queues after the session lock has been released.

mod commands;
mod context;
mod events;
mod shot;
mod soc;

pub use commands::{AckMailbox, AfmCommand, SocCommand};
pub use events::EventHub;
pub use shot::{raw_log_check, SharpnessHistory, ShotMode, SHARPNESS_HISTORY_LEN};

use crate::config::AfConfig;
use crate::errors::AfError;
use crate::lens::{AfmWindowQuery, LensActuator, MotoDriveKind};
use crate::timing::{FrameClock, MonotonicClock};
use crate::types::{
    AfEvent, AfState, AfStatus, AfmMeasurement, AfmWindow, FrameStatus, LockOutcome,
    SearchState, SearchStrategy,
};
use context::{AfContext, FrameEffects, Route};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

struct Inner {
    context: Mutex<AfContext>,
    commands_tx: Sender<AfmCommand>,
    commands_rx: Receiver<AfmCommand>,
    ack: AckMailbox,
    shot_tickets: AtomicU64,
    events: EventHub,
    soc_tx: Mutex<Option<Sender<SocCommand>>>,
    soc_thread: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
    clock: Arc<dyn FrameClock>,
    shot_check_timeout: Duration,
}

/// Handle to one autofocus session.
pub struct AfHandle {
    inner: Arc<Inner>,
}

impl AfHandle {
    /// Create a session timing frames with the monotonic clock.
    pub fn init(config: AfConfig) -> Result<Self, AfError> {
        Self::init_with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn init_with_clock(config: AfConfig, clock: Arc<dyn FrameClock>) -> Result<Self, AfError> {
        config.validate().map_err(AfError::Config)?;

        let (commands_tx, commands_rx) = bounded(config.engine.command_queue_depth);
        let shot_check_timeout = Duration::from_millis(config.shot_check.timeout_ms);

        log::debug!(
            "autofocus session created, command queue depth {}",
            config.engine.command_queue_depth
        );

        Ok(Self {
            inner: Arc::new(Inner {
                context: Mutex::new(AfContext::new(config)),
                commands_tx,
                commands_rx,
                ack: AckMailbox::new(),
                shot_tickets: AtomicU64::new(0),
                events: EventHub::new(),
                soc_tx: Mutex::new(None),
                soc_thread: Mutex::new(None),
                released: AtomicBool::new(false),
                clock,
                shot_check_timeout,
            }),
        })
    }

    /// Release the session. Fails with `Busy` while a search runs or focus
    /// is locked; afterwards every call returns `WrongHandle`.
    pub fn release(&self) -> Result<(), AfError> {
        self.check_open()?;
        {
            let ctx = self.inner.context.lock().expect("lock poisoned");
            if matches!(ctx.state(), AfState::Running | AfState::Locked) {
                return Err(AfError::Busy(format!(
                    "cannot release while {:?}",
                    ctx.state()
                )));
            }
        }

        self.shutdown();
        self.inner
            .context
            .lock()
            .expect("lock poisoned")
            .release_collaborators();
        self.inner.released.store(true, Ordering::SeqCst);
        log::info!("autofocus session released");
        Ok(())
    }

    /// Attach the lens actuator and the AFM window view and arm `strategy`.
    ///
    /// For sensors with on-board autofocus this starts the worker thread and
    /// the firmware download; the session is `DownloadingFirmware` until it
    /// completes.
    pub fn configure(
        &self,
        lens: Box<dyn LensActuator>,
        windows: Box<dyn AfmWindowQuery>,
        strategy: SearchStrategy,
    ) -> Result<MotoDriveKind, AfError> {
        self.check_open()?;
        let kind = self
            .inner
            .context
            .lock()
            .expect("lock poisoned")
            .configure(lens, windows, strategy)?;

        if kind == MotoDriveKind::Soc {
            self.ensure_soc_worker()?;
            self.inner
                .context
                .lock()
                .expect("lock poisoned")
                .set_state(AfState::DownloadingFirmware);
            self.send_soc(SocCommand::Firmware)?;
        }
        Ok(kind)
    }

    /// Re-read the lens geometry and re-arm the search with `strategy`.
    pub fn reset(&self, strategy: SearchStrategy) -> Result<(), AfError> {
        self.check_open()?;
        self.inner
            .context
            .lock()
            .expect("lock poisoned")
            .reset(strategy)
    }

    pub fn reconfigure(&self) -> Result<(), AfError> {
        self.check_open()?;
        self.inner.context.lock().expect("lock poisoned").reconfigure()
    }

    /// Begin continuous (tracking) autofocus.
    pub fn start(&self, strategy: SearchStrategy) -> Result<(), AfError> {
        self.check_open()?;
        let route = self.inner.context.lock().expect("lock poisoned").start(strategy)?;
        self.dispatch(route)
    }

    /// Run a single search and stop once focus is found.
    pub fn one_shot(&self, strategy: SearchStrategy) -> Result<(), AfError> {
        self.check_open()?;
        let route = {
            let mut ctx = self.inner.context.lock().expect("lock poisoned");
            let route = ctx.one_shot(strategy)?;
            if matches!(route, Route::Soc(_)) {
                ctx.set_state(AfState::Running);
            }
            route
        };
        self.dispatch(route)
    }

    pub fn stop(&self) -> Result<(), AfError> {
        self.check_open()?;
        let route = self.inner.context.lock().expect("lock poisoned").stop()?;
        self.dispatch(route)
    }

    /// Lock focus once the search has settled.
    pub fn try_lock(&self) -> Result<LockOutcome, AfError> {
        self.check_open()?;
        self.inner.context.lock().expect("lock poisoned").try_lock()
    }

    pub fn unlock(&self) -> Result<(), AfError> {
        self.check_open()?;
        self.inner.context.lock().expect("lock poisoned").unlock()
    }

    pub fn status(&self) -> Result<AfStatus, AfError> {
        self.check_open()?;
        Ok(self.inner.context.lock().expect("lock poisoned").status())
    }

    /// True when focus was found and no search is running.
    pub fn settled(&self) -> Result<bool, AfError> {
        self.check_open()?;
        Ok(self.inner.context.lock().expect("lock poisoned").settled())
    }

    /// Ask the frame thread whether the image is steady enough for a shot.
    ///
    /// Blocks for at most the configured shot-check timeout. A timeout, a
    /// full command queue and on-board autofocus all answer `true`.
    pub fn shot_check(&self) -> Result<bool, AfError> {
        self.check_open()?;
        if self.inner.context.lock().expect("lock poisoned").is_soc() {
            return Ok(true);
        }

        let ticket = self.inner.shot_tickets.fetch_add(1, Ordering::Relaxed) + 1;
        match self.inner.commands_tx.try_send(AfmCommand::ShotCheck(ticket)) {
            Ok(()) => {}
            Err(e) => {
                log::warn!("shot check not queued ({}), assuming ready", e);
                return Ok(true);
            }
        }

        match self.inner.ack.take_timeout(ticket, self.inner.shot_check_timeout) {
            Some(shot) => Ok(shot),
            None => {
                log::debug!(
                    "no shot-check answer within {:?}, assuming ready",
                    self.inner.shot_check_timeout
                );
                Ok(true)
            }
        }
    }

    /// Feed one AFM measurement. Call once per frame from the ISP thread.
    pub fn process_frame(&self, measurement: &AfmMeasurement) -> Result<FrameStatus, AfError> {
        self.check_open()?;
        let command = self.inner.commands_rx.try_recv().ok();
        let now_us = self.inner.clock.now_us();

        let mut effects = FrameEffects::default();
        let status = self
            .inner
            .context
            .lock()
            .expect("lock poisoned")
            .process_frame(measurement, command, now_us, &mut effects)?;

        if let Some((ticket, shot)) = effects.ack {
            self.inner.ack.post(ticket, shot);
        }
        if let Some(command) = effects.requeue {
            if let Err(e) = self.inner.commands_tx.try_send(command) {
                log::warn!("could not re-queue {:?}: {}", command, e);
            }
        }
        self.inner.events.publish_all(effects.events);
        Ok(status)
    }

    /// Restart measurement after the ISP changed its AFM setup: warm-up
    /// frames are skipped again and the frame interval recalibrated.
    pub fn measure_restart(&self) -> Result<(), AfError> {
        self.check_open()?;
        self.inner
            .context
            .lock()
            .expect("lock poisoned")
            .measure_restart();
        Ok(())
    }

    /// Add a caller-owned event queue.
    pub fn register_event_queue(&self, queue: Sender<AfEvent>) -> Result<(), AfError> {
        self.check_open()?;
        self.inner.events.register(queue);
        Ok(())
    }

    /// Create and register a new event queue.
    pub fn subscribe(&self) -> Result<Receiver<AfEvent>, AfError> {
        self.check_open()?;
        Ok(self.inner.events.subscribe())
    }

    /// Geometry of the window the engine measures in.
    pub fn measurement_window(
        &self,
        measurement: &AfmMeasurement,
    ) -> Result<Option<AfmWindow>, AfError> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .lock()
            .expect("lock poisoned")
            .measurement_window(measurement))
    }

    /// Last position commanded to the lens.
    pub fn lens_position(&self) -> Result<i32, AfError> {
        self.check_open()?;
        Ok(self.inner.context.lock().expect("lock poisoned").lens_position())
    }

    pub fn state(&self) -> Result<AfState, AfError> {
        self.check_open()?;
        Ok(self.inner.context.lock().expect("lock poisoned").state())
    }

    pub fn search_state(&self) -> Result<SearchState, AfError> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .lock()
            .expect("lock poisoned")
            .search()
            .state())
    }

    /// Lens range the search scans and its current signed step.
    pub fn search_geometry(&self) -> Result<((i32, i32), i32), AfError> {
        self.check_open()?;
        let ctx = self.inner.context.lock().expect("lock poisoned");
        Ok((ctx.search().range(), ctx.search().step()))
    }

    /// Calibrated frame interval, 0 until two frames have been processed.
    pub fn frame_interval_ms(&self) -> Result<u32, AfError> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .lock()
            .expect("lock poisoned")
            .frame_interval_ms())
    }

    fn check_open(&self) -> Result<(), AfError> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(AfError::WrongHandle);
        }
        Ok(())
    }

    fn dispatch(&self, route: Route) -> Result<(), AfError> {
        match route {
            Route::Frame(command) => match self.inner.commands_tx.try_send(command) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(AfError::Busy(format!(
                    "command queue full, {:?} dropped",
                    command
                ))),
                Err(TrySendError::Disconnected(_)) => Err(AfError::WrongHandle),
            },
            Route::Soc(command) => self.send_soc(command),
            Route::Nowhere => Ok(()),
        }
    }

    fn ensure_soc_worker(&self) -> Result<(), AfError> {
        let mut thread = self.inner.soc_thread.lock().expect("lock poisoned");
        if thread.is_some() {
            return Ok(());
        }
        let (tx, rx) = unbounded();
        *thread = Some(soc::spawn(self.inner.clone(), rx)?);
        *self.inner.soc_tx.lock().expect("lock poisoned") = Some(tx);
        Ok(())
    }

    fn send_soc(&self, command: SocCommand) -> Result<(), AfError> {
        let tx = self.inner.soc_tx.lock().expect("lock poisoned");
        match tx.as_ref() {
            Some(tx) => tx.send(command).map_err(|_| AfError::WrongHandle),
            None => Err(AfError::WrongConfig(
                "on-board autofocus worker not running".into(),
            )),
        }
    }

    /// Stop the on-board autofocus worker, if any, and wait for it.
    fn shutdown(&self) {
        if let Some(tx) = self.inner.soc_tx.lock().expect("lock poisoned").take() {
            let _ = tx.send(SocCommand::Exit);
        }
        let thread = self.inner.soc_thread.lock().expect("lock poisoned").take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                log::error!("on-board autofocus worker panicked");
            }
        }
    }
}

impl Drop for AfHandle {
    fn drop(&mut self) {
        if !self.inner.released.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::StaticWindows;
    use crate::testing::SyntheticLens;

    fn configured(strategy: SearchStrategy) -> AfHandle {
        let handle = AfHandle::init(AfConfig::default()).unwrap();
        handle
            .configure(
                Box::new(SyntheticLens::new(1000, 0)),
                Box::new(StaticWindows::only_a()),
                strategy,
            )
            .unwrap();
        handle
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AfConfig::default();
        config.engine.command_queue_depth = 0;
        assert!(matches!(AfHandle::init(config), Err(AfError::Config(_))));
    }

    #[test]
    fn test_released_handle_is_wrong_handle() {
        let handle = configured(SearchStrategy::FullRange);
        handle.release().unwrap();
        assert_eq!(handle.status().unwrap_err(), AfError::WrongHandle);
        assert_eq!(
            handle.process_frame(&AfmMeasurement::default()).unwrap_err(),
            AfError::WrongHandle
        );
        assert_eq!(handle.release().unwrap_err(), AfError::WrongHandle);
    }

    #[test]
    fn test_full_command_queue_is_busy() {
        let mut config = AfConfig::default();
        config.engine.command_queue_depth = 1;
        let handle = AfHandle::init(config).unwrap();
        handle
            .configure(
                Box::new(SyntheticLens::new(1000, 0)),
                Box::new(StaticWindows::only_a()),
                SearchStrategy::HillClimbing,
            )
            .unwrap();

        handle.start(SearchStrategy::HillClimbing).unwrap();
        assert!(matches!(
            handle.start(SearchStrategy::HillClimbing),
            Err(AfError::Busy(_))
        ));
    }

    #[test]
    fn test_strategy_mismatch_is_wrong_config() {
        let handle = configured(SearchStrategy::AdaptiveRange);
        assert!(matches!(
            handle.one_shot(SearchStrategy::FullRange),
            Err(AfError::WrongConfig(_))
        ));
        handle.reset(SearchStrategy::FullRange).unwrap();
        handle.one_shot(SearchStrategy::FullRange).unwrap();
    }

    #[test]
    fn test_release_refused_while_running() {
        let handle = configured(SearchStrategy::FullRange);
        handle.one_shot(SearchStrategy::FullRange).unwrap();
        handle.process_frame(&AfmMeasurement::default()).unwrap();
        assert_eq!(handle.state().unwrap(), AfState::Running);
        assert!(matches!(handle.release(), Err(AfError::Busy(_))));
        handle.stop().unwrap();
        handle.process_frame(&AfmMeasurement::default()).unwrap();
        handle.release().unwrap();
    }
}
