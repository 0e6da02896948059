//! Synthetic lens and scene
//!
//! The scene reports luminance equal to the pixel count, so the normalised
//! sharpness the engine computes is exactly the raw sharpness value.

use crate::errors::AfError;
use crate::lens::{LensActuator, MotoDriveInfo, MotoDriveKind, SocFocusCommand};
use crate::types::{AfmMeasurement, AfmWindow, AfmWindowResult};
use std::sync::{Arc, Mutex};

/// Window geometry reported by every synthetic measurement.
pub const SYNTHETIC_WINDOW: AfmWindow = AfmWindow {
    h_offset: 0,
    v_offset: 0,
    width: 64,
    height: 64,
};

#[derive(Debug, Default)]
struct LensState {
    max_focus: u32,
    full_travel_ms: u32,
    position: u32,
    moves: Vec<u32>,
    fail_moves: bool,
    soc: bool,
    fail_soc: bool,
    soc_commands: Vec<SocFocusCommand>,
}

/// Simulated VCM (or on-board autofocus sensor). Clones share state, so a
/// test keeps one clone to inspect what the engine did with the other.
#[derive(Debug, Clone)]
pub struct SyntheticLens {
    state: Arc<Mutex<LensState>>,
}

impl SyntheticLens {
    /// VCM lens over `0..=max_focus`, resting at `position`. Full travel
    /// defaults to 100 ms.
    pub fn new(max_focus: u32, position: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(LensState {
                max_focus,
                full_travel_ms: 100,
                position: position.min(max_focus),
                ..Default::default()
            })),
        }
    }

    /// Sensor that runs autofocus itself.
    pub fn on_board() -> Self {
        let lens = Self::new(0, 0);
        lens.lock().soc = true;
        lens
    }

    pub fn with_full_travel_ms(self, full_travel_ms: u32) -> Self {
        self.lock().full_travel_ms = full_travel_ms;
        self
    }

    /// Make every following `focus_set` fail (or succeed again).
    pub fn fail_moves(&self, fail: bool) {
        self.lock().fail_moves = fail;
    }

    /// Make every following on-board command fail (or succeed again).
    pub fn fail_soc_commands(&self, fail: bool) {
        self.lock().fail_soc = fail;
    }

    pub fn position(&self) -> i32 {
        self.lock().position as i32
    }

    /// Every position commanded so far, in order.
    pub fn moves(&self) -> Vec<u32> {
        self.lock().moves.clone()
    }

    pub fn soc_commands(&self) -> Vec<SocFocusCommand> {
        self.lock().soc_commands.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LensState> {
        self.state.lock().expect("lock poisoned")
    }
}

impl LensActuator for SyntheticLens {
    fn init_moto_drive(&mut self) -> Result<MotoDriveKind, AfError> {
        if self.lock().soc {
            Ok(MotoDriveKind::Soc)
        } else {
            Ok(MotoDriveKind::Vcm)
        }
    }

    fn setup_moto_drive(&mut self) -> Result<MotoDriveInfo, AfError> {
        let state = self.lock();
        // the driver hands both values back packed into one word
        let word = (state.full_travel_ms.min(0xffff) << 16) | state.max_focus.min(0xffff);
        Ok(MotoDriveInfo::from_packed(word))
    }

    fn focus_set(&mut self, position: u32) -> Result<(), AfError> {
        let mut state = self.lock();
        if state.fail_moves {
            return Err(AfError::actuator("synthetic lens refused the move"));
        }
        if position > state.max_focus {
            return Err(AfError::invalid_parameter(format!(
                "lens position {} beyond {}",
                position, state.max_focus
            )));
        }
        state.position = position;
        state.moves.push(position);
        Ok(())
    }

    fn focus_get(&mut self) -> Result<u32, AfError> {
        Ok(self.lock().position)
    }

    fn soc_focus_command(&mut self, command: SocFocusCommand) -> Result<(), AfError> {
        let mut state = self.lock();
        if !state.soc {
            return Err(AfError::actuator("lens has no on-board autofocus"));
        }
        state.soc_commands.push(command);
        if state.fail_soc {
            return Err(AfError::actuator(format!("{:?} failed", command)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Profile {
    Parabola { peak: i32 },
    Flat { sharpness: u32 },
}

/// Sharpness as a function of lens position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticScene {
    profile: Profile,
}

impl SyntheticScene {
    /// `1_000_000 - (pos - peak)^2`, floored at 1000.
    pub fn parabola(peak: i32) -> Self {
        Self {
            profile: Profile::Parabola { peak },
        }
    }

    /// Same sharpness everywhere; a scene with nothing to focus on.
    pub fn flat(sharpness: u32) -> Self {
        Self {
            profile: Profile::Flat { sharpness },
        }
    }

    pub fn sharpness_at(&self, pos: i32) -> u32 {
        match self.profile {
            Profile::Parabola { peak } => {
                let d = (pos - peak) as i64;
                (1_000_000 - d * d).max(1_000) as u32
            }
            Profile::Flat { sharpness } => sharpness,
        }
    }

    /// AFM result for the lens resting at `pos`, in window A only.
    pub fn measure(&self, pos: i32) -> AfmMeasurement {
        let pixels = SYNTHETIC_WINDOW.width as u32 * SYNTHETIC_WINDOW.height as u32;
        AfmMeasurement::single(AfmWindowResult {
            luminance: pixels,
            sharpness: self.sharpness_at(pos),
            pixel_count: pixels,
            window: SYNTHETIC_WINDOW,
        })
    }
}
