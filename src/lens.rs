//! Interfaces to the collaborators the engine drives: the sensor's lens
//! actuator and the ISP's AFM window configuration.

use crate::errors::AfError;
use crate::types::AfmWindowId;

/// How the sensor module drives its lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotoDriveKind {
    /// Host-driven voice coil motor; this crate runs the search.
    Vcm,
    /// The sensor runs autofocus on-board and only takes commands.
    Soc,
}

/// Capabilities reported when the motor drive is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotoDriveInfo {
    /// Largest lens position; the range is `0..=max_focus`.
    pub max_focus: u32,
    /// Time for the VCM to travel the whole range, in milliseconds.
    pub full_travel_ms: u32,
}

impl MotoDriveInfo {
    /// Decode the packed driver word: max focus in the low 16 bits,
    /// full-travel time in the high 16 bits.
    pub fn from_packed(word: u32) -> Self {
        Self {
            max_focus: word & 0xffff,
            full_travel_ms: (word & 0xffff_0000) >> 16,
        }
    }

    /// Frames to wait after moving `distance` lens units before the VCM
    /// has settled.
    pub fn settle_frames(&self, distance: u32, frame_interval_ms: u32) -> u32 {
        if self.max_focus == 0 || frame_interval_ms == 0 {
            return 1;
        }
        let travel_ms = (self.full_travel_ms as u64 * distance as u64) / self.max_focus as u64;
        (travel_ms / frame_interval_ms as u64) as u32 + 1
    }
}

/// Commands understood by sensors with on-board autofocus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocFocusCommand {
    DownloadFirmware,
    Focus,
}

/// Sensor-side lens control.
pub trait LensActuator: Send {
    fn init_moto_drive(&mut self) -> Result<MotoDriveKind, AfError>;

    fn setup_moto_drive(&mut self) -> Result<MotoDriveInfo, AfError>;

    /// Command the lens to an absolute position. Returns once the command
    /// has been written; the lens itself moves afterwards.
    fn focus_set(&mut self, position: u32) -> Result<(), AfError>;

    fn focus_get(&mut self) -> Result<u32, AfError>;

    fn soc_focus_command(&mut self, command: SocFocusCommand) -> Result<(), AfError> {
        Err(AfError::Actuator(format!(
            "on-board autofocus command {:?} not supported",
            command
        )))
    }
}

/// ISP-side view of which AFM windows are active.
pub trait AfmWindowQuery: Send {
    fn is_window_enabled(&self, window: AfmWindowId) -> bool;
}

/// Fixed set of enabled windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticWindows {
    pub a: bool,
    pub b: bool,
    pub c: bool,
}

impl StaticWindows {
    pub fn only_a() -> Self {
        Self {
            a: true,
            b: false,
            c: false,
        }
    }
}

impl AfmWindowQuery for StaticWindows {
    fn is_window_enabled(&self, window: AfmWindowId) -> bool {
        match window {
            AfmWindowId::A => self.a,
            AfmWindowId::B => self.b,
            AfmWindowId::C => self.c,
        }
    }
}
