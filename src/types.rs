//! Shared value types of the autofocus engine: AFM measurements, states,
//! strategies, events and per-call outcomes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One of the three AFM measuring windows of the ISP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AfmWindowId {
    A,
    B,
    C,
}

impl AfmWindowId {
    /// Priority order in which windows are consulted.
    pub const ALL: [AfmWindowId; 3] = [AfmWindowId::A, AfmWindowId::B, AfmWindowId::C];
}

/// Geometry of a measuring window in sensor pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfmWindow {
    pub h_offset: u16,
    pub v_offset: u16,
    pub width: u16,
    pub height: u16,
}

impl AfmWindow {
    pub fn new(h_offset: u16, v_offset: u16, width: u16, height: u16) -> Self {
        Self {
            h_offset,
            v_offset,
            width,
            height,
        }
    }
}

/// Statistics the AFM block reports for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AfmWindowResult {
    /// Sum of luminance over the window.
    pub luminance: u32,
    /// Sum of high-frequency energy over the window.
    pub sharpness: u32,
    pub pixel_count: u32,
    pub window: AfmWindow,
}

impl AfmWindowResult {
    /// Mean luminance per pixel, 0 when the window is empty.
    pub fn mean_luminance(&self) -> f32 {
        if self.pixel_count == 0 {
            return 0.0;
        }
        self.luminance as f32 / self.pixel_count as f32
    }
}

/// Per-frame AFM measurement covering all three windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AfmMeasurement {
    pub a: AfmWindowResult,
    pub b: AfmWindowResult,
    pub c: AfmWindowResult,
}

impl AfmMeasurement {
    pub fn window(&self, id: AfmWindowId) -> &AfmWindowResult {
        match id {
            AfmWindowId::A => &self.a,
            AfmWindowId::B => &self.b,
            AfmWindowId::C => &self.c,
        }
    }

    /// Measurement with only window A populated.
    pub fn single(result: AfmWindowResult) -> Self {
        Self {
            a: result,
            ..Default::default()
        }
    }
}

/// Focus search algorithm variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchStrategy {
    FullRange,
    HillClimbing,
    AdaptiveRange,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::FullRange => "full-range",
            SearchStrategy::HillClimbing => "hill-climbing",
            SearchStrategy::AdaptiveRange => "adaptive-range",
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full-range" | "FullRange" => Ok(Self::FullRange),
            "hill-climbing" | "HillClimbing" => Ok(Self::HillClimbing),
            "adaptive-range" | "AdaptiveRange" => Ok(Self::AdaptiveRange),
            _ => Err(format!("unknown search strategy: {s}")),
        }
    }
}

/// Overall controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AfState {
    Invalid,
    Initialized,
    Stopped,
    Running,
    Tracking,
    Locked,
    DownloadingFirmware,
}

/// State of the active search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Invalid,
    Init,
    SearchingFocus,
    FocusFound,
}

impl SearchState {
    pub fn is_active(&self) -> bool {
        matches!(self, SearchState::Init | SearchState::SearchingFocus)
    }
}

/// Notification broadcast to every registered event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AfEvent {
    /// A one-shot search finished; `focus` is false when the scene drifted
    /// away from the focused sharpness right after the search.
    AutofocusFinished { focus: bool },
    /// A tracking search started (`start = true`) or settled.
    AutofocusMove { start: bool },
    /// The lens actuator kept failing for `failures` consecutive moves.
    AutofocusStalled { failures: u32 },
}

/// Outcome of feeding one frame to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameStatus {
    Success,
    /// Search in progress, feed the next frame.
    Pending,
    /// The frame contributed nothing (lens settling, warm-up, stopped).
    Canceled,
}

/// Outcome of one call into a search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Pending,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked,
    /// A search is still running; retry after it settles.
    Pending,
}

/// Snapshot returned by `AfHandle::status`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AfStatus {
    pub running: bool,
    pub strategy: Option<SearchStrategy>,
    pub sharpness: f32,
}
