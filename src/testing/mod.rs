//! Testing utilities for isp-autofocus
//!
//! A simulated lens actuator and synthetic AFM scenes, so the engine can be
//! driven end to end without sensor hardware.

pub mod synthetic_data;

pub use synthetic_data::{SyntheticLens, SyntheticScene, SYNTHETIC_WINDOW};
