//! isp-autofocus: contrast-detect autofocus for camera ISP pipelines
//!
//! The engine consumes per-frame AFM (autofocus measurement) statistics from
//! the ISP, drives a VCM lens actuator through a focus search and reports the
//! outcome through event queues. Sensors that run autofocus on-board are
//! supported through a command worker.
//!
//! # Features
//! - Three search strategies: full range, hill climbing, adaptive range
//! - One-shot and continuous (tracking) autofocus with scene-change detection
//! - Focus lock and shot-readiness checks callable from any thread
//! - Lens settle-time compensation from a calibrated frame interval
//! - TOML configuration of every threshold
//!
//! # Usage
//! ```rust,no_run
//! use isp_autofocus::lens::StaticWindows;
//! use isp_autofocus::testing::{SyntheticLens, SyntheticScene};
//! use isp_autofocus::{AfConfig, AfHandle, SearchStrategy};
//!
//! let lens = SyntheticLens::new(1000, 0);
//! let scene = SyntheticScene::parabola(420);
//! let af = AfHandle::init(AfConfig::default()).unwrap();
//! af.configure(
//!     Box::new(lens.clone()),
//!     Box::new(StaticWindows::only_a()),
//!     SearchStrategy::AdaptiveRange,
//! )
//! .unwrap();
//! af.one_shot(SearchStrategy::AdaptiveRange).unwrap();
//! while !af.settled().unwrap() {
//!     af.process_frame(&scene.measure(lens.position())).unwrap();
//! }
//! ```
pub mod bssa;
pub mod config;
pub mod controller;
pub mod errors;
pub mod invariant_ppt;
pub mod lens;
pub mod search;
pub mod timing;
pub mod types;

// Testing utilities - synthetic lens and scenes for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::AfConfig;
pub use controller::AfHandle;
pub use errors::AfError;
pub use lens::{AfmWindowQuery, LensActuator, MotoDriveInfo, MotoDriveKind};
pub use types::{
    AfEvent, AfState, AfStatus, AfmMeasurement, AfmWindow, AfmWindowId, AfmWindowResult,
    FrameStatus, LockOutcome, SearchState, SearchStrategy,
};

/// Initialize logging for the autofocus engine
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "isp_autofocus=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        strategies: vec![
            SearchStrategy::FullRange,
            SearchStrategy::HillClimbing,
            SearchStrategy::AdaptiveRange,
        ],
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub strategies: Vec<SearchStrategy>,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "isp-autofocus");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.strategies.len(), 3);
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }
}
