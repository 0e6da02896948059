//! Configuration management for the autofocus engine
//!
//! Thresholds and timing constants of the search, tracking and shot-check
//! logic, loadable from and savable to TOML.

use crate::errors::AfError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfConfig {
    pub search: SearchConfig,
    pub tracking: TrackingConfig,
    pub shot_check: ShotCheckConfig,
    pub engine: EngineConfig,
}

/// Where the lens goes when the best sharpness found is too low to trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPosition {
    MaxFocus,
    MinFocus,
    Position(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Approximate number of coarse steps across the lens range
    pub steps_per_range: i32,
    /// Peaks at or below this normalized sharpness are treated as failed focus
    pub sharpness_min: f32,
    /// Lens target used when the peak is below `sharpness_min`
    pub low_sharpness_fallback: FallbackPosition,
    /// Fine search is skipped for spans narrower than this (lens units)
    pub fine_search_min_span: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// How long the scene must be still before a new search starts
    pub stable_time_ms: u32,
    /// Frame-to-frame sharpness delta that marks a scene change
    pub scene_change_threshold: f32,
    /// Frame-to-frame sharpness delta below which a frame counts as still
    pub stable_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotCheckConfig {
    /// Bound on how long `shot_check` blocks the caller
    pub timeout_ms: u64,
    /// Frames to wait after a one-shot focus before judging it
    pub one_shot_wait_frames: u32,
    /// Sharpness drift after a one-shot that marks the result as failed
    pub drift_fail_threshold: f32,
    pub one_shot: ShotThresholds,
    pub continuous: ShotThresholds,
    /// History limit for jumps above the coarse threshold
    pub coarse_lookback_limit: f32,
    /// History limit for jumps between the fine and coarse thresholds
    pub fine_lookback_limit: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotThresholds {
    pub coarse: f32,
    pub fine: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Frames ignored after (re)starting measurement before trusting AFM data
    pub afm_warmup_frames: u32,
    pub command_queue_depth: usize,
    /// Frame interval used until calibration has produced one
    pub fallback_frame_interval_ms: u32,
    /// Consecutive lens actuation failures before a stall event is emitted
    pub stall_report_after: u32,
}

impl Default for AfConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig {
                steps_per_range: crate::bssa::ADAPTIVE_STEPS_PER_RANGE,
                sharpness_min: 500.0,
                low_sharpness_fallback: FallbackPosition::MaxFocus,
                fine_search_min_span: 4,
            },
            tracking: TrackingConfig {
                stable_time_ms: 200,
                scene_change_threshold: 0.05,
                stable_threshold: 0.02,
            },
            shot_check: ShotCheckConfig {
                timeout_ms: 200,
                one_shot_wait_frames: 1,
                drift_fail_threshold: 0.25,
                one_shot: ShotThresholds {
                    coarse: 0.25,
                    fine: 0.15,
                },
                continuous: ShotThresholds {
                    coarse: 0.35,
                    fine: 0.25,
                },
                coarse_lookback_limit: 0.3,
                fine_lookback_limit: 0.05,
            },
            engine: EngineConfig {
                afm_warmup_frames: 5,
                command_queue_depth: 10,
                fallback_frame_interval_ms: 33,
                stall_report_after: 5,
            },
        }
    }
}

impl AfConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AfError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| AfError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AfConfig = toml::from_str(&contents)
            .map_err(|e| AfError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(AfError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AfError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AfError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| AfError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| AfError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("isp_autofocus.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.search.steps_per_range < 1 {
            return Err("steps_per_range must be at least 1".to_string());
        }
        if self.search.sharpness_min < 0.0 {
            return Err("sharpness_min must not be negative".to_string());
        }
        if self.search.fine_search_min_span < 2 {
            return Err("fine_search_min_span must be at least 2".to_string());
        }

        for (name, value) in [
            ("scene_change_threshold", self.tracking.scene_change_threshold),
            ("stable_threshold", self.tracking.stable_threshold),
            ("drift_fail_threshold", self.shot_check.drift_fail_threshold),
            ("coarse_lookback_limit", self.shot_check.coarse_lookback_limit),
            ("fine_lookback_limit", self.shot_check.fine_lookback_limit),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be between 0.0 and 1.0", name));
            }
        }

        for (name, table) in [
            ("one_shot", self.shot_check.one_shot),
            ("continuous", self.shot_check.continuous),
        ] {
            if table.fine > table.coarse {
                return Err(format!(
                    "{} fine threshold must not exceed the coarse threshold",
                    name
                ));
            }
        }

        if self.shot_check.timeout_ms == 0 {
            return Err("shot check timeout must be positive".to_string());
        }
        if self.engine.command_queue_depth == 0 {
            return Err("command queue depth must be positive".to_string());
        }
        if self.engine.fallback_frame_interval_ms == 0 {
            return Err("fallback frame interval must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AfConfig::default();
        assert_eq!(config.search.steps_per_range, 8);
        assert_eq!(config.search.sharpness_min, 500.0);
        assert_eq!(config.tracking.stable_time_ms, 200);
        assert_eq!(config.shot_check.timeout_ms, 200);
        assert_eq!(config.engine.afm_warmup_frames, 5);
        assert_eq!(config.engine.command_queue_depth, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default_without_file() {
        assert!(!AfConfig::default_path().exists());
        let config = AfConfig::load_or_default();
        assert_eq!(config.search.steps_per_range, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = AfConfig::default();
        bad.tracking.stable_threshold = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = AfConfig::default();
        bad.shot_check.one_shot.fine = 0.5;
        assert!(bad.validate().is_err());

        let mut bad = AfConfig::default();
        bad.engine.command_queue_depth = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af").join("isp_autofocus.toml");

        let mut config = AfConfig::default();
        config.search.low_sharpness_fallback = FallbackPosition::Position(321);
        config.save_to_file(&path).unwrap();

        let loaded = AfConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&AfConfig::default()).unwrap();
        assert!(toml_string.contains("[search]"));
        assert!(toml_string.contains("[tracking]"));
        assert!(toml_string.contains("[shot_check]"));
        assert!(toml_string.contains("[engine]"));
        assert!(toml_string.contains("sharpness_min"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = AfConfig::load_from_file("nonexistent_isp_autofocus.toml");
        assert_eq!(result.unwrap(), AfConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "search = 3").unwrap();
        assert!(matches!(
            AfConfig::load_from_file(&path),
            Err(AfError::Config(_))
        ));
    }
}
