//! Engine configuration stored in `questline.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::executor::DEFAULT_MAX_QUEUE_SIZE;
use crate::task::navigate::{DEFAULT_ARRIVAL_RADIUS, DEFAULT_MAX_WALK_ATTEMPTS};

pub const DEFAULT_CONFIG_FILE: &str = "questline.toml";
pub const DEFAULT_INACTIVITY_TICKS: u32 = 100;

/// Engine configuration (TOML).
///
/// Missing fields take their defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Steps farther than this many tiles get a navigation task prepended.
    pub proximity_threshold_tiles: u32,

    /// Maximum number of tasks waiting in the executor queue.
    pub max_queue_size: usize,

    /// Timeout applied to every task built for a step.
    pub task_timeout_secs: Option<u64>,

    /// Ticks a step task may go without any sub-task making progress before
    /// it fails and the step is rebuilt. Zero disables the check.
    pub inactivity_timeout_ticks: u32,

    /// Stop the quest once one step failed this many times in a row, with no
    /// locally completed attempt in between. Unset means retry forever.
    pub max_step_attempts: Option<u32>,

    /// Length of one tick of the driving loop.
    pub tick_interval_ms: u64,

    pub navigation: NavigationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NavigationConfig {
    /// Distance at which a walk counts as arrived.
    pub arrival_radius_tiles: u32,

    /// Walk requests issued before navigation gives up.
    pub max_walk_attempts: u32,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            arrival_radius_tiles: DEFAULT_ARRIVAL_RADIUS,
            max_walk_attempts: DEFAULT_MAX_WALK_ATTEMPTS,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_tiles: 3,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            task_timeout_secs: None,
            inactivity_timeout_ticks: DEFAULT_INACTIVITY_TICKS,
            max_step_attempts: None,
            tick_interval_ms: 600,
            navigation: NavigationConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(anyhow!("max_queue_size must be > 0"));
        }
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("tick_interval_ms must be > 0"));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(anyhow!("task_timeout_secs must be > 0 when set"));
        }
        if self.max_step_attempts == Some(0) {
            return Err(anyhow!("max_step_attempts must be > 0 when set"));
        }
        if self.navigation.max_walk_attempts == 0 {
            return Err(anyhow!("navigation.max_walk_attempts must be > 0"));
        }
        if self.navigation.arrival_radius_tiles > self.proximity_threshold_tiles {
            return Err(anyhow!(
                "navigation.arrival_radius_tiles ({}) must not exceed proximity_threshold_tiles ({})",
                self.navigation.arrival_radius_tiles,
                self.proximity_threshold_tiles
            ));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn inactivity_limit(&self) -> Option<u32> {
        (self.inactivity_timeout_ticks > 0).then_some(self.inactivity_timeout_ticks)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
