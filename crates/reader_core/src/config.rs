use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use shared::domain::ScrollMode;

use crate::executor::ExecutorOptions;

pub const DEFAULT_SETTINGS_FILE: &str = "reader.toml";
pub const MAX_EVENT_CAPACITY: usize = 65_536;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub long_running_threshold_ms: u64,
    pub event_capacity: usize,
    pub text_size_min: f64,
    pub text_size_max: f64,
    pub scroll_mode: ScrollMode,
    pub worker_thread_name: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            long_running_threshold_ms: 1000,
            event_capacity: 1024,
            text_size_min: 0.5,
            text_size_max: 3.0,
            scroll_mode: ScrollMode::Paginated,
            worker_thread_name: "reader-commands".into(),
        }
    }
}

impl EngineSettings {
    pub fn long_running_threshold(&self) -> Duration {
        Duration::from_millis(self.long_running_threshold_ms)
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            thread_name: self.worker_thread_name.clone(),
            long_running_threshold: self.long_running_threshold(),
        }
    }

    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.event_capacity == 0 {
            self.event_capacity = defaults.event_capacity;
        }
        self.event_capacity = self.event_capacity.min(MAX_EVENT_CAPACITY);
        if !self.text_size_min.is_finite() || self.text_size_min <= 0.0 {
            self.text_size_min = defaults.text_size_min;
        }
        if !self.text_size_max.is_finite() || self.text_size_max <= 0.0 {
            self.text_size_max = defaults.text_size_max;
        }
        if self.text_size_min > self.text_size_max {
            std::mem::swap(&mut self.text_size_min, &mut self.text_size_max);
        }
        if self.worker_thread_name.trim().is_empty() {
            self.worker_thread_name = defaults.worker_thread_name;
        }
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    long_running_threshold_ms: Option<u64>,
    event_capacity: Option<usize>,
    text_size_min: Option<f64>,
    text_size_max: Option<f64>,
    scroll_mode: Option<ScrollMode>,
    worker_thread_name: Option<String>,
}

impl FileSettings {
    fn apply(self, settings: &mut EngineSettings) {
        if let Some(v) = self.long_running_threshold_ms {
            settings.long_running_threshold_ms = v;
        }
        if let Some(v) = self.event_capacity {
            settings.event_capacity = v;
        }
        if let Some(v) = self.text_size_min {
            settings.text_size_min = v;
        }
        if let Some(v) = self.text_size_max {
            settings.text_size_max = v;
        }
        if let Some(v) = self.scroll_mode {
            settings.scroll_mode = v;
        }
        if let Some(v) = self.worker_thread_name {
            settings.worker_thread_name = v;
        }
    }
}

/// Defaults, then `reader.toml` in the working directory if present, then `READER__*`
/// environment overrides. Unreadable or malformed values are ignored.
pub fn load_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();

    if let Ok(raw) = fs::read_to_string(DEFAULT_SETTINGS_FILE) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => file_cfg.apply(&mut settings),
            Err(err) => tracing::warn!("ignoring malformed {DEFAULT_SETTINGS_FILE}: {err}"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.normalized()
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<EngineSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file_cfg = toml::from_str::<FileSettings>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;

    let mut settings = EngineSettings::default();
    file_cfg.apply(&mut settings);
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings.normalized())
}

fn apply_env_overrides(settings: &mut EngineSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("READER__LONG_RUNNING_THRESHOLD_MS").and_then(|v| v.parse().ok()) {
        settings.long_running_threshold_ms = v;
    }
    if let Some(v) = var("READER__EVENT_CAPACITY").and_then(|v| v.parse().ok()) {
        settings.event_capacity = v;
    }
    if let Some(v) = var("READER__TEXT_SIZE_MIN").and_then(|v| v.parse().ok()) {
        settings.text_size_min = v;
    }
    if let Some(v) = var("READER__TEXT_SIZE_MAX").and_then(|v| v.parse().ok()) {
        settings.text_size_max = v;
    }
    if let Some(v) = var("READER__SCROLL_MODE") {
        if v.eq_ignore_ascii_case("scrolling") {
            settings.scroll_mode = ScrollMode::Scrolling;
        } else if v.eq_ignore_ascii_case("paginated") {
            settings.scroll_mode = ScrollMode::Paginated;
        }
    }
    if let Some(v) = var("READER__WORKER_THREAD_NAME") {
        settings.worker_thread_name = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
