use serde::Deserialize;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use crate::browser::BrowserConfig;
use crate::retry::{Pacing, RetryPolicy};
use crate::strategy::Timeouts;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Site profile file (JSON, one entry per site)
    #[serde(default = "default_profiles_path")]
    pub profiles_path: String,

    /// SQLite file holding job state, cached results and snapshots
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Where failure screenshots are written
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: String,

    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// First free port in this range is used
    #[serde(default = "default_port_range")]
    pub port_range: (u16, u16),

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub browser: BrowserSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Attempts per episode before falling back to the snapshot
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Unit of the `2^attempt` backoff delay
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,

    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Wait per iframe selector on an episode page
    #[serde(default = "default_selector_timeout")]
    pub selector_timeout_secs: u64,

    /// Wait for the episode list on a main page
    #[serde(default = "default_episode_list_timeout")]
    pub episode_list_timeout_secs: u64,

    /// Random pause between episodes, lower bound
    #[serde(default = "default_min_episode_delay")]
    pub min_episode_delay_ms: u64,

    /// Random pause between episodes, upper bound
    #[serde(default = "default_max_episode_delay")]
    pub max_episode_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Disable images in browser (faster loading)
    #[serde(default = "default_true")]
    pub disable_images: bool,

    /// Fixed user agent; rotated from a built-in pool when unset
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_profiles_path() -> String { "configs.json".to_string() }
fn default_database_path() -> String { "anime_embeds.db".to_string() }
fn default_screenshot_dir() -> String { "screenshots".to_string() }
fn default_bind_host() -> String { "127.0.0.1".to_string() }
fn default_port_range() -> (u16, u16) { (8080, 8090) }
fn default_true() -> bool { true }
fn default_max_retries() -> u32 { 3 }
fn default_backoff_unit() -> u64 { 1000 }
fn default_navigation_timeout() -> u64 { 30 }
fn default_selector_timeout() -> u64 { 5 }
fn default_episode_list_timeout() -> u64 { 30 }
fn default_min_episode_delay() -> u64 { 1000 }
fn default_max_episode_delay() -> u64 { 3000 }
fn default_window_width() -> u32 { 1920 }
fn default_window_height() -> u32 { 1080 }

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit(),
            navigation_timeout_secs: default_navigation_timeout(),
            selector_timeout_secs: default_selector_timeout(),
            episode_list_timeout_secs: default_episode_list_timeout(),
            min_episode_delay_ms: default_min_episode_delay(),
            max_episode_delay_ms: default_max_episode_delay(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: default_window_width(),
            window_height: default_window_height(),
            disable_images: true,
            user_agent: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profiles_path: default_profiles_path(),
            database_path: default_database_path(),
            screenshot_dir: default_screenshot_dir(),
            bind_host: default_bind_host(),
            port_range: default_port_range(),
            extraction: ExtractionConfig::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, or defaults.
    pub fn load() -> Self {
        Self::load_from("config.toml")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<Config>(&content) {
                    Ok(cfg) => return cfg,
                    Err(e) => log::warn!("Ignoring malformed {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("Cannot read {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.port_range.0..=self.port_range.1
    }
}

impl ExtractionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::new(
            Duration::from_millis(self.min_episode_delay_ms),
            Duration::from_millis(self.max_episode_delay_ms),
        )
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }

    pub fn episode_list_timeout(&self) -> Duration {
        Duration::from_secs(self.episode_list_timeout_secs)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            navigation: self.navigation_timeout(),
            selector: self.selector_timeout(),
            episode_list: self.episode_list_timeout(),
        }
    }
}

impl BrowserSettings {
    /// Browser configuration for the headless Chrome launcher
    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            headless: self.headless,
            window_size: (self.window_width, self.window_height),
            user_agent: self.user_agent.clone(),
            disable_images: self.disable_images,
            ..BrowserConfig::default()
        }
    }
}
