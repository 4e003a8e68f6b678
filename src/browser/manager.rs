use super::config::BrowserConfig;
use super::scraper::ChromeSession;
use super::{BrowserLauncher, BrowserSession};
use headless_chrome::{Browser, LaunchOptions};
use std::ffi::OsStr;
use std::time::Duration;

/// Launches one headless Chrome per session so concurrent jobs never share
/// a browser.
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn launch(&self) -> Result<Browser, BrowserError> {
        let args = self.config.chrome_args();
        let arg_refs: Vec<&OsStr> = args.iter().map(OsStr::new).collect();

        let options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .window_size(Some(self.config.window_size))
            .idle_browser_timeout(Duration::from_secs(300))
            .args(arg_refs)
            .build()
            .map_err(|e| BrowserError::Initialization(e.to_string()))?;

        Browser::new(options).map_err(|e| BrowserError::Initialization(e.to_string()))
    }
}

impl BrowserLauncher for ChromeLauncher {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let browser = self.launch()?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::TabCreation(e.to_string()))?;
        log::debug!("Browser session opened");
        Ok(Box::new(ChromeSession::new(
            browser,
            tab,
            self.config.poll_interval,
        )))
    }
}

/// Errors that can occur during browser operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    Initialization(String),

    #[error("Tab creation failed: {0}")]
    TabCreation(String),

    #[error("Navigation to {0} timed out")]
    NavigationTimeout(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Timeout waiting for selector: {0}")]
    SelectorTimeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Frame not found: {0}")]
    FrameNotFound(String),

    #[error("JavaScript execution error: {0}")]
    Script(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),
}

impl BrowserError {
    /// Timeouts and navigation hiccups are worth another attempt; anything
    /// else means the page does not look the way the profile expects.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::NavigationTimeout(_)
                | BrowserError::Navigation(_)
                | BrowserError::SelectorTimeout(_)
        )
    }
}
