//! Browser automation for pages that only render inside a real browser
//!
//! The extraction pipeline never talks to Chrome directly. It drives a
//! [`BrowserSession`], obtained from a [`BrowserLauncher`] at the start of a
//! job and dropped (closing the tab) on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use anime_embed_resolver::browser::{BrowserConfig, BrowserLauncher, ChromeLauncher, Scope};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let launcher = ChromeLauncher::new(BrowserConfig::default());
//! let session = launcher.open_session()?;
//!
//! session.navigate("https://example.com", Duration::from_secs(30))?;
//! let heading = session.wait_for_selector(&Scope::Page, "h1", Duration::from_secs(5))?;
//! println!("{:?}", session.get_attribute(&heading, "class")?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod scraper;

use std::time::Duration;

pub use config::BrowserConfig;
pub use manager::{BrowserError, ChromeLauncher};
pub use scraper::ChromeSession;

/// Where a DOM operation runs: the top-level document or one of its iframes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Page,
    /// The iframe whose `src` equals this URL
    Frame(String),
}

/// Locator-style handle to the `index`-th match of `selector` inside `scope`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub scope: Scope,
    pub selector: String,
    pub index: usize,
}

/// An iframe of the current page
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct FrameInfo {
    /// Value of the `src` attribute
    pub src: String,
    /// Current location of the frame, when readable
    pub url: Option<String>,
    /// Whether the frame document finished loading
    pub loaded: bool,
}

/// Primitives the pipeline needs from a browser tab.
///
/// Every failure comes back as a [`BrowserError`] variant so callers can
/// classify it without looking at message text.
pub trait BrowserSession {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    fn page_title(&self) -> Result<String, BrowserError>;

    fn query_selector_all(
        &self,
        scope: &Scope,
        selector: &str,
    ) -> Result<Vec<ElementRef>, BrowserError>;

    fn get_attribute(&self, element: &ElementRef, name: &str)
        -> Result<Option<String>, BrowserError>;

    fn wait_for_selector(
        &self,
        scope: &Scope,
        selector: &str,
        timeout: Duration,
    ) -> Result<ElementRef, BrowserError>;

    /// Runs `script` as a function body with the scope's document bound to
    /// `doc` and returns its JSON-serialisable result.
    fn evaluate_script(&self, scope: &Scope, script: &str)
        -> Result<serde_json::Value, BrowserError>;

    fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;

    /// Replaces the page with a locally built HTML document.
    fn set_sandboxed_content(&self, html: &str, timeout: Duration) -> Result<(), BrowserError>;

    fn frames(&self) -> Result<Vec<FrameInfo>, BrowserError>;

    /// Waits until the iframe with the given `src` has finished navigating.
    fn wait_for_frame(&self, src: &str, timeout: Duration) -> Result<FrameInfo, BrowserError>;
}

/// Hands out one isolated session per job
pub trait BrowserLauncher: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}
