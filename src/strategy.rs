//! The two ways of getting at a page's DOM
//!
//! [`Strategy::DirectDom`] navigates the tab to the target URL and queries the
//! top-level document. [`Strategy::SandboxBypass`] navigates to a local page
//! holding one sandboxed `<iframe>` that loads the target, then queries the
//! frame's document instead. Which one a site gets is fixed by its profile.

use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::browser::{BrowserError, BrowserSession, Scope};
use crate::site_registry::SiteProfile;

/// Collects the `src` of every iframe nested in the framed document.
const NESTED_IFRAMES_SCRIPT: &str = r#"
    return Array.from(doc.querySelectorAll('iframe'))
        .map(function(f) { return f.getAttribute('src') || ''; })
        .filter(function(s) { return s.length > 0; });
"#;

/// Bounded waits used while loading and inspecting pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub navigation: Duration,
    /// Per iframe selector on an episode page
    pub selector: Duration,
    pub episode_list: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            selector: Duration::from_secs(5),
            episode_list: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// Timeouts and dropped navigations; worth another attempt
    #[error("transient automation error: {0}")]
    Transient(BrowserError),

    /// Page loaded but no selector yielded an embed URL
    #[error("no embed URL found: {0}")]
    NotFound(String),

    /// Automation failed in a way a retry will not fix
    #[error("automation error: {0}")]
    Structural(BrowserError),
}

impl From<BrowserError> for ExtractionError {
    fn from(err: BrowserError) -> Self {
        if err.is_transient() {
            ExtractionError::Transient(err)
        } else {
            ExtractionError::Structural(err)
        }
    }
}

impl ExtractionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractionError::Transient(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ExtractionError::Transient(
                BrowserError::NavigationTimeout(_) | BrowserError::SelectorTimeout(_)
            )
        )
    }

    /// File name prefix for the failure screenshot
    pub fn artifact_prefix(&self) -> &'static str {
        match self {
            ExtractionError::Transient(_) => "timeout",
            ExtractionError::NotFound(_) => "no_iframe",
            ExtractionError::Structural(_) => "exception",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectDom,
    SandboxBypass,
}

impl Strategy {
    pub fn for_profile(profile: &SiteProfile) -> Self {
        if profile.bypass_mode {
            Strategy::SandboxBypass
        } else {
            Strategy::DirectDom
        }
    }

    /// Load `url` and return the scope its document is reachable through.
    pub fn open_page(
        &self,
        session: &dyn BrowserSession,
        url: &str,
        timeouts: &Timeouts,
    ) -> Result<Scope, BrowserError> {
        match self {
            Strategy::DirectDom => {
                session.navigate(url, timeouts.navigation)?;
                log_title(session, url);
                Ok(Scope::Page)
            }
            Strategy::SandboxBypass => {
                session.set_sandboxed_content(&sandbox_document(url), timeouts.navigation)?;
                let frame = session.wait_for_frame(url, timeouts.navigation)?;
                info!(
                    "Sandboxed frame loaded {}",
                    frame.url.as_deref().unwrap_or(url)
                );
                Ok(Scope::Frame(url.to_string()))
            }
        }
    }

    /// One extraction attempt for an episode page.
    pub fn extract_embed(
        &self,
        session: &dyn BrowserSession,
        profile: &SiteProfile,
        episode_url: &str,
        timeouts: &Timeouts,
    ) -> Result<String, ExtractionError> {
        let scope = self.open_page(session, episode_url, timeouts)?;
        match self {
            Strategy::DirectDom => {
                first_selector_src(session, &scope, &profile.iframe_selectors, timeouts.selector)
            }
            Strategy::SandboxBypass => first_nested_iframe(session, &scope),
        }
    }
}

/// Host document for the bypass strategy. Scripts in the framed page stay off;
/// same-origin access is kept so the frame's DOM can still be read.
pub fn sandbox_document(url: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head>",
            "<body style=\"margin:0\">",
            "<iframe src=\"{}\" sandbox=\"allow-same-origin\" ",
            "style=\"border:0;width:100vw;height:100vh\"></iframe>",
            "</body></html>"
        ),
        escape_attribute(url)
    )
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn log_title(session: &dyn BrowserSession, url: &str) {
    match session.page_title() {
        Ok(title) => info!("Page title for {}: {}", url, title),
        Err(e) => debug!("Could not read page title for {}: {}", url, e),
    }
}

/// Try each selector in order; the first element with a non-empty `src` wins.
fn first_selector_src(
    session: &dyn BrowserSession,
    scope: &Scope,
    selectors: &[String],
    timeout: Duration,
) -> Result<String, ExtractionError> {
    for selector in selectors {
        let element = match session.wait_for_selector(scope, selector, timeout) {
            Ok(el) => el,
            Err(BrowserError::SelectorTimeout(_)) | Err(BrowserError::ElementNotFound(_)) => {
                warn!("Selector \"{}\" did not find a valid iframe", selector);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match session.get_attribute(&element, "src") {
            Ok(Some(src)) if !src.trim().is_empty() => {
                info!("Embed URL found with selector \"{}\": {}", selector, src);
                return Ok(src);
            }
            Ok(_) => warn!("Selector \"{}\" matched an element without src", selector),
            Err(BrowserError::ElementNotFound(_)) => {
                warn!("Element for selector \"{}\" went away before its src was read", selector);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ExtractionError::NotFound(format!(
        "none of {} iframe selectors matched",
        selectors.len()
    )))
}

fn first_nested_iframe(
    session: &dyn BrowserSession,
    scope: &Scope,
) -> Result<String, ExtractionError> {
    let value = session.evaluate_script(scope, NESTED_IFRAMES_SCRIPT)?;
    let srcs = string_list(value)?;
    let srcs = dedupe_preserving_order(srcs);
    debug!("Nested iframes: {:?}", srcs);

    srcs.into_iter()
        .next()
        .ok_or_else(|| ExtractionError::NotFound("framed page has no nested iframe".to_string()))
}

fn string_list(value: Value) -> Result<Vec<String>, ExtractionError> {
    serde_json::from_value(value)
        .map_err(|e| ExtractionError::Structural(BrowserError::Script(e.to_string())))
}

/// Collect the `href` of every element matching `selector`, in document order.
pub fn collect_hrefs(
    session: &dyn BrowserSession,
    scope: &Scope,
    selector: &str,
) -> Result<Vec<String>, BrowserError> {
    let elements = session.query_selector_all(scope, selector)?;
    let mut hrefs = Vec::with_capacity(elements.len());
    for element in &elements {
        if let Some(href) = session.get_attribute(element, "href")? {
            if !href.trim().is_empty() {
                hrefs.push(href);
            }
        }
    }
    Ok(hrefs)
}

/// Drop repeats, keeping the first occurrence of each value.
pub fn dedupe_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_document_escapes_url() {
        let html = sandbox_document("https://site.test/watch?a=1&b=\"2\"");
        assert!(html.contains("src=\"https://site.test/watch?a=1&amp;b=&quot;2&quot;\""));
        assert!(html.contains("sandbox=\"allow-same-origin\""));
        assert_eq!(html.matches("<iframe").count(), 1);
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let out = dedupe_preserving_order(vec![
            "A".to_string(),
            "B".to_string(),
            "A".to_string(),
        ]);
        assert_eq!(out, vec!["A", "B"]);
    }

    #[test]
    fn test_error_classification() {
        let timeout = ExtractionError::from(BrowserError::NavigationTimeout("u".into()));
        assert!(timeout.is_retryable());
        assert!(timeout.is_timeout());
        assert_eq!(timeout.artifact_prefix(), "timeout");

        let dropped = ExtractionError::from(BrowserError::Navigation("reset".into()));
        assert!(dropped.is_retryable());
        assert!(!dropped.is_timeout());

        let missing = ExtractionError::from(BrowserError::FrameNotFound("u".into()));
        assert!(!missing.is_retryable());
        assert_eq!(missing.artifact_prefix(), "exception");

        assert_eq!(
            ExtractionError::NotFound("x".into()).artifact_prefix(),
            "no_iframe"
        );
    }
}
