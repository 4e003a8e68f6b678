use super::manager::BrowserError;
use super::{BrowserSession, ElementRef, FrameInfo, Scope};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, Tab};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single tab in its own browser process.
///
/// DOM work goes through `Runtime.evaluate`: every query is a small script run
/// against the document of the requested [`Scope`], so frames and the top-level
/// page are handled the same way.
pub struct ChromeSession {
    tab: Arc<Tab>,
    _browser: Browser,
    poll_interval: Duration,
}

impl ChromeSession {
    pub fn new(browser: Browser, tab: Arc<Tab>, poll_interval: Duration) -> Self {
        Self {
            tab,
            _browser: browser,
            poll_interval,
        }
    }

    /// Evaluate `body` with `doc` bound to the scope's document and decode
    /// the JSON envelope it returns.
    fn eval_in(&self, scope: &Scope, body: &str) -> Result<Value, BrowserError> {
        let expr = format!(
            r#"(function() {{
                const doc = {doc};
                if (!doc) {{ return JSON.stringify({{ missing: true }}); }}
                try {{
                    return JSON.stringify({{ value: (function(doc) {{ {body} }})(doc) }});
                }} catch (e) {{
                    return JSON.stringify({{ error: String(e) }});
                }}
            }})()"#,
            doc = scope_document(scope),
            body = body
        );

        let result = self
            .tab
            .evaluate(&expr, false)
            .map_err(|e| BrowserError::Script(e.to_string()))?;

        let text = result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| BrowserError::Script("Script returned no value".to_string()))?;

        let envelope: Value =
            serde_json::from_str(&text).map_err(|e| BrowserError::Script(e.to_string()))?;

        if envelope.get("missing").is_some() {
            let target = match scope {
                Scope::Page => "page".to_string(),
                Scope::Frame(src) => src.clone(),
            };
            return Err(BrowserError::FrameNotFound(target));
        }
        if let Some(err) = envelope.get("error") {
            return Err(BrowserError::Script(err.to_string()));
        }
        Ok(envelope.get("value").cloned().unwrap_or(Value::Null))
    }
}

/// JS string literal for `s`
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn scope_document(scope: &Scope) -> String {
    match scope {
        Scope::Page => "document".to_string(),
        Scope::Frame(src) => format!(
            r#"(function() {{
                const f = Array.from(document.querySelectorAll('iframe'))
                    .find(f => f.getAttribute('src') === {src} || f.src === {src});
                if (!f) {{ return null; }}
                try {{ return f.contentDocument; }} catch (e) {{ return null; }}
            }})()"#,
            src = js_str(src)
        ),
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let start = Instant::now();
        self.tab.set_default_timeout(timeout);

        self.tab
            .navigate_to(url)
            .map_err(|e| BrowserError::Navigation(format!("Failed to navigate to {}: {}", url, e)))?;

        self.tab.wait_until_navigated().map_err(|e| {
            if start.elapsed() >= timeout {
                BrowserError::NavigationTimeout(url.to_string())
            } else {
                BrowserError::Navigation(format!("Navigation failed for {}: {}", url, e))
            }
        })?;

        Ok(())
    }

    fn page_title(&self) -> Result<String, BrowserError> {
        self.tab
            .get_title()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    fn query_selector_all(
        &self,
        scope: &Scope,
        selector: &str,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        let body = format!("return doc.querySelectorAll({}).length;", js_str(selector));
        let count = self.eval_in(scope, &body)?.as_u64().unwrap_or(0) as usize;

        Ok((0..count)
            .map(|index| ElementRef {
                scope: scope.clone(),
                selector: selector.to_string(),
                index,
            })
            .collect())
    }

    fn get_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let body = format!(
            "const el = doc.querySelectorAll({sel})[{idx}];
             if (!el) {{ return {{ found: false }}; }}
             return {{ found: true, value: el.getAttribute({name}) }};",
            sel = js_str(&element.selector),
            idx = element.index,
            name = js_str(name)
        );
        let value = self.eval_in(&element.scope, &body)?;

        if value.get("found").and_then(Value::as_bool) != Some(true) {
            return Err(BrowserError::ElementNotFound(format!(
                "{}[{}]",
                element.selector, element.index
            )));
        }
        Ok(value
            .get("value")
            .and_then(Value::as_str)
            .map(|s| s.to_string()))
    }

    fn wait_for_selector(
        &self,
        scope: &Scope,
        selector: &str,
        timeout: Duration,
    ) -> Result<ElementRef, BrowserError> {
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(BrowserError::SelectorTimeout(selector.to_string()));
            }

            // Errors here usually mean the frame is still loading; keep polling
            if let Ok(mut found) = self.query_selector_all(scope, selector) {
                if !found.is_empty() {
                    return Ok(found.swap_remove(0));
                }
            }

            std::thread::sleep(self.poll_interval);
        }
    }

    fn evaluate_script(&self, scope: &Scope, script: &str) -> Result<Value, BrowserError> {
        self.eval_in(scope, script)
    }

    fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    fn set_sandboxed_content(&self, html: &str, timeout: Duration) -> Result<(), BrowserError> {
        let data_url = format!("data:text/html;charset=utf-8,{}", urlencoding::encode(html));
        self.navigate(&data_url, timeout)
    }

    fn frames(&self) -> Result<Vec<FrameInfo>, BrowserError> {
        let body = r#"
            return Array.from(doc.querySelectorAll('iframe')).map(function(f) {
                let url = null;
                let loaded = false;
                try {
                    url = f.contentWindow.location.href;
                    loaded = !!f.contentDocument && f.contentDocument.readyState === 'complete';
                } catch (e) {}
                return { src: f.getAttribute('src') || '', url: url, loaded: loaded };
            });
        "#;
        let value = self.eval_in(&Scope::Page, body)?;
        serde_json::from_value(value).map_err(|e| BrowserError::Script(e.to_string()))
    }

    fn wait_for_frame(&self, src: &str, timeout: Duration) -> Result<FrameInfo, BrowserError> {
        let start = Instant::now();

        loop {
            let frame = self
                .frames()?
                .into_iter()
                .find(|f| f.src == src)
                .ok_or_else(|| BrowserError::FrameNotFound(src.to_string()))?;

            let navigated = frame
                .url
                .as_deref()
                .map(|u| u != "about:blank")
                .unwrap_or(false);
            if frame.loaded && navigated {
                return Ok(frame);
            }

            if start.elapsed() > timeout {
                return Err(BrowserError::NavigationTimeout(src.to_string()));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            log::warn!("Failed to close browser tab: {}", e);
        }
        log::debug!("Browser session closed");
    }
}
