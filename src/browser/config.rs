use rand::Rng;
use std::time::Duration;

/// Desktop user agents rotated per session when none is configured
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Configuration for browser instances
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,

    /// Browser window size
    pub window_size: (u32, u32),

    /// Fixed user agent; a random one from [`USER_AGENTS`] otherwise
    pub user_agent: Option<String>,

    /// Disable image loading for performance
    pub disable_images: bool,

    /// Interval between DOM polls while waiting on selectors and frames
    pub poll_interval: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1920, 1080),
            user_agent: None,
            disable_images: true,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl BrowserConfig {
    pub fn pick_user_agent(&self) -> String {
        match &self.user_agent {
            Some(ua) => ua.clone(),
            None => {
                let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
                USER_AGENTS[idx].to_string()
            }
        }
    }

    /// Chrome flags for this configuration.
    ///
    /// Web security and site isolation are off so the host page can read the
    /// DOM of a sandboxed cross-origin iframe.
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-sandbox".to_string(),
            "--disable-web-security".to_string(),
            "--disable-features=IsolateOrigins,site-per-process".to_string(),
            format!("--user-agent={}", self.pick_user_agent()),
        ];
        if self.disable_images {
            args.push("--blink-settings=imagesEnabled=false".to_string());
        }
        args
    }
}
