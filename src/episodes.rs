use log::{error, info};
use url::Url;

use crate::browser::{BrowserError, BrowserSession};
use crate::site_registry::SiteProfile;
use crate::strategy::{collect_hrefs, dedupe_preserving_order, Strategy, Timeouts};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EpisodeListError {
    #[error("main page did not load: {0}")]
    Unreachable(BrowserError),

    #[error("episode section '{selector}' not found: {source}")]
    SectionMissing {
        selector: String,
        #[source]
        source: BrowserError,
    },

    #[error("failed to read episode links: {0}")]
    Automation(BrowserError),
}

impl EpisodeListError {
    pub fn artifact_prefix(&self) -> &'static str {
        match self {
            EpisodeListError::Unreachable(_) => "timeout",
            EpisodeListError::SectionMissing { .. } => "no_episodes_section",
            EpisodeListError::Automation(_) => "exception",
        }
    }
}

/// Ordered episode URLs listed on an anime main page.
///
/// Single shot: a load failure or a missing episode section is an error for
/// the caller to handle. A section with no links is `Ok(vec![])`.
pub fn resolve_episodes(
    session: &dyn BrowserSession,
    profile: &SiteProfile,
    main_url: &str,
    timeouts: &Timeouts,
) -> Result<Vec<String>, EpisodeListError> {
    let strategy = Strategy::for_profile(profile);
    let selector = profile.episode_list_selector.as_str();

    let scope = strategy
        .open_page(session, main_url, timeouts)
        .map_err(|e| {
            error!("Failed to load main page {}: {}", main_url, e);
            EpisodeListError::Unreachable(e)
        })?;

    session
        .wait_for_selector(&scope, selector, timeouts.episode_list)
        .map_err(|e| {
            error!("Episode section not found for {}: {}", main_url, e);
            EpisodeListError::SectionMissing {
                selector: selector.to_string(),
                source: e,
            }
        })?;

    let hrefs = collect_hrefs(session, &scope, selector).map_err(|e| {
        error!("Failed to extract episode URLs from {}: {}", main_url, e);
        EpisodeListError::Automation(e)
    })?;

    let episodes = dedupe_preserving_order(absolutize(main_url, hrefs));
    info!("Found {} episode URLs", episodes.len());
    for (idx, ep) in episodes.iter().take(5).enumerate() {
        info!("Episode {}: {}", idx + 1, ep);
    }

    Ok(episodes)
}

/// Resolve relative hrefs against the page they came from.
fn absolutize(base: &str, hrefs: Vec<String>) -> Vec<String> {
    let base = Url::parse(base).ok();
    hrefs
        .into_iter()
        .filter_map(|href| {
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                return None;
            }
            match &base {
                Some(b) => b.join(href).ok().map(|u| u.to_string()),
                None => Some(href.to_string()),
            }
        })
        .collect()
}
