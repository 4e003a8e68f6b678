//! Site profiles: which site a URL belongs to and what kind of page it is
//!
//! Profiles come from a JSON file keyed by site name. The active set is an
//! immutable [`SiteRegistry`] behind an `Arc`; a reload builds a complete new
//! registry and swaps the pointer, so a running job keeps the profile it
//! started with and never sees a half-loaded file.

use regex::Regex;
use serde::Deserialize;
use serde_json::Map;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::models::PageKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed site profiles: {0}")]
    Json(#[from] serde_json::Error),

    #[error("site '{site}' has an invalid {which} pattern: {source}")]
    InvalidPattern {
        site: String,
        which: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("site '{site}' has an empty {which}")]
    Empty { site: String, which: &'static str },

    #[error("sites '{first}' and '{second}' have overlapping domains")]
    OverlappingDomains { first: String, second: String },
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    domain: String,
    url_patterns: RawPatterns,
    selectors: RawSelectors,
    #[serde(default)]
    bypass_mode: bool,
}

#[derive(Debug, Deserialize)]
struct RawPatterns {
    anime_main: String,
    episode: String,
}

#[derive(Debug, Deserialize)]
struct RawSelectors {
    anime_main: RawMainSelectors,
    episode: RawEpisodeSelectors,
}

#[derive(Debug, Deserialize)]
struct RawMainSelectors {
    episodes_section: String,
}

#[derive(Debug, Deserialize)]
struct RawEpisodeSelectors {
    #[serde(default)]
    iframe_selectors: Vec<String>,
}

/// Everything the pipeline needs to know about one site
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub key: String,
    /// Substring identifying the site in a URL
    pub domain: String,
    main_page_pattern: Regex,
    episode_pattern: Regex,
    /// Tried in order; the first non-empty `src` wins
    pub iframe_selectors: Vec<String>,
    /// Anchors on the main page linking to episodes
    pub episode_list_selector: String,
    /// Load pages inside a sandboxed iframe instead of navigating to them
    pub bypass_mode: bool,
}

/// Anchor at position 0 only, like a prefix match
fn compile_anchored(site: &str, which: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::Empty {
            site: site.to_string(),
            which,
        });
    }
    Regex::new(&format!("^(?:{})", pattern)).map_err(|source| ConfigError::InvalidPattern {
        site: site.to_string(),
        which,
        source,
    })
}

impl SiteProfile {
    fn from_raw(key: &str, raw: RawProfile) -> Result<Self, ConfigError> {
        if raw.domain.trim().is_empty() {
            return Err(ConfigError::Empty {
                site: key.to_string(),
                which: "domain",
            });
        }
        if raw.selectors.anime_main.episodes_section.trim().is_empty() {
            return Err(ConfigError::Empty {
                site: key.to_string(),
                which: "episodes_section selector",
            });
        }

        Ok(Self {
            key: key.to_string(),
            domain: raw.domain,
            main_page_pattern: compile_anchored(key, "anime_main", &raw.url_patterns.anime_main)?,
            episode_pattern: compile_anchored(key, "episode", &raw.url_patterns.episode)?,
            iframe_selectors: raw
                .selectors
                .episode
                .iframe_selectors
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .collect(),
            episode_list_selector: raw.selectors.anime_main.episodes_section,
            bypass_mode: raw.bypass_mode,
        })
    }

    /// Main page patterns are checked before episode patterns.
    pub fn classify(&self, url: &str) -> PageKind {
        if self.main_page_pattern.is_match(url) {
            PageKind::MainPage
        } else if self.episode_pattern.is_match(url) {
            PageKind::Episode
        } else {
            PageKind::Unrecognized
        }
    }
}

/// Immutable set of site profiles in file order
#[derive(Debug, Default)]
pub struct SiteRegistry {
    profiles: Vec<Arc<SiteProfile>>,
}

impl SiteRegistry {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: Map<String, serde_json::Value> = serde_json::from_str(json)?;

        let mut profiles: Vec<Arc<SiteProfile>> = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let profile = SiteProfile::from_raw(&key, serde_json::from_value(value)?)?;

            if let Some(other) = profiles
                .iter()
                .find(|p| p.domain.contains(&profile.domain) || profile.domain.contains(&p.domain))
            {
                return Err(ConfigError::OverlappingDomains {
                    first: other.key.clone(),
                    second: key,
                });
            }
            profiles.push(Arc::new(profile));
        }

        Ok(Self { profiles })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// First profile (in file order) whose domain occurs in `url`.
    pub fn resolve(&self, url: &str) -> Option<Arc<SiteProfile>> {
        self.profiles
            .iter()
            .find(|p| url.contains(&p.domain))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// The live registry plus the file it reloads from
pub struct ProfileRegistry {
    path: PathBuf,
    current: RwLock<Arc<SiteRegistry>>,
}

impl ProfileRegistry {
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self, ConfigError> {
        let path = path.into();
        let registry = SiteRegistry::load(&path)?;
        log::info!(
            "Loaded {} site profiles from {}",
            registry.len(),
            path.display()
        );
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(registry)),
        })
    }

    /// Fixed registry with no backing file; reloads re-read nothing.
    pub fn from_registry(registry: SiteRegistry) -> Self {
        Self {
            path: PathBuf::new(),
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// The registry as of now. Later reloads do not affect it.
    pub fn snapshot(&self) -> Arc<SiteRegistry> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the profile file and swap it in. On error the old set stays.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Ok(self.snapshot().len());
        }

        let registry = match SiteRegistry::load(&self.path) {
            Ok(r) => r,
            Err(e) => {
                log::error!("Profile reload failed, keeping previous profiles: {}", e);
                return Err(e);
            }
        };
        let count = registry.len();

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(registry);

        log::info!("Reloaded {} site profiles", count);
        Ok(count)
    }
}
