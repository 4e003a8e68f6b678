//! The operation exposed to the request layer
//!
//! [`Pipeline::resolve`] validates the URL, finds the site profile, classifies
//! the page and hands it to the embed resolver (episode pages) or the job
//! controller (main pages). [`Pipeline::reload_profiles`] swaps the active
//! site profiles.

use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;
use url::Url;

use crate::browser::{BrowserError, BrowserLauncher};
use crate::config::ExtractionConfig;
use crate::diagnostics::{ArtifactSink, NullSink};
use crate::embed::EmbedResolver;
use crate::episodes::EpisodeListError;
use crate::job::{JobController, JobError};
use crate::metrics::MetricsTracker;
use crate::models::{EpisodeOutcome, PageKind, Resolution};
use crate::retry::{Pacing, RetryPolicy, Sleeper, ThreadSleeper};
use crate::site_registry::{ConfigError, ProfileRegistry, SiteProfile};
use crate::snapshot::SnapshotCache;
use crate::store::{StateStore, StoreError};
use crate::strategy::Timeouts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidUrl,
    UnknownSite,
    UnrecognizedPattern,
    MainPageUnreachable,
    InternalAutomationError,
    PersistenceFailed,
}

impl ErrorKind {
    /// Rejected before any automation ran
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidUrl | ErrorKind::UnknownSite | ErrorKind::UnrecognizedPattern
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no site profile matches {0}")]
    UnknownSite(String),

    #[error("{url} matches no page pattern of site '{site}'")]
    UnrecognizedPattern { site: String, url: String },

    #[error("main page {url} unreachable: {source}")]
    MainPageUnreachable {
        url: String,
        #[source]
        source: EpisodeListError,
        artifact: Option<String>,
    },

    #[error("browser automation failed: {0}")]
    Automation(#[source] BrowserError),

    /// `partial` holds the result that was produced but not saved
    #[error("state store failure: {source}")]
    PersistenceFailed {
        #[source]
        source: StoreError,
        partial: Option<Box<Resolution>>,
    },
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            ResolveError::UnknownSite(_) => ErrorKind::UnknownSite,
            ResolveError::UnrecognizedPattern { .. } => ErrorKind::UnrecognizedPattern,
            ResolveError::MainPageUnreachable { .. } => ErrorKind::MainPageUnreachable,
            ResolveError::Automation(_) => ErrorKind::InternalAutomationError,
            ResolveError::PersistenceFailed { .. } => ErrorKind::PersistenceFailed,
        }
    }
}

impl From<JobError> for ResolveError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Session(e) => ResolveError::Automation(e),
            JobError::MainPage {
                url,
                source,
                artifact,
            } => ResolveError::MainPageUnreachable {
                url,
                source,
                artifact,
            },
            JobError::StateUnavailable(source) => ResolveError::PersistenceFailed {
                source,
                partial: None,
            },
            JobError::Persistence { source, result } => ResolveError::PersistenceFailed {
                source,
                partial: Some(Box::new(Resolution::Job(*result))),
            },
        }
    }
}

/// Tunables of one pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    pub timeouts: Timeouts,
}

impl Settings {
    pub fn from_config(extraction: &ExtractionConfig) -> Self {
        Self {
            retry: extraction.retry_policy(),
            pacing: extraction.pacing(),
            timeouts: extraction.timeouts(),
        }
    }
}

/// External collaborators of the pipeline
pub struct Collaborators {
    pub launcher: Arc<dyn BrowserLauncher>,
    pub store: Arc<dyn StateStore>,
    pub snapshots: Arc<dyn SnapshotCache>,
    pub sink: Arc<dyn ArtifactSink>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Collaborators {
    /// Real sleeps, no screenshots
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<dyn StateStore>,
        snapshots: Arc<dyn SnapshotCache>,
    ) -> Self {
        Self {
            launcher,
            store,
            snapshots,
            sink: Arc::new(NullSink),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

pub struct Pipeline {
    profiles: ProfileRegistry,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<dyn StateStore>,
    embeds: Arc<EmbedResolver>,
    jobs: JobController,
    metrics: Arc<MetricsTracker>,
}

impl Pipeline {
    pub fn new(profiles: ProfileRegistry, parts: Collaborators, settings: Settings) -> Self {
        let metrics = Arc::new(MetricsTracker::new());
        let embeds = Arc::new(EmbedResolver::new(
            parts.snapshots,
            parts.sink.clone(),
            parts.sleeper.clone(),
            metrics.clone(),
            settings.retry,
            settings.timeouts,
        ));
        let jobs = JobController::new(
            parts.store.clone(),
            embeds.clone(),
            parts.sink,
            parts.sleeper,
            settings.pacing,
        );

        Self {
            profiles,
            launcher: parts.launcher,
            store: parts.store,
            embeds,
            jobs,
            metrics,
        }
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    /// Re-read the site profiles. Returns how many are now active.
    pub fn reload_profiles(&self) -> Result<usize, ConfigError> {
        self.profiles.reload()
    }

    pub fn resolve(
        &self,
        url: &str,
        force_refresh: bool,
        continue_job: bool,
    ) -> Result<Resolution, ResolveError> {
        let url = validate_url(url)?;

        // Pin the profile set for the whole request
        let registry = self.profiles.snapshot();
        let profile = registry.resolve(&url).ok_or_else(|| {
            warn!("URL outside every configured domain: {}", url);
            ResolveError::UnknownSite(url.clone())
        })?;
        info!("Identified site '{}' for {}", profile.key, url);

        match profile.classify(&url) {
            PageKind::MainPage => {
                info!("Processing anime main page: {}", url);
                let job = self.jobs.run(
                    self.launcher.as_ref(),
                    &profile,
                    &url,
                    force_refresh,
                    continue_job,
                )?;
                Ok(Resolution::Job(job))
            }
            PageKind::Episode => {
                info!("Processing single episode: {}", url);
                self.resolve_episode(&profile, &url, force_refresh)
            }
            PageKind::Unrecognized => {
                warn!("URL matches no pattern of '{}': {}", profile.key, url);
                Err(ResolveError::UnrecognizedPattern {
                    site: profile.key.clone(),
                    url,
                })
            }
        }
    }

    fn resolve_episode(
        &self,
        profile: &SiteProfile,
        url: &str,
        force_refresh: bool,
    ) -> Result<Resolution, ResolveError> {
        if !force_refresh {
            match self.store.get_episode_result(url) {
                Ok(Some(result)) if result.is_success() => {
                    info!("Stored result found for {}", url);
                    return Ok(Resolution::Episode(EpisodeOutcome {
                        episode_url: url.to_string(),
                        cached: true,
                        result,
                    }));
                }
                Ok(_) => {}
                Err(e) => warn!("Stored result lookup for {} failed: {}", url, e),
            }
        }

        let result = {
            let session = self
                .launcher
                .open_session()
                .map_err(ResolveError::Automation)?;
            self.embeds.resolve_embed(session.as_ref(), profile, url)
        };

        let outcome = EpisodeOutcome {
            episode_url: url.to_string(),
            cached: false,
            result,
        };

        if let Err(source) = self.store.put_episode_result(url, &outcome.result) {
            error!("Failed to save result for {}: {}", url, source);
            return Err(ResolveError::PersistenceFailed {
                source,
                partial: Some(Box::new(Resolution::Episode(outcome))),
            });
        }

        Ok(Resolution::Episode(outcome))
    }
}

/// Non-empty absolute http(s) URL, trimmed
fn validate_url(raw: &str) -> Result<String, ResolveError> {
    let url = raw.trim();
    let invalid = |reason: &str| ResolveError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if url.is_empty() {
        return Err(invalid("URL is required"));
    }
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("URL has no host"));
    }

    // Same form as links collected from episode lists, so cache keys line up
    Ok(parsed.to_string())
}
