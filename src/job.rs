//! Multi-episode jobs keyed by the anime main URL
//!
//! A job lists the episodes once, then resolves them one by one, writing the
//! accumulated record to the state store after every episode. Resuming a job
//! reloads that record and only resolves episodes that have no successful
//! result yet.

use std::sync::Arc;

use log::{error, info};

use crate::browser::{BrowserError, BrowserLauncher, BrowserSession};
use crate::diagnostics::{self, ArtifactSink};
use crate::embed::EmbedResolver;
use crate::episodes::{resolve_episodes, EpisodeListError};
use crate::models::{JobRecord, JobResult};
use crate::retry::{Pacing, Sleeper};
use crate::site_registry::SiteProfile;
use crate::store::{StateStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    /// No usable record: list and resolve everything
    Fresh,
    /// Reload the record and fill its gaps
    Resume,
    /// Serve the stored record without a browser
    Cached,
    /// Start over and overwrite whatever is stored
    ForceRefresh,
}

impl JobMode {
    /// Pick the mode from the caller's flags and what the store holds.
    pub fn select(stored: Option<&JobRecord>, force_refresh: bool, continue_job: bool) -> Self {
        match stored {
            _ if force_refresh => JobMode::ForceRefresh,
            None => JobMode::Fresh,
            Some(_) if continue_job => JobMode::Resume,
            Some(_) => JobMode::Cached,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("browser session could not be opened: {0}")]
    Session(#[source] BrowserError),

    #[error("cannot list episodes of {url}: {source}")]
    MainPage {
        url: String,
        #[source]
        source: EpisodeListError,
        artifact: Option<String>,
    },

    #[error("job state unavailable: {0}")]
    StateUnavailable(#[source] StoreError),

    /// The run finished but its final state was not saved
    #[error("job state not saved: {source}")]
    Persistence {
        #[source]
        source: StoreError,
        result: Box<JobResult>,
    },
}

pub struct JobController {
    store: Arc<dyn StateStore>,
    embeds: Arc<EmbedResolver>,
    sink: Arc<dyn ArtifactSink>,
    sleeper: Arc<dyn Sleeper>,
    pacing: Pacing,
}

impl JobController {
    pub fn new(
        store: Arc<dyn StateStore>,
        embeds: Arc<EmbedResolver>,
        sink: Arc<dyn ArtifactSink>,
        sleeper: Arc<dyn Sleeper>,
        pacing: Pacing,
    ) -> Self {
        Self {
            store,
            embeds,
            sink,
            sleeper,
            pacing,
        }
    }

    pub fn run(
        &self,
        launcher: &dyn BrowserLauncher,
        profile: &SiteProfile,
        main_url: &str,
        force_refresh: bool,
        continue_job: bool,
    ) -> Result<JobResult, JobError> {
        let stored = self
            .store
            .get_job_state(main_url)
            .map_err(JobError::StateUnavailable)?;
        let mode = JobMode::select(stored.as_ref(), force_refresh, continue_job);
        info!("Job {} runs in {:?} mode", main_url, mode);

        let record = match (mode, stored) {
            (JobMode::Cached, Some(record)) => {
                info!(
                    "Returning stored job for {} (complete: {})",
                    main_url, record.complete
                );
                return Ok(JobResult::from_record(&record, true, 0));
            }
            (JobMode::Resume, Some(record)) => record,
            _ => JobRecord::new(main_url),
        };

        // Closed on drop, whichever way this returns
        let session = launcher.open_session().map_err(JobError::Session)?;
        self.process(session.as_ref(), profile, main_url, record, mode)
    }

    fn process(
        &self,
        session: &dyn BrowserSession,
        profile: &SiteProfile,
        main_url: &str,
        mut record: JobRecord,
        mode: JobMode,
    ) -> Result<JobResult, JobError> {
        let episodes =
            match resolve_episodes(session, profile, main_url, self.embeds.timeouts()) {
                Ok(episodes) => episodes,
                Err(source) => {
                    let artifact = diagnostics::capture(
                        session,
                        self.sink.as_ref(),
                        source.artifact_prefix(),
                        main_url,
                    );
                    return Err(JobError::MainPage {
                        url: main_url.to_string(),
                        source,
                        artifact,
                    });
                }
            };

        record.set_episodes(episodes.clone());
        record.complete = false;

        let mut checkpoint_failures = 0usize;
        let mut resolved_any = false;

        for (idx, episode_url) in episodes.iter().enumerate() {
            if mode == JobMode::Resume && record.is_processed(episode_url) {
                info!(
                    "Skipping episode {}/{} (already resolved): {}",
                    idx + 1,
                    episodes.len(),
                    episode_url
                );
                continue;
            }

            if resolved_any {
                self.sleeper.sleep(self.pacing.next_delay());
            }
            resolved_any = true;

            info!("Resolving episode {}/{}: {}", idx + 1, episodes.len(), episode_url);
            let result = self.embeds.resolve_embed(session, profile, episode_url);
            record.merge_result(episode_url, result);
            record.mark_complete_if_done();

            if let Err(e) = self.store.put_job_state(main_url, &record) {
                checkpoint_failures += 1;
                error!("Checkpoint after {} failed: {}", episode_url, e);
            }
        }

        record.mark_complete_if_done();
        let result = JobResult::from_record(&record, false, checkpoint_failures);

        match self.store.put_job_state(main_url, &record) {
            Ok(()) => {
                info!(
                    "Job {} saved: {} episodes, {} live, {} from snapshot, {} failed",
                    main_url,
                    result.summary.total,
                    result.summary.live,
                    result.summary.from_snapshot,
                    result.summary.failed
                );
                if checkpoint_failures > 0 {
                    error!(
                        "{} checkpoints of job {} were not saved",
                        checkpoint_failures, main_url
                    );
                }
                Ok(result)
            }
            Err(source) => {
                error!("Failed to save job {}: {}", main_url, source);
                Err(JobError::Persistence {
                    source,
                    result: Box::new(result),
                })
            }
        }
    }
}
