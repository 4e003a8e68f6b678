//! Episode URL → embed URL, with retries and snapshot fallback

use std::sync::Arc;

use log::{info, warn};

use crate::browser::BrowserSession;
use crate::diagnostics::{self, ArtifactSink};
use crate::metrics::MetricsTracker;
use crate::models::ExtractionResult;
use crate::retry::{RetryPolicy, RetryState, Sleeper};
use crate::site_registry::SiteProfile;
use crate::snapshot::SnapshotCache;
use crate::strategy::{ExtractionError, Strategy, Timeouts};

pub struct EmbedResolver {
    snapshots: Arc<dyn SnapshotCache>,
    sink: Arc<dyn ArtifactSink>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<MetricsTracker>,
    policy: RetryPolicy,
    timeouts: Timeouts,
}

impl EmbedResolver {
    pub fn new(
        snapshots: Arc<dyn SnapshotCache>,
        sink: Arc<dyn ArtifactSink>,
        sleeper: Arc<dyn Sleeper>,
        metrics: Arc<MetricsTracker>,
        policy: RetryPolicy,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            snapshots,
            sink,
            sleeper,
            metrics,
            policy,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Resolve one episode. Never fails: every error ends up in the result.
    ///
    /// Transient errors are retried with `2^attempt` backoff until the budget
    /// runs out. Exhausted retries and structural errors both fall back to
    /// the snapshot cache before a [`ExtractionResult::Failure`] is reported.
    pub fn resolve_embed(
        &self,
        session: &dyn BrowserSession,
        profile: &SiteProfile,
        episode_url: &str,
    ) -> ExtractionResult {
        let strategy = Strategy::for_profile(profile);
        let mut retry = RetryState::new();

        let error = loop {
            match strategy.extract_embed(session, profile, episode_url, &self.timeouts) {
                Ok(embed_url) => {
                    self.snapshots.put(episode_url, &embed_url);
                    self.metrics.record_live(&profile.key);
                    return ExtractionResult::Success { embed_url };
                }
                Err(e) if e.is_retryable() => {
                    match retry.record_failure(&self.policy) {
                        Some(delay) => {
                            self.metrics.record_retry(&profile.key, e.is_timeout());
                            warn!(
                                "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                                retry.attempts(),
                                self.policy.max_retries,
                                episode_url,
                                e,
                                delay
                            );
                            self.sleeper.sleep(delay);
                        }
                        None => {
                            warn!(
                                "Giving up on {} after {} attempts: {}",
                                episode_url,
                                retry.attempts(),
                                e
                            );
                            break e;
                        }
                    }
                }
                Err(e) => {
                    warn!("Extraction failed for {}: {}", episode_url, e);
                    break e;
                }
            }
        };

        self.fall_back(session, profile, episode_url, error)
    }

    fn fall_back(
        &self,
        session: &dyn BrowserSession,
        profile: &SiteProfile,
        episode_url: &str,
        error: ExtractionError,
    ) -> ExtractionResult {
        let reason = error.to_string();

        if let Some(embed_url) = self.snapshots.get(episode_url) {
            info!("Using snapshot for {}: {}", episode_url, embed_url);
            self.metrics.record_snapshot(&profile.key, &reason);
            return ExtractionResult::SuccessFromSnapshot {
                embed_url,
                note: format!(
                    "live extraction failed ({}); embed URL is the last one seen live and may be stale",
                    reason
                ),
            };
        }

        let artifact = diagnostics::capture(
            session,
            self.sink.as_ref(),
            error.artifact_prefix(),
            episode_url,
        );
        self.metrics.record_failure(&profile.key, &reason);
        ExtractionResult::Failure { reason, artifact }
    }
}
