use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of page a URL points at, per the site's URL patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    MainPage,
    Episode,
    Unrecognized,
}

/// Outcome of resolving one episode URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionResult {
    Success {
        embed_url: String,
    },
    SuccessFromSnapshot {
        embed_url: String,
        note: String,
    },
    Failure {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
    },
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, ExtractionResult::Failure { .. })
    }

    pub fn embed_url(&self) -> Option<&str> {
        match self {
            ExtractionResult::Success { embed_url }
            | ExtractionResult::SuccessFromSnapshot { embed_url, .. } => Some(embed_url),
            ExtractionResult::Failure { .. } => None,
        }
    }

    /// Higher is better: live success, then snapshot, then failure
    pub fn rank(&self) -> u8 {
        match self {
            ExtractionResult::Success { .. } => 2,
            ExtractionResult::SuccessFromSnapshot { .. } => 1,
            ExtractionResult::Failure { .. } => 0,
        }
    }
}

/// Persisted state of a multi-episode job, keyed by the main page URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub main_url: String,
    /// Episode URLs in document order, as last resolved
    pub episodes: Vec<String>,
    pub results: HashMap<String, ExtractionResult>,
    /// Every listed episode has a result
    pub complete: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(main_url: &str) -> Self {
        let now = Utc::now();
        Self {
            main_url: main_url.to_string(),
            episodes: Vec::new(),
            results: HashMap::new(),
            complete: false,
            started_at: now,
            updated_at: now,
        }
    }

    /// Episodes that resume must not touch again
    pub fn is_processed(&self, episode_url: &str) -> bool {
        self.results
            .get(episode_url)
            .map(ExtractionResult::is_success)
            .unwrap_or(false)
    }

    /// Keep the better of the stored and new result for an episode.
    pub fn merge_result(&mut self, episode_url: &str, result: ExtractionResult) {
        match self.results.get(episode_url) {
            Some(existing) if existing.rank() > result.rank() => {
                log::debug!(
                    "Keeping stored result for {} over a worse new one",
                    episode_url
                );
            }
            _ => {
                self.results.insert(episode_url.to_string(), result);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Replace the episode list, keeping results of episodes that vanished
    /// from the site at the end of the list.
    pub fn set_episodes(&mut self, episodes: Vec<String>) {
        let mut ordered = episodes;
        let mut extras: Vec<String> = self
            .episodes
            .iter()
            .filter(|e| !ordered.contains(e) && self.results.contains_key(*e))
            .cloned()
            .collect();
        ordered.append(&mut extras);
        self.episodes = ordered;
        self.updated_at = Utc::now();
    }

    pub fn mark_complete_if_done(&mut self) {
        self.complete = self
            .episodes
            .iter()
            .all(|e| self.results.contains_key(e));
    }

    pub fn summary(&self) -> JobSummary {
        let mut summary = JobSummary {
            total: self.episodes.len(),
            ..JobSummary::default()
        };
        for result in self.episodes.iter().filter_map(|e| self.results.get(e)) {
            match result {
                ExtractionResult::Success { .. } => summary.live += 1,
                ExtractionResult::SuccessFromSnapshot { .. } => summary.from_snapshot += 1,
                ExtractionResult::Failure { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub total: usize,
    pub live: usize,
    pub from_snapshot: usize,
    pub failed: usize,
}

/// One episode entry of a job response, in list order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeEntry {
    pub episode_url: String,
    #[serde(flatten)]
    pub result: Option<ExtractionResult>,
}

/// Job outcome handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub anime_main_url: String,
    pub complete: bool,
    /// Served from the store without touching a browser
    pub cached: bool,
    pub summary: JobSummary,
    pub episodes: Vec<EpisodeEntry>,
    /// Checkpoint writes that failed during this run. The final save
    /// succeeded when this is returned, but a crash mid-run would have lost
    /// the episodes resolved since the last good checkpoint.
    pub checkpoint_failures: usize,
}

impl JobResult {
    pub fn from_record(record: &JobRecord, cached: bool, checkpoint_failures: usize) -> Self {
        Self {
            anime_main_url: record.main_url.clone(),
            complete: record.complete,
            cached,
            summary: record.summary(),
            episodes: record
                .episodes
                .iter()
                .map(|e| EpisodeEntry {
                    episode_url: e.clone(),
                    result: record.results.get(e).cloned(),
                })
                .collect(),
            checkpoint_failures,
        }
    }
}

/// What `resolve` produces for a valid request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resolution {
    Episode(EpisodeOutcome),
    Job(JobResult),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeOutcome {
    pub episode_url: String,
    pub cached: bool,
    #[serde(flatten)]
    pub result: ExtractionResult,
}
