//! Durable state for jobs and single-episode lookups

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{ExtractionResult, JobRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cannot encode record: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Every `put_*` call is atomic: readers see the old record or the new one,
/// never a mix. Concurrent writers to the same key: last write wins.
pub trait StateStore: Send + Sync {
    fn get_job_state(&self, key: &str) -> Result<Option<JobRecord>, StoreError>;

    fn put_job_state(&self, key: &str, record: &JobRecord) -> Result<(), StoreError>;

    fn get_episode_result(&self, url: &str) -> Result<Option<ExtractionResult>, StoreError>;

    fn put_episode_result(&self, url: &str, result: &ExtractionResult) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStateStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
    episodes: Mutex<HashMap<String, ExtractionResult>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get_job_state(&self, key: &str) -> Result<Option<JobRecord>, StoreError> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(jobs.get(key).cloned())
    }

    fn put_job_state(&self, key: &str, record: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        jobs.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn get_episode_result(&self, url: &str) -> Result<Option<ExtractionResult>, StoreError> {
        let episodes = self
            .episodes
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(episodes.get(url).cloned())
    }

    fn put_episode_result(&self, url: &str, result: &ExtractionResult) -> Result<(), StoreError> {
        let mut episodes = self
            .episodes
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        episodes.insert(url.to_string(), result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_roundtrip_and_overwrite() {
        let store = MemoryStateStore::new();
        assert!(store.get_job_state("m").unwrap().is_none());

        let mut record = JobRecord::new("m");
        record.set_episodes(vec!["e1".to_string()]);
        store.put_job_state("m", &record).unwrap();

        record.complete = true;
        store.put_job_state("m", &record).unwrap();
        assert!(store.get_job_state("m").unwrap().unwrap().complete);
    }

    #[test]
    fn test_episode_results_are_separate_from_jobs() {
        let store = MemoryStateStore::new();
        let result = ExtractionResult::Success {
            embed_url: "https://embed.test/x".to_string(),
        };
        store.put_episode_result("e1", &result).unwrap();
        assert_eq!(store.get_episode_result("e1").unwrap(), Some(result));
        assert!(store.get_job_state("e1").unwrap().is_none());
    }
}
