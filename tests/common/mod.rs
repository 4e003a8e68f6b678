//! Scripted browser, stores and sleeper for driving the pipeline without Chrome

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anime_embed_resolver::browser::{
    BrowserError, BrowserLauncher, BrowserSession, ElementRef, FrameInfo, Scope,
};
use anime_embed_resolver::diagnostics::ArtifactSink;
use anime_embed_resolver::models::{ExtractionResult, JobRecord};
use anime_embed_resolver::pipeline::{Collaborators, Pipeline, Settings};
use anime_embed_resolver::retry::{Pacing, RetryPolicy, Sleeper};
use anime_embed_resolver::site_registry::{ProfileRegistry, SiteRegistry};
use anime_embed_resolver::snapshot::{MemorySnapshotCache, SnapshotCache};
use anime_embed_resolver::store::{MemoryStateStore, StateStore, StoreError};
use anime_embed_resolver::strategy::Timeouts;

pub const PROFILES: &str = r#"{
    "animesite": {
        "domain": "animesite.test",
        "url_patterns": {
            "anime_main": "https://animesite\\.test/anime/[^/]+/?$",
            "episode": "https://animesite\\.test/episode/"
        },
        "selectors": {
            "anime_main": { "episodes_section": "ul.episodes a" },
            "episode": { "iframe_selectors": [".playerA", ".playerB"] }
        },
        "bypass_mode": false
    },
    "guarded": {
        "domain": "guarded.test",
        "url_patterns": {
            "anime_main": "https://guarded\\.test/show/",
            "episode": "https://guarded\\.test/watch/"
        },
        "selectors": {
            "anime_main": { "episodes_section": "a.ep" },
            "episode": { "iframe_selectors": [] }
        },
        "bypass_mode": true
    }
}"#;

pub const EPISODE_LIST: &str = "ul.episodes a";

/// One page of the fake web
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub title: String,
    /// selector → attributes of each matching element
    pub elements: HashMap<String, Vec<HashMap<String, String>>>,
    /// `src` of the iframes inside the page
    pub nested_iframes: Vec<String>,
    /// Every load fails with this error
    pub broken: Option<BrowserError>,
    /// Selectors whose elements are gone by the time an attribute is read
    pub vanishing: Vec<String>,
}

impl FakePage {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub fn with_element(mut self, selector: &str, attrs: &[(&str, &str)]) -> Self {
        let attrs = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.elements
            .entry(selector.to_string())
            .or_default()
            .push(attrs);
        self
    }

    pub fn with_links(mut self, selector: &str, hrefs: &[&str]) -> Self {
        for href in hrefs {
            self = self.with_element(selector, &[("href", href)]);
        }
        self
    }

    pub fn with_nested_iframes(mut self, srcs: &[&str]) -> Self {
        self.nested_iframes = srcs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// An element that matches `selector` but detaches before it can be read.
    pub fn with_vanishing_element(mut self, selector: &str) -> Self {
        self = self.with_element(selector, &[("src", "https://embed.example/gone")]);
        self.vanishing.push(selector.to_string());
        self
    }

    pub fn broken(mut self, err: BrowserError) -> Self {
        self.broken = Some(err);
        self
    }
}

#[derive(Default)]
struct World {
    pages: HashMap<String, FakePage>,
    transient_failures: HashMap<String, u32>,
    loads: Vec<String>,
    sessions_opened: usize,
    sessions_closed: usize,
    fail_launch: bool,
}

impl World {
    fn load(&mut self, url: &str) -> Result<(), BrowserError> {
        self.loads.push(url.to_string());
        if let Some(left) = self.transient_failures.get_mut(url) {
            if *left > 0 {
                *left -= 1;
                return Err(BrowserError::NavigationTimeout(url.to_string()));
            }
        }
        match self.pages.get(url).and_then(|p| p.broken.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Shared handle to the scripted pages and the call log
#[derive(Clone, Default)]
pub struct FakeWeb {
    world: Arc<Mutex<World>>,
}

impl FakeWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&self, url: &str, page: FakePage) {
        self.world.lock().unwrap().pages.insert(url.to_string(), page);
    }

    /// The next `times` loads of `url` time out.
    pub fn fail_transiently(&self, url: &str, times: u32) {
        self.world
            .lock()
            .unwrap()
            .transient_failures
            .insert(url.to_string(), times);
    }

    pub fn fail_launch(&self) {
        self.world.lock().unwrap().fail_launch = true;
    }

    pub fn loads(&self) -> Vec<String> {
        self.world.lock().unwrap().loads.clone()
    }

    pub fn loads_of(&self, url: &str) -> usize {
        self.world
            .lock()
            .unwrap()
            .loads
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    pub fn sessions_opened(&self) -> usize {
        self.world.lock().unwrap().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.world.lock().unwrap().sessions_closed
    }

    pub fn launcher(&self) -> Arc<FakeLauncher> {
        Arc::new(FakeLauncher { web: self.clone() })
    }
}

pub struct FakeLauncher {
    web: FakeWeb,
}

impl BrowserLauncher for FakeLauncher {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut world = self.web.world.lock().unwrap();
        if world.fail_launch {
            return Err(BrowserError::Initialization("chrome not installed".to_string()));
        }
        world.sessions_opened += 1;
        Ok(Box::new(FakeSession {
            web: self.web.clone(),
            current: RefCell::new(None),
            frame: RefCell::new(None),
        }))
    }
}

pub struct FakeSession {
    web: FakeWeb,
    current: RefCell<Option<String>>,
    /// `src` of the sandboxed iframe, once the host document is set
    frame: RefCell<Option<String>>,
}

impl FakeSession {
    fn page_for(&self, scope: &Scope) -> Result<FakePage, BrowserError> {
        let url = match scope {
            Scope::Page => self.current.borrow().clone().unwrap_or_default(),
            Scope::Frame(src) => {
                if self.frame.borrow().as_deref() != Some(src.as_str()) {
                    return Err(BrowserError::FrameNotFound(src.clone()));
                }
                src.clone()
            }
        };
        let world = self.web.world.lock().unwrap();
        Ok(world.pages.get(&url).cloned().unwrap_or_default())
    }
}

fn iframe_src(html: &str) -> Option<String> {
    let start = html.find("src=\"")? + 5;
    let end = html[start..].find('"')? + start;
    Some(
        html[start..end]
            .replace("&quot;", "\"")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

impl BrowserSession for FakeSession {
    fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.web.world.lock().unwrap().load(url)?;
        *self.current.borrow_mut() = Some(url.to_string());
        *self.frame.borrow_mut() = None;
        Ok(())
    }

    fn page_title(&self) -> Result<String, BrowserError> {
        Ok(self.page_for(&Scope::Page)?.title)
    }

    fn query_selector_all(
        &self,
        scope: &Scope,
        selector: &str,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        let page = self.page_for(scope)?;
        let count = page.elements.get(selector).map(Vec::len).unwrap_or(0);
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
        let page = self.page_for(&element.scope)?;
        if page.vanishing.contains(&element.selector) {
            return Err(BrowserError::ElementNotFound(element.selector.clone()));
        }
        page.elements
            .get(&element.selector)
            .and_then(|els| els.get(element.index))
            .map(|attrs| attrs.get(name).cloned())
            .ok_or_else(|| BrowserError::ElementNotFound(element.selector.clone()))
    }

    fn wait_for_selector(
        &self,
        scope: &Scope,
        selector: &str,
        _timeout: Duration,
    ) -> Result<ElementRef, BrowserError> {
        self.query_selector_all(scope, selector)?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::SelectorTimeout(selector.to_string()))
    }

    fn evaluate_script(
        &self,
        scope: &Scope,
        _script: &str,
    ) -> Result<serde_json::Value, BrowserError> {
        Ok(serde_json::json!(self.page_for(scope)?.nested_iframes))
    }

    fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        Ok(b"fake-png".to_vec())
    }

    fn set_sandboxed_content(&self, html: &str, _timeout: Duration) -> Result<(), BrowserError> {
        *self.current.borrow_mut() = Some("data:text/html".to_string());
        *self.frame.borrow_mut() = iframe_src(html);
        Ok(())
    }

    fn frames(&self) -> Result<Vec<FrameInfo>, BrowserError> {
        Ok(self
            .frame
            .borrow()
            .iter()
            .map(|src| FrameInfo {
                src: src.clone(),
                url: Some(src.clone()),
                loaded: true,
            })
            .collect())
    }

    fn wait_for_frame(&self, src: &str, _timeout: Duration) -> Result<FrameInfo, BrowserError> {
        if self.frame.borrow().as_deref() != Some(src) {
            return Err(BrowserError::FrameNotFound(src.to_string()));
        }
        self.web.world.lock().unwrap().load(src)?;
        Ok(FrameInfo {
            src: src.to_string(),
            url: Some(src.to_string()),
            loaded: true,
        })
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut world) = self.web.world.lock() {
            world.sessions_closed += 1;
        }
    }
}

/// Records every requested sleep instead of sleeping
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Keeps `(prefix, url)` of every stored artifact
#[derive(Default)]
pub struct RecordingSink {
    stored: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn stored(&self) -> Vec<(String, String)> {
        self.stored.lock().unwrap().clone()
    }
}

impl ArtifactSink for RecordingSink {
    fn store(&self, prefix: &str, url: &str, _bytes: &[u8]) -> Option<String> {
        self.stored
            .lock()
            .unwrap()
            .push((prefix.to_string(), url.to_string()));
        Some(format!("mem://{}/{}", prefix, url))
    }
}

/// In-memory store that keeps a copy of every job checkpoint and can be
/// told to reject writes.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStateStore,
    checkpoints: Mutex<Vec<JobRecord>>,
    reject_writes: AtomicBool,
    job_writes_to_reject: AtomicUsize,
}

impl RecordingStore {
    pub fn checkpoints(&self) -> Vec<JobRecord> {
        self.checkpoints.lock().unwrap().clone()
    }

    pub fn reject_writes(&self) {
        self.reject_writes.store(true, Ordering::SeqCst);
    }

    /// Only the next `n` job state writes fail.
    pub fn reject_next_job_writes(&self, n: usize) {
        self.job_writes_to_reject.store(n, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("disk full".to_string()))
        } else {
            Ok(())
        }
    }
}

impl StateStore for RecordingStore {
    fn get_job_state(&self, key: &str) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get_job_state(key)
    }

    fn put_job_state(&self, key: &str, record: &JobRecord) -> Result<(), StoreError> {
        self.check()?;
        let rejected = self
            .job_writes_to_reject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(StoreError::Unavailable("write timed out".to_string()));
        }
        self.checkpoints.lock().unwrap().push(record.clone());
        self.inner.put_job_state(key, record)
    }

    fn get_episode_result(&self, url: &str) -> Result<Option<ExtractionResult>, StoreError> {
        self.inner.get_episode_result(url)
    }

    fn put_episode_result(&self, url: &str, result: &ExtractionResult) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put_episode_result(url, result)
    }
}

/// Everything a test needs to look at after driving the pipeline
pub struct Harness {
    pub web: FakeWeb,
    pub store: Arc<RecordingStore>,
    pub snapshots: Arc<MemorySnapshotCache>,
    pub sleeper: Arc<RecordingSleeper>,
    pub sink: Arc<RecordingSink>,
    pub pipeline: Pipeline,
}

pub fn settings() -> Settings {
    Settings {
        retry: RetryPolicy {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
        },
        pacing: Pacing::new(Duration::from_secs(1), Duration::from_secs(3)),
        timeouts: Timeouts::default(),
    }
}

impl Harness {
    pub fn new(web: FakeWeb) -> Self {
        Self::with_store(web, Arc::new(RecordingStore::default()))
    }

    pub fn with_store(web: FakeWeb, store: Arc<RecordingStore>) -> Self {
        let snapshots = Arc::new(MemorySnapshotCache::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let sink = Arc::new(RecordingSink::default());

        let registry = SiteRegistry::from_json(PROFILES).unwrap();
        let parts = Collaborators::new(web.launcher(), store.clone(), snapshots.clone())
            .with_sink(sink.clone())
            .with_sleeper(sleeper.clone());
        let pipeline = Pipeline::new(ProfileRegistry::from_registry(registry), parts, settings());

        Self {
            web,
            store,
            snapshots,
            sleeper,
            sink,
            pipeline,
        }
    }

    pub fn seed_snapshot(&self, episode_url: &str, embed_url: &str) {
        self.snapshots.put(episode_url, embed_url);
    }
}

/// Main page at `main_url` listing `episodes`, each with a `.playerB` iframe
/// pointing at `https://embed.example/<n>`.
pub fn anime_with_episodes(web: &FakeWeb, main_url: &str, episodes: &[&str]) {
    web.add_page(
        main_url,
        FakePage::new("Anime - All episodes").with_links(EPISODE_LIST, episodes),
    );
    for (i, ep) in episodes.iter().enumerate() {
        web.add_page(ep, playable(&format!("https://embed.example/{}", i + 1)));
    }
}

pub fn playable(embed_url: &str) -> FakePage {
    FakePage::new("Episode").with_element(".playerB", &[("src", embed_url)])
}
