use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::ResultRecord;
use crate::phonetic;
use crate::search::SearchIndex;
use crate::sources::{self, BrowserHost, RawTab, SourceError, TabQuery};

const FINGERPRINT_MAX_CHARS: usize = 100;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Immutable aggregation of every searchable record plus its index.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub records: Vec<ResultRecord>,
    pub index: SearchIndex,
    pub built_at: u64,
    pub source_fingerprint: String,
    /// Tab left out of `records` because it asked for the snapshot.
    pub caller_tab_id: Option<i64>,
}

impl Snapshot {
    fn empty(built_at: u64) -> Self {
        Self {
            records: Vec::new(),
            index: SearchIndex::build(&[]),
            built_at,
            source_fingerprint: String::new(),
            caller_tab_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub snapshot: Arc<Snapshot>,
    pub from_cache: bool,
    /// Sources could not be read; `snapshot` is empty and was not cached.
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub long_window_ms: u64,
    pub short_window_ms: u64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            long_window_ms: 30_000,
            short_window_ms: 5_000,
        }
    }
}

impl FreshnessPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            long_window_ms: config.cache_long_window_ms,
            short_window_ms: config.cache_short_window_ms,
        }
    }

    /// Inside the short window anything goes; inside the long window only an
    /// unchanged tab set keeps the snapshot.
    pub fn is_fresh(&self, snapshot: &Snapshot, now_ms: u64, fingerprint: &str) -> bool {
        let age = now_ms.saturating_sub(snapshot.built_at);
        if age < self.short_window_ms {
            return true;
        }
        age < self.long_window_ms && snapshot.source_fingerprint == fingerprint
    }
}

/// Cheap summary of the live tab set: `id-title-url` joined by `|`,
/// truncated to 100 characters.
pub fn fingerprint(tabs: &[RawTab]) -> String {
    tabs.iter()
        .map(|tab| {
            format!(
                "{}-{}-{}",
                tab.id.map(|id| id.to_string()).unwrap_or_default(),
                tab.title.as_deref().unwrap_or_default(),
                tab.url.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("|")
        .chars()
        .take(FINGERPRINT_MAX_CHARS)
        .collect()
}

/// Process-wide snapshot holder. A rebuilt snapshot replaces the previous
/// one wholesale; readers holding the old `Arc` are unaffected.
pub struct SnapshotCache {
    host: Arc<dyn BrowserHost>,
    clock: Arc<dyn Clock>,
    policy: FreshnessPolicy,
    history_max_results: usize,
    current: RwLock<Option<Arc<Snapshot>>>,
    builds: AtomicU64,
}

impl SnapshotCache {
    pub fn new(host: Arc<dyn BrowserHost>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            host,
            clock,
            policy: FreshnessPolicy::from_config(config),
            history_max_results: config.history_max_results,
            current: RwLock::new(None),
            builds: AtomicU64::new(0),
        }
    }

    /// Number of snapshots built since construction.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub async fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().await.clone()
    }

    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    pub async fn get_search_snapshot(
        &self,
        force_refresh: bool,
        caller_tab_id: Option<i64>,
    ) -> SnapshotOutcome {
        let live_tabs = match self.host.query_tabs(TabQuery::CurrentWindow).await {
            Ok(tabs) => tabs,
            Err(error) => return self.degraded(&error),
        };
        let fingerprint = fingerprint(&live_tabs);
        let now = self.clock.now_ms();

        if !force_refresh {
            if let Some(cached) = self.current().await {
                // A snapshot built for another tab still lists the caller.
                if cached.caller_tab_id == caller_tab_id
                    && self.policy.is_fresh(&cached, now, &fingerprint)
                {
                    debug!(age_ms = now.saturating_sub(cached.built_at), "serving cached snapshot");
                    return SnapshotOutcome {
                        snapshot: cached,
                        from_cache: true,
                        degraded: false,
                    };
                }
            }
        }

        match self.build(caller_tab_id, fingerprint).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write().await = Some(Arc::clone(&snapshot));
                self.builds.fetch_add(1, Ordering::Relaxed);
                debug!(records = snapshot.records.len(), "rebuilt search snapshot");
                SnapshotOutcome {
                    snapshot,
                    from_cache: false,
                    degraded: false,
                }
            }
            Err(error) => self.degraded(&error),
        }
    }

    async fn build(
        &self,
        caller_tab_id: Option<i64>,
        source_fingerprint: String,
    ) -> Result<Snapshot, SourceError> {
        let host = self.host.as_ref();
        let (tabs, history, bookmarks) = tokio::try_join!(
            sources::read_tabs(host, caller_tab_id),
            sources::read_history(host, self.history_max_results),
            sources::read_bookmarks(host),
        )?;

        let mut records = Vec::with_capacity(tabs.len() + history.len() + bookmarks.len());
        records.extend(tabs);
        records.extend(history);
        records.extend(bookmarks);
        let records = phonetic::augment_all(records);
        let index = SearchIndex::build(&records);

        Ok(Snapshot {
            records,
            index,
            built_at: self.clock.now_ms(),
            source_fingerprint,
            caller_tab_id,
        })
    }

    fn degraded(&self, error: &SourceError) -> SnapshotOutcome {
        warn!(%error, "source read failed; serving empty result set");
        SnapshotOutcome {
            snapshot: Arc::new(Snapshot::empty(self.clock.now_ms())),
            from_cache: false,
            degraded: true,
        }
    }
}
