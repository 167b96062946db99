use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{validate, Config, ConfigError};
use crate::contract::{
    ActionResponse, ControlAck, ControlSignal, EmptyResponse, FetchFaviconRequest,
    FetchFaviconResponse, GetAllResponse, RecentTabsResponse, Request, Response, Sender,
};
use crate::favicon::{FaviconResolver, FaviconSettings};
use crate::fetch::HttpClient;
use crate::model::{RecordKind, ResultRecord};
use crate::snapshot::{Clock, SnapshotCache, SystemClock};
use crate::sources::{is_disallowed_url, BrowserHost, SourceError, TabQuery};
use crate::storage::{KvStore, StoreError};

const RECENT_TABS_LIMIT: usize = 8;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("host error: {0}")]
    Host(#[from] SourceError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Settled outcome of a best-effort fan-out to every open tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct BackgroundService {
    config: Config,
    host: Arc<dyn BrowserHost>,
    snapshots: SnapshotCache,
    favicons: FaviconResolver,
}

impl BackgroundService {
    pub fn new(
        config: Config,
        host: Arc<dyn BrowserHost>,
        http: Arc<dyn HttpClient>,
        store: Arc<KvStore>,
    ) -> Result<Self, ServiceError> {
        Self::with_clock(config, host, http, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        host: Arc<dyn BrowserHost>,
        http: Arc<dyn HttpClient>,
        store: Arc<KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        validate(&config)?;
        let snapshots = SnapshotCache::new(Arc::clone(&host), clock, &config);
        let favicons = FaviconResolver::new(http, store, FaviconSettings::from_config(&config));
        Ok(Self {
            config,
            host,
            snapshots,
            favicons,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotCache {
        &self.snapshots
    }

    pub fn favicons(&self) -> &FaviconResolver {
        &self.favicons
    }

    pub async fn handle(&self, request: Request, sender: Sender) -> Result<Response, ServiceError> {
        debug!(request = request.name(), tab_id = ?sender.tab_id, "handling request");
        match request {
            Request::GetAll(body) => Ok(Response::GetAll(
                self.get_all(body.force_refresh, sender).await,
            )),
            Request::GetRecentTabs => Ok(Response::GetRecentTabs(self.recent_tabs().await)),
            Request::FetchFavicon(body) => {
                Ok(Response::FetchFavicon(self.fetch_favicon(body).await))
            }
            Request::NewTab(body) => {
                if body.url.trim().is_empty() {
                    return Err(ServiceError::InvalidRequest("new-tab requires a url".into()));
                }
                Ok(Response::NewTab(self.new_tab(&body.url).await))
            }
            Request::OpenResult(record) => {
                Ok(Response::OpenResult(self.open_result(&record).await))
            }
            Request::SwitchTab(body) => {
                self.host.activate_tab(body.tab_id).await?;
                Ok(Response::SwitchTab(EmptyResponse {}))
            }
        }
    }

    async fn get_all(&self, force_refresh: bool, sender: Sender) -> GetAllResponse {
        let outcome = self
            .snapshots
            .get_search_snapshot(force_refresh, sender.tab_id)
            .await;
        if outcome.degraded {
            return GetAllResponse {
                results: Vec::new(),
                index: None,
                from_cache: false,
            };
        }

        let index = match outcome.snapshot.index.serialize() {
            Ok(index) => Some(index),
            Err(error) => {
                warn!(%error, "index serialization failed; receiver will rebuild");
                None
            }
        };
        GetAllResponse {
            results: outcome.snapshot.records.clone(),
            index,
            from_cache: outcome.from_cache,
        }
    }

    async fn recent_tabs(&self) -> RecentTabsResponse {
        let mut tabs = match self.host.query_tabs(TabQuery::CurrentWindowComplete).await {
            Ok(tabs) => tabs,
            Err(error) => {
                warn!(%error, "recent tabs unavailable");
                return RecentTabsResponse {
                    results: Vec::new(),
                };
            }
        };

        tabs.retain(|tab| {
            tab.id.is_some() && tab.url.as_deref().is_some_and(|url| !is_disallowed_url(url))
        });
        tabs.sort_by(|a, b| b.last_accessed.unwrap_or(0).cmp(&a.last_accessed.unwrap_or(0)));

        let results = tabs
            .into_iter()
            .take(RECENT_TABS_LIMIT)
            .filter_map(|tab| {
                let id = tab.id?;
                Some(
                    ResultRecord::tab(
                        &id.to_string(),
                        tab.title.as_deref().unwrap_or_default(),
                        tab.url.as_deref().unwrap_or_default(),
                        tab.last_accessed,
                    )
                    .with_favicon(tab.fav_icon_url),
                )
            })
            .collect();
        RecentTabsResponse { results }
    }

    async fn fetch_favicon(&self, body: FetchFaviconRequest) -> FetchFaviconResponse {
        if body.url.is_none() && body.favicon.is_none() {
            return FetchFaviconResponse {
                data_url: None,
                success: false,
                message: "missing url or favicon".to_string(),
            };
        }

        match self
            .favicons
            .resolve(body.url.as_deref(), body.favicon.as_deref())
            .await
        {
            Some(resolved) => FetchFaviconResponse {
                data_url: Some(resolved.data_url),
                success: true,
                message: "ok".to_string(),
            },
            None => FetchFaviconResponse {
                data_url: None,
                success: false,
                message: "favicon not found".to_string(),
            },
        }
    }

    async fn new_tab(&self, url: &str) -> ActionResponse {
        match self.host.create_tab(url).await {
            Ok(()) => ActionResponse { success: true },
            Err(error) => {
                warn!(%error, url, "new tab failed");
                ActionResponse { success: false }
            }
        }
    }

    async fn open_result(&self, record: &ResultRecord) -> ActionResponse {
        let outcome = match &record.kind {
            RecordKind::Tab { .. } => match record.id.parse::<i64>() {
                Ok(tab_id) => self.host.activate_tab(tab_id).await,
                Err(_) => Err(SourceError::Host(format!("tab id '{}' is not numeric", record.id))),
            },
            RecordKind::History { .. }
            | RecordKind::Bookmark { .. }
            | RecordKind::Search
            | RecordKind::BangSearch { .. } => self.host.create_tab(&record.url).await,
        };

        match outcome {
            Ok(()) => ActionResponse { success: true },
            Err(error) => {
                warn!(%error, kind = record.kind.name(), id = %record.id, "open result failed");
                ActionResponse { success: false }
            }
        }
    }

    /// Asks every page to tear down its overlay and mark itself invalidated.
    /// Run after the extension itself was upgraded.
    pub async fn broadcast_cleanup(&self) -> BroadcastReport {
        let tabs = match self.host.query_tabs(TabQuery::AllWindows).await {
            Ok(tabs) => tabs,
            Err(error) => {
                warn!(%error, "cleanup broadcast could not list tabs");
                return BroadcastReport::default();
            }
        };

        let signal = ControlSignal::CleanupOldContext;
        let tab_ids: Vec<i64> = tabs.iter().filter_map(|tab| tab.id).collect();
        let settled = join_all(
            tab_ids
                .iter()
                .map(|&tab_id| self.host.send_to_tab(tab_id, &signal)),
        )
        .await;

        let delivered = settled
            .iter()
            .filter(|outcome| matches!(outcome, Ok(ack) if ack.success))
            .count();
        let report = BroadcastReport {
            attempted: tab_ids.len(),
            delivered,
            failed: tab_ids.len() - delivered,
        };
        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "old context cleanup broadcast settled"
        );
        report
    }

    /// The page asked to be re-attached; signal it to reset. The ack only
    /// requires a sender tab, delivery problems are logged.
    pub async fn handle_reinject(&self, sender: Sender) -> ControlAck {
        let Some(tab_id) = sender.tab_id else {
            warn!("reinject request without a sender tab");
            return ControlAck { success: false };
        };

        match self
            .host
            .send_to_tab(tab_id, &ControlSignal::ReinjectContext)
            .await
        {
            Ok(_) => debug!(tab_id, "reinject signal delivered"),
            Err(error) => debug!(%error, tab_id, "reinject signal not delivered"),
        }
        ControlAck { success: true }
    }
}
