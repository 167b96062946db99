#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tabhop_core::background::BackgroundService;
use tabhop_core::bridge::{Channel, ChannelError};
use tabhop_core::config::Config;
use tabhop_core::contract::{ControlAck, ControlSignal, EmptyResponse, Request, Response};
use tabhop_core::fetch::{FetchError, FetchRequest, HttpClient, HttpResponse};
use tabhop_core::snapshot::Clock;
use tabhop_core::sources::{
    BookmarkNode, BrowserHost, HistoryQuery, RawHistoryItem, RawTab, SourceError, TabQuery,
};
use tabhop_core::storage::KvStore;

pub fn tab(id: i64, title: &str, url: &str) -> RawTab {
    RawTab {
        id: Some(id),
        title: Some(title.to_string()),
        url: Some(url.to_string()),
        status: Some("complete".to_string()),
        ..RawTab::default()
    }
}

pub fn history(id: &str, title: &str, url: &str, visited: i64) -> RawHistoryItem {
    RawHistoryItem {
        id: id.to_string(),
        title: Some(title.to_string()),
        url: Some(url.to_string()),
        last_visit_time: Some(visited),
    }
}

pub fn bookmark(id: &str, title: &str, url: &str) -> BookmarkNode {
    BookmarkNode {
        id: id.to_string(),
        title: title.to_string(),
        url: Some(url.to_string()),
        ..BookmarkNode::default()
    }
}

pub fn folder(id: &str, children: Vec<BookmarkNode>) -> BookmarkNode {
    BookmarkNode {
        id: id.to_string(),
        children,
        ..BookmarkNode::default()
    }
}

/// In-memory host whose contents and failures are set by the test.
#[derive(Default)]
pub struct ScriptedHost {
    pub tabs: Mutex<Vec<RawTab>>,
    pub history: Mutex<Vec<RawHistoryItem>>,
    pub bookmarks: Mutex<Vec<BookmarkNode>>,
    pub fail_history: AtomicBool,
    pub fail_tabs: AtomicBool,
    pub unreachable: Mutex<HashSet<i64>>,
    pub history_reads: AtomicUsize,
    pub last_history_query: Mutex<Option<HistoryQuery>>,
    pub created: Mutex<Vec<String>>,
    pub activated: Mutex<Vec<i64>>,
    pub signals: Mutex<Vec<(i64, ControlSignal)>>,
}

impl ScriptedHost {
    pub fn with_tabs(tabs: Vec<RawTab>) -> Self {
        let host = Self::default();
        *host.tabs.lock().unwrap() = tabs;
        host
    }

    pub fn set_tabs(&self, tabs: Vec<RawTab>) {
        *self.tabs.lock().unwrap() = tabs;
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn activated(&self) -> Vec<i64> {
        self.activated.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<(i64, ControlSignal)> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserHost for ScriptedHost {
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<RawTab>, SourceError> {
        if self.fail_tabs.load(Ordering::SeqCst) {
            return Err(SourceError::Host("tabs api unavailable".into()));
        }
        let tabs = self.tabs.lock().unwrap();
        Ok(tabs
            .iter()
            .filter(|t| query != TabQuery::CurrentWindowComplete || t.is_complete())
            .cloned()
            .collect())
    }

    async fn search_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<RawHistoryItem>, SourceError> {
        self.history_reads.fetch_add(1, Ordering::SeqCst);
        *self.last_history_query.lock().unwrap() = Some(query.clone());
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(SourceError::Host("history api unavailable".into()));
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn bookmark_tree(&self) -> Result<Vec<BookmarkNode>, SourceError> {
        Ok(self.bookmarks.lock().unwrap().clone())
    }

    async fn create_tab(&self, url: &str) -> Result<(), SourceError> {
        self.created.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn activate_tab(&self, tab_id: i64) -> Result<(), SourceError> {
        if self.unreachable.lock().unwrap().contains(&tab_id) {
            return Err(SourceError::TabUnreachable(tab_id));
        }
        self.activated.lock().unwrap().push(tab_id);
        Ok(())
    }

    async fn send_to_tab(
        &self,
        tab_id: i64,
        signal: &ControlSignal,
    ) -> Result<ControlAck, SourceError> {
        if self.unreachable.lock().unwrap().contains(&tab_id) {
            return Err(SourceError::TabUnreachable(tab_id));
        }
        self.signals.lock().unwrap().push((tab_id, *signal));
        Ok(ControlAck { success: true })
    }
}

#[derive(Clone)]
pub enum Scripted {
    Respond(HttpResponse),
    Fail(FetchError),
    /// Responds only after `Duration` has passed.
    Slow(Duration, HttpResponse),
}

/// HTTP fake keyed by exact URL; unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedHttp {
    pub fn route(&self, url: &str, scripted: Scripted) -> &Self {
        self.routes.lock().unwrap().insert(url.to_string(), scripted);
        self
    }

    pub fn image(&self, url: &str, bytes: &[u8]) -> &Self {
        self.route(url, Scripted::Respond(image_response(bytes)))
    }

    pub fn html(&self, url: &str, html: &str) -> &Self {
        self.route(
            url,
            Scripted::Respond(HttpResponse {
                status: 200,
                content_type: Some("text/html; charset=utf-8".into()),
                body: html.as_bytes().to_vec(),
            }),
        )
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn image_response(bytes: &[u8]) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: Some("image/png".into()),
        body: bytes.to_vec(),
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn get(&self, request: &FetchRequest) -> Result<HttpResponse, FetchError> {
        self.requests.lock().unwrap().push(request.url.clone());
        let scripted = self.routes.lock().unwrap().get(&request.url).cloned();
        match scripted {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Slow(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => Ok(HttpResponse {
                status: 404,
                content_type: Some("text/html".into()),
                body: Vec::new(),
            }),
        }
    }
}

pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn at(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn severed() -> ChannelError {
    ChannelError::new("Could not establish connection. Receiving end does not exist.")
}

/// Channel that replays queued outcomes; once a queue is empty sends succeed
/// and reinject requests are acknowledged.
#[derive(Default)]
pub struct ScriptedChannel {
    sends: Mutex<VecDeque<Result<Response, ChannelError>>>,
    reinjects: Mutex<VecDeque<Result<ControlAck, ChannelError>>>,
    pub send_calls: AtomicUsize,
    pub reinject_calls: AtomicUsize,
    pub reinject_delay: Mutex<Option<Duration>>,
    pub send_delay: Mutex<Option<Duration>>,
}

impl ScriptedChannel {
    pub fn queue_send(&self, outcome: Result<Response, ChannelError>) -> &Self {
        self.sends.lock().unwrap().push_back(outcome);
        self
    }

    pub fn queue_severed(&self, times: usize) -> &Self {
        for _ in 0..times {
            self.queue_send(Err(severed()));
        }
        self
    }

    pub fn queue_reinject(&self, outcome: Result<ControlAck, ChannelError>) -> &Self {
        self.reinjects.lock().unwrap().push_back(outcome);
        self
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn reinject_calls(&self) -> usize {
        self.reinject_calls.load(Ordering::SeqCst)
    }
}

pub fn ok_response() -> Response {
    Response::SwitchTab(EmptyResponse {})
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn send(&self, _request: &Request) -> Result<Response, ChannelError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.sends.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ok_response()))
    }

    async fn request_reinject(&self) -> Result<ControlAck, ChannelError> {
        self.reinject_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.reinject_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.reinjects.lock().unwrap().pop_front();
        next.unwrap_or(Ok(ControlAck { success: true }))
    }
}

pub struct Harness {
    pub host: Arc<ScriptedHost>,
    pub http: Arc<ScriptedHttp>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<KvStore>,
    pub service: BackgroundService,
}

pub fn harness(host: ScriptedHost) -> Harness {
    harness_with_config(host, Config::default())
}

pub fn harness_with_config(host: ScriptedHost, config: Config) -> Harness {
    let host = Arc::new(host);
    let http = Arc::new(ScriptedHttp::default());
    let clock = Arc::new(ManualClock::at(1_000_000));
    let store = Arc::new(KvStore::open_memory().unwrap());
    let service = BackgroundService::with_clock(
        config,
        host.clone(),
        http.clone(),
        store.clone(),
        clock.clone(),
    )
    .unwrap();
    Harness {
        host,
        http,
        clock,
        store,
        service,
    }
}
