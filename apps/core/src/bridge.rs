//! Page → background request transport that survives the page context being
//! severed from the background (typically after an extension upgrade).
//!
//! A severed send marks the session `Invalidated` and bumps the retry
//! counter. Retrying callers then wait `retry_delay * retry_count`, ask the
//! background to signal this page to reset, and replay the request exactly
//! once with retry disabled. Concurrent failures count once and join the
//! recovery already in flight. Once `retry_count` reaches `max_retries`
//! without a successful recovery the session is terminal and sends fail
//! without touching the channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::background::BackgroundService;
use crate::config::Config;
use crate::contract::{ControlAck, Request, Response, Sender};

/// Lowercased fragments of host errors meaning the page lost its background.
pub const SEVERED_SIGNATURES: [&str; 5] = [
    "extension context invalidated",
    "receiving end does not exist",
    "could not establish connection",
    "message channel closed",
    "message port closed",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ChannelError {
    pub message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn is_context_severed(&self) -> bool {
        let lowered = self.message.to_lowercase();
        SEVERED_SIGNATURES.iter().any(|sig| lowered.contains(sig))
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, ChannelError>;
    /// Asks the background to signal this page to reset its invalid flag
    /// and re-register its listeners.
    async fn request_reinject(&self) -> Result<ControlAck, ChannelError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("context invalidated and {max_retries} recovery attempts exhausted")]
    Exhausted { max_retries: u32 },
    #[error("context invalidated; page will be re-attached")]
    ContextInvalidated,
    #[error("context recovery failed: {0}")]
    RecoveryFailed(ChannelError),
    #[error("channel error: {0}")]
    Channel(ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connected,
    Invalidated,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub state: BridgeState,
    pub channel_valid: bool,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl SessionState {
    fn new(max_retries: u32) -> Self {
        Self {
            state: BridgeState::Connected,
            channel_valid: true,
            retry_count: 0,
            max_retries,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.channel_valid && self.retry_count >= self.max_retries
    }

    fn reset(&mut self) {
        self.state = BridgeState::Connected;
        self.channel_valid = true;
        self.retry_count = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.bridge_max_retries,
            retry_delay: Duration::from_millis(config.bridge_retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// One attempt, failure surfaces immediately.
    Once,
    /// Recover a severed channel and replay once.
    Retry,
}

type RecoveryFuture = Shared<BoxFuture<'static, Result<(), ChannelError>>>;

struct Inner {
    session: SessionState,
    recovery: Option<RecoveryFuture>,
    /// Sequence number of the latest send that reached the channel.
    attempts_started: u64,
    /// Sends numbered at or below this were in flight when a severed
    /// failure was last counted.
    counted_through: u64,
}

enum Failure {
    Severed,
    Fatal(BridgeError),
}

pub struct MessageBridge {
    channel: Arc<dyn Channel>,
    policy: RetryPolicy,
    inner: Arc<Mutex<Inner>>,
    network_attempts: AtomicU64,
    recoveries_started: Arc<AtomicU64>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MessageBridge {
    pub fn new(channel: Arc<dyn Channel>, policy: RetryPolicy) -> Self {
        Self {
            channel,
            policy,
            inner: Arc::new(Mutex::new(Inner {
                session: SessionState::new(policy.max_retries),
                recovery: None,
                attempts_started: 0,
                counted_through: 0,
            })),
            network_attempts: AtomicU64::new(0),
            recoveries_started: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn session(&self) -> SessionState {
        lock(&self.inner).session
    }

    /// Sends that actually reached the channel.
    pub fn network_attempts(&self) -> u64 {
        self.network_attempts.load(Ordering::Relaxed)
    }

    pub fn recoveries_started(&self) -> u64 {
        self.recoveries_started.load(Ordering::Relaxed)
    }

    pub fn mark_invalidated(&self) {
        let mut inner = lock(&self.inner);
        inner.session.channel_valid = false;
        if inner.session.state != BridgeState::Recovering {
            inner.session.state = BridgeState::Invalidated;
        }
    }

    pub fn reset(&self) {
        lock(&self.inner).session.reset();
    }

    pub async fn send_once(&self, request: &Request) -> Result<Response, BridgeError> {
        self.send(request, SendMode::Once).await
    }

    pub async fn send_with_retry(&self, request: &Request) -> Result<Response, BridgeError> {
        self.send(request, SendMode::Retry).await
    }

    pub async fn send(&self, request: &Request, mode: SendMode) -> Result<Response, BridgeError> {
        match self.attempt(request).await {
            Ok(response) => return Ok(response),
            Err(Failure::Fatal(error)) => return Err(error),
            Err(Failure::Severed) => {}
        }

        let session = self.session();
        if mode == SendMode::Once || session.is_terminal() {
            return Err(self.severed_error());
        }

        self.recover().await.map_err(BridgeError::RecoveryFailed)?;
        debug!(request = request.name(), "replaying request after recovery");
        match self.attempt(request).await {
            Ok(response) => Ok(response),
            Err(Failure::Fatal(error)) => Err(error),
            Err(Failure::Severed) => Err(self.severed_error()),
        }
    }

    /// Runs the reset handshake, or joins the one already running.
    pub async fn recover(&self) -> Result<(), ChannelError> {
        let recovery = {
            let mut inner = lock(&self.inner);
            match &inner.recovery {
                Some(running) => running.clone(),
                None => {
                    let delay = self.policy.retry_delay * inner.session.retry_count;
                    inner.session.state = BridgeState::Recovering;
                    let recovery = self.start_recovery(delay);
                    inner.recovery = Some(recovery.clone());
                    recovery
                }
            }
        };
        recovery.await
    }

    fn start_recovery(&self, delay: Duration) -> RecoveryFuture {
        let channel = Arc::clone(&self.channel);
        let shared = Arc::clone(&self.inner);
        let started = Arc::clone(&self.recoveries_started);
        async move {
            started.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
            let result = match channel.request_reinject().await {
                Ok(ack) if ack.success => Ok(()),
                Ok(_) => Err(ChannelError::new("reinject request was not acknowledged")),
                Err(error) => Err(error),
            };

            let mut inner = lock(&shared);
            match &result {
                Ok(()) => {
                    inner.session.reset();
                    info!("page context recovered");
                }
                Err(error) => {
                    inner.session.state = BridgeState::Invalidated;
                    warn!(
                        %error,
                        retry_count = inner.session.retry_count,
                        "page context recovery failed"
                    );
                }
            }
            inner.recovery = None;
            result
        }
        .boxed()
        .shared()
    }

    async fn attempt(&self, request: &Request) -> Result<Response, Failure> {
        let seq = {
            let mut inner = lock(&self.inner);
            if inner.session.is_terminal() {
                return Err(Failure::Fatal(BridgeError::Exhausted {
                    max_retries: inner.session.max_retries,
                }));
            }
            inner.attempts_started += 1;
            inner.attempts_started
        };

        self.network_attempts.fetch_add(1, Ordering::Relaxed);
        match self.channel.send(request).await {
            Ok(response) => Ok(response),
            Err(error) if error.is_context_severed() => {
                let mut inner = lock(&self.inner);
                inner.session.channel_valid = false;
                // Failures during recovery, or of sends already in flight
                // when the last failure was counted, belong to that outage.
                if inner.session.state != BridgeState::Recovering && seq > inner.counted_through {
                    inner.session.state = BridgeState::Invalidated;
                    inner.session.retry_count += 1;
                    inner.counted_through = inner.attempts_started;
                }
                warn!(
                    request = request.name(),
                    retry_count = inner.session.retry_count,
                    "page context severed"
                );
                Err(Failure::Severed)
            }
            Err(error) => Err(Failure::Fatal(BridgeError::Channel(error))),
        }
    }

    fn severed_error(&self) -> BridgeError {
        let session = self.session();
        if session.is_terminal() {
            BridgeError::Exhausted {
                max_retries: session.max_retries,
            }
        } else {
            BridgeError::ContextInvalidated
        }
    }
}

/// In-process channel to a [`BackgroundService`], severable to mimic the
/// host tearing the page context down.
pub struct LocalChannel {
    service: Arc<BackgroundService>,
    sender: Sender,
    severed: AtomicBool,
}

impl LocalChannel {
    pub fn new(service: Arc<BackgroundService>, sender: Sender) -> Self {
        Self {
            service,
            sender,
            severed: AtomicBool::new(false),
        }
    }

    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    pub fn is_severed(&self) -> bool {
        self.severed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn send(&self, request: &Request) -> Result<Response, ChannelError> {
        if self.is_severed() {
            return Err(ChannelError::new("Extension context invalidated."));
        }
        self.service
            .handle(request.clone(), self.sender)
            .await
            .map_err(|e| ChannelError::new(e.to_string()))
    }

    async fn request_reinject(&self) -> Result<ControlAck, ChannelError> {
        let ack = self.service.handle_reinject(self.sender).await;
        if ack.success {
            self.severed.store(false, Ordering::SeqCst);
        }
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelError;

    #[test]
    fn classifies_severed_channel_messages() {
        assert!(ChannelError::new("Extension context invalidated.").is_context_severed());
        assert!(ChannelError::new(
            "Could not establish connection. Receiving end does not exist."
        )
        .is_context_severed());
        assert!(!ChannelError::new("HTTP 500").is_context_severed());
    }
}
