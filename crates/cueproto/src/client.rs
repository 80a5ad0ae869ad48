//! Request/reply client for QLab's OSC interface.
//!
//! Architecture: reactor pattern, same as a socket-owning event loop
//! - Transport owned by a dedicated reactor task
//! - Requests flow through an mpsc channel
//! - Replies routed back via oneshot channels
//!
//! QLab replies on `/reply{address}` and carries no request id, so waiters
//! are queued per reply address and served first-registered-first-served.
//! Each waiter is still tagged with its own id (`{reply_address}#{id}`) so
//! timeouts and retries clean up exactly the attempt they belong to.
//!
//! Usage:
//! ```ignore
//! let client = OscClient::new(config, Box::new(transport)); // Spawns reactor
//! let reply = client.request("/workspace/W/cueLists", vec![]).await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::address::reply_address;
use crate::message::{OscArg, OscMessage};
use crate::reply::{Reply, ReplyError, ReplyResult};
use crate::retry::{AttemptResult, RetryConfig};
use crate::transport::Transport;

type AttemptSender = oneshot::Sender<AttemptResult<Vec<OscArg>>>;

/// Callback fired when a previously responsive QLab stops answering.
pub type DisconnectHandler = Box<dyn Fn() + Send + Sync + 'static>;

enum ReactorCommand {
    /// Send a message and route its reply back via oneshot
    Request {
        message: OscMessage,
        request_id: Uuid,
        timeout: Duration,
        response_tx: AttemptSender,
    },
    /// Send without waiting for a reply
    Send {
        message: OscMessage,
        done_tx: oneshot::Sender<Result<(), ReplyError>>,
    },
    Shutdown,
}

struct PendingRequest {
    request_id: Uuid,
    response_tx: AttemptSender,
    deadline: Instant,
}

/// Connection state - tracks if QLab is answering, not socket state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never received a reply
    Unknown = 0,
    /// QLab is answering requests
    Connected = 1,
    /// QLab stopped answering (too many exhausted requests)
    Dead = 2,
}

impl ConnectionState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Dead,
            _ => ConnectionState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Connected => "connected",
            ConnectionState::Dead => "dead",
        }
    }
}

/// Health tracking based on request/reply success
#[derive(Debug)]
pub struct HealthTracker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    last_reply: RwLock<Option<Instant>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Unknown as u8),
            consecutive_failures: AtomicU32::new(0),
            last_reply: RwLock::new(None),
        }
    }

    pub fn get_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.get_state() == ConnectionState::Connected
    }

    pub fn is_alive(&self) -> bool {
        self.get_state() != ConnectionState::Dead
    }

    pub async fn record_success(&self) {
        *self.last_reply.write().await = Some(Instant::now());
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);
    }

    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub async fn health_summary(&self) -> serde_json::Value {
        let last = self.last_reply.read().await;
        let last_secs = last.map(|t| t.elapsed().as_secs());

        serde_json::json!({
            "state": self.get_state().as_str(),
            "connected": self.is_connected(),
            "consecutive_failures": self.get_failures(),
            "last_reply_secs_ago": last_secs,
        })
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for OscClient
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name used as log prefix
    pub name: String,
    pub retry: RetryConfig,
}

impl ClientConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            retry: RetryConfig::default(),
        }
    }

    pub fn from_settings(name: &str, settings: &cueconf::ConnectionConfig) -> Self {
        Self::new(name)
            .with_timeout(Duration::from_secs(settings.timeout_secs))
            .with_retries(settings.max_retries)
            .with_max_failures(settings.max_failures)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.retry.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.retry.max_failures = max_failures;
        self
    }
}

/// The reactor task - owns the transport, handles all I/O.
///
/// Interleaves caller commands, inbound datagrams, and expiry of waiters
/// whose deadline passed.
async fn reactor_task(
    transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::Receiver<ReactorCommand>,
    health: Arc<HealthTracker>,
    updates: broadcast::Sender<OscMessage>,
    name: String,
) {
    let mut pending: HashMap<String, VecDeque<PendingRequest>> = HashMap::new();
    let mut cleanup_interval = tokio::time::interval(Duration::from_millis(25));
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!("{}: Reactor task started on {}", name, transport.describe());

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReactorCommand::Request { message, request_id, timeout, response_tx }) => {
                        let key = reply_address(&message.address);
                        trace!("{}: Sending {}#{}", name, key, request_id);

                        if let Err(e) = transport.send(&message).await {
                            warn!("{}: Send failed for {}: {}", name, message.address, e);
                            let _ = response_tx.send(AttemptResult::SendFailed(e.to_string()));
                            continue;
                        }

                        let queue = pending.entry(key).or_default();
                        queue.push_back(PendingRequest {
                            request_id,
                            response_tx,
                            deadline: Instant::now() + timeout,
                        });
                        trace!("{}: Request {} registered, {} waiting on this address", name, request_id, queue.len());
                    }
                    Some(ReactorCommand::Send { message, done_tx }) => {
                        trace!("{}: Sending without reply: {}", name, message);
                        let _ = done_tx.send(transport.send(&message).await);
                    }
                    Some(ReactorCommand::Shutdown) => {
                        let waiting: usize = pending.values().map(VecDeque::len).sum();
                        info!("{}: Reactor shutting down, failing {} pending requests", name, waiting);
                        // Dropping the senders fails each waiter with Shutdown
                        pending.clear();
                        break;
                    }
                    None => {
                        info!("{}: Command channel closed, reactor exiting", name);
                        break;
                    }
                }
            }

            result = transport.recv() => {
                match result {
                    Ok(Some(messages)) => {
                        for message in messages {
                            route_inbound(message, &mut pending, &health, &updates, &name).await;
                        }
                    }
                    Ok(None) => {
                        warn!("{}: Transport closed, reactor exiting", name);
                        break;
                    }
                    Err(e) => {
                        warn!("{}: Receive error: {}", name, e);
                    }
                }
            }

            _ = cleanup_interval.tick() => {
                let now = Instant::now();
                let mut expired = 0usize;
                for (key, queue) in pending.iter_mut() {
                    while let Some(pos) = queue.iter().position(|req| now > req.deadline) {
                        if let Some(req) = queue.remove(pos) {
                            debug!("{}: Request {}#{} timed out", name, key, req.request_id);
                            let _ = req.response_tx.send(AttemptResult::Timeout);
                            expired += 1;
                        }
                    }
                }
                if expired > 0 {
                    pending.retain(|_, queue| !queue.is_empty());
                    debug!("{}: Expired {} requests, {} addresses still waiting", name, expired, pending.len());
                }
            }
        }
    }

    debug!("{}: Reactor task exiting", name);
}

async fn route_inbound(
    message: OscMessage,
    pending: &mut HashMap<String, VecDeque<PendingRequest>>,
    health: &HealthTracker,
    updates: &broadcast::Sender<OscMessage>,
    name: &str,
) {
    if message.address.starts_with("/update") {
        trace!("{}: Update {}", name, message.address);
        // No subscribers is fine
        let _ = updates.send(message);
        return;
    }

    if !message.address.starts_with("/reply") {
        debug!("{}: Ignoring unsolicited message {}", name, message.address);
        return;
    }

    let waiter = pending.get_mut(&message.address).and_then(VecDeque::pop_front);
    if pending.get(&message.address).is_some_and(VecDeque::is_empty) {
        pending.remove(&message.address);
    }

    match waiter {
        Some(req) => {
            trace!("{}: Reply for {}#{}", name, message.address, req.request_id);
            health.record_success().await;
            let _ = req.response_tx.send(AttemptResult::Success(message.args));
        }
        None => {
            debug!(
                "{}: Discarding orphan reply {} ({} addresses pending)",
                name,
                message.address,
                pending.len()
            );
        }
    }
}

/// OSC client with reactor architecture.
///
/// - Transport owned by background reactor task
/// - Retries happen in the caller, each attempt with a fresh id
/// - Health tracks whether QLab is ANSWERING
pub struct OscClient {
    config: ClientConfig,
    cmd_tx: mpsc::Sender<ReactorCommand>,
    pub health: Arc<HealthTracker>,
    updates: broadcast::Sender<OscMessage>,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
    endpoint: String,
}

impl OscClient {
    /// Create a client and spawn its reactor. Must be called from within a
    /// tokio runtime.
    pub fn new(config: ClientConfig, transport: Box<dyn Transport>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (updates, _) = broadcast::channel(256);
        let health = Arc::new(HealthTracker::new());
        let endpoint = transport.describe();

        info!("{}: OSC client for {}", config.name, endpoint);

        let reactor_health = health.clone();
        let reactor_updates = updates.clone();
        let reactor_name = config.name.clone();
        tokio::spawn(async move {
            reactor_task(transport, cmd_rx, reactor_health, reactor_updates, reactor_name).await;
        });

        Arc::new(Self {
            config,
            cmd_tx,
            health,
            updates,
            on_disconnect: Mutex::new(None),
            endpoint,
        })
    }

    /// Register the callback fired when a connected QLab stops answering.
    pub fn on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.on_disconnect.lock() {
            *slot = Some(Box::new(handler));
        }
    }

    /// Unsolicited `/update/...` messages pushed by QLab.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<OscMessage> {
        self.updates.subscribe()
    }

    /// Send a message and wait for its reply, retrying on timeout.
    ///
    /// An explicit `"status": "error"` reply is returned immediately as
    /// [`ReplyError::Status`]; retrying a rejected message cannot help.
    pub async fn request(&self, address: &str, args: Vec<OscArg>) -> ReplyResult {
        let max_attempts = self.config.retry.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let request_id = Uuid::new_v4();
            let message = OscMessage::with_args(address, args.clone());

            debug!(
                "{}: Sending request {} {} (attempt {}/{})",
                self.config.name, request_id, message, attempts, max_attempts
            );

            let started = Instant::now();
            let failure = match self.send_single_request(message, request_id).await? {
                AttemptResult::Success(reply_args) => {
                    debug!(
                        "{}: Reply for {} in {:?} (request {})",
                        self.config.name,
                        address,
                        started.elapsed(),
                        request_id
                    );
                    let reply = Reply::from_args(address, &reply_args)?;
                    if reply.is_error() {
                        return Err(ReplyError::Status {
                            address: address.to_string(),
                            body: reply.pretty(),
                        });
                    }
                    return Ok(reply);
                }
                AttemptResult::Timeout => None,
                AttemptResult::SendFailed(reason) => Some(reason),
            };

            if attempts < max_attempts {
                let retry_msg = format!(
                    "{}: No reply for {} (attempt {}/{}), retrying...",
                    self.config.name, address, attempts, max_attempts
                );
                if self.health.is_connected() {
                    warn!("{}", retry_msg);
                } else {
                    debug!("{}", retry_msg);
                }
                tokio::time::sleep(self.config.retry.backoff_for_attempt(attempts)).await;
                continue;
            }

            self.record_exhausted(address);
            return Err(match failure {
                Some(reason) => ReplyError::Transport(reason),
                None => ReplyError::Timeout {
                    address: address.to_string(),
                    attempts,
                },
            });
        }
    }

    /// Fire-and-forget send.
    pub async fn send(&self, address: &str, args: Vec<OscArg>) -> Result<(), ReplyError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(ReactorCommand::Send {
                message: OscMessage::with_args(address, args),
                done_tx,
            })
            .await
            .map_err(|_| ReplyError::Shutdown)?;
        done_rx.await.map_err(|_| ReplyError::Shutdown)?
    }

    async fn send_single_request(
        &self,
        message: OscMessage,
        request_id: Uuid,
    ) -> Result<AttemptResult<Vec<OscArg>>, ReplyError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.cmd_tx
            .send(ReactorCommand::Request {
                message,
                request_id,
                timeout: self.config.retry.timeout,
                response_tx,
            })
            .await
            .map_err(|_| ReplyError::Shutdown)?;

        // Reactor enforces the deadline
        response_rx.await.map_err(|_| ReplyError::Shutdown)
    }

    /// A request used up every attempt. Enough of these in a row on a
    /// connected QLab means the connection is gone.
    fn record_exhausted(&self, address: &str) {
        let was_connected = self.health.is_connected();
        let failures = self.health.record_failure();

        if !was_connected {
            debug!(
                "{}: No reply for {} after all attempts (QLab not yet answering)",
                self.config.name, address
            );
            return;
        }

        warn!(
            "{}: No reply for {} after all attempts ({} consecutive)",
            self.config.name, address, failures
        );

        if address.contains("/cueLists") {
            warn!("{}: The /cueLists query timed out. Large workspaces or a busy QLab can take longer to answer.", self.config.name);
            info!(
                "{}: Current timeout: {:?}, retries: {}. Try a timeout of 30-60 seconds.",
                self.config.name, self.config.retry.timeout, self.config.retry.max_retries
            );
        }

        if failures >= self.config.retry.max_failures {
            self.health.set_state(ConnectionState::Dead);
            warn!("{}: QLab marked DEAD (not answering)", self.config.name);
            if let Ok(slot) = self.on_disconnect.lock() {
                if let Some(handler) = slot.as_ref() {
                    handler();
                }
            }
        }
    }

    /// Gracefully shut down the reactor task.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ReactorCommand::Shutdown).await;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_connected(&self) -> bool {
        self.health.is_connected()
    }
}
