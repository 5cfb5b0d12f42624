use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use ireva_types::envelope::ClientEnvelope;

use crate::bus::ConnectionEvent;
use crate::dispatcher::Dispatcher;

/// Status of the single logical gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Error,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Gateway endpoint, e.g. `ws://host:3000/ws`.
    pub url: String,
    /// JWT sent in the post-connect `authenticate` envelope. Re-sent on
    /// every reconnect.
    pub auth_token: Option<String>,
}

/// Reconnect schedule: delay before attempt k is `base * factor^(k-1)`,
/// and no attempt is made once `max_attempts` have failed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            factor: 1.5,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many have already been made.
    /// `None` once the cap is reached.
    pub fn delay_for(&self, attempts_made: u32) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        Some(self.base.mul_f64(self.factor.powi(attempts_made as i32)))
    }
}

/// The single pending retry timer. Scheduling replaces (and cancels) any
/// previous timer, so at most one reconnect attempt is ever queued.
struct RetryTimer {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl RetryTimer {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn schedule(&self, delay: Duration, action: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        let previous = self
            .slot
            .lock()
            .expect("retry slot poisoned")
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel a pending timer, if any. Returns whether one was pending.
    fn cancel(&self) -> bool {
        if let Some(handle) = self.slot.lock().expect("retry slot poisoned").take() {
            if !handle.is_finished() {
                handle.abort();
                return true;
            }
        }
        false
    }

    fn has_pending(&self) -> bool {
        self.slot
            .lock()
            .expect("retry slot poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// Owns the one live gateway socket and its reconnect state machine.
///
/// Constructed once at application start and handle-cloned into whatever
/// needs it; all connection state is private to this object.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ManagerConfig,
    policy: RetryPolicy,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<ConnectionState>,
    /// Failed attempts since the last successful connection.
    attempts: AtomicU32,
    /// Write half of the live connection, when open.
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientEnvelope>>>,
    retry: RetryTimer,
    conn_task: Mutex<Option<JoinHandle<()>>>,
    /// Set by close()/handle_offline(): suppresses the retry loop.
    intentional_close: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig, dispatcher: Dispatcher) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                policy: RetryPolicy::default(),
                dispatcher,
                state_tx,
                attempts: AtomicU32::new(0),
                outbound: Mutex::new(None),
                retry: RetryTimer::new(),
                conn_task: Mutex::new(None),
                intentional_close: AtomicBool::new(false),
            }),
        }
    }

    /// Observe connection status (status indicator, tests).
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Open (or re-open) the gateway connection. Returns immediately; the
    /// connection runs on its own task.
    pub fn connect(&self) {
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.run_attempt().await });
        let previous = self
            .inner
            .conn_task
            .lock()
            .expect("conn slot poisoned")
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Manual reconnect: cancels any pending retry timer, force-closes the
    /// live connection, resets the attempt counter, and connects again.
    pub fn reconnect(&self) {
        self.inner.retry.cancel();
        self.abort_connection();
        self.inner.attempts.store(0, Ordering::Relaxed);
        self.connect();
    }

    /// Transmit when open; otherwise flag a connection issue and reconnect.
    pub fn send(&self, envelope: ClientEnvelope) {
        let delivered = {
            let outbound = self.inner.outbound.lock().expect("outbound slot poisoned");
            match outbound.as_ref() {
                Some(tx) if *self.inner.state_tx.borrow() == ConnectionState::Open => {
                    tx.send(envelope).is_ok()
                }
                _ => false,
            }
        };

        if !delivered {
            warn!("send attempted while gateway not connected");
            self.inner
                .dispatcher
                .bus()
                .publish_connection(ConnectionEvent::Issue);
            self.reconnect();
        }
    }

    /// Browser went offline: stop retrying until connectivity returns.
    pub fn handle_offline(&self) {
        self.inner.intentional_close.store(true, Ordering::Relaxed);
        self.inner.retry.cancel();
        self.abort_connection();
        self.set_state(ConnectionState::Closed);
    }

    /// Connectivity restored: one reconnect attempt after the base delay.
    pub fn handle_online(&self) {
        self.inner.intentional_close.store(false, Ordering::Relaxed);
        self.inner.attempts.store(0, Ordering::Relaxed);
        let manager = self.clone();
        self.inner
            .retry
            .schedule(self.inner.policy.base, async move {
                manager.connect();
            });
    }

    /// Clean shutdown: no retry follows.
    pub fn close(&self) {
        self.inner.intentional_close.store(true, Ordering::Relaxed);
        self.inner.retry.cancel();
        self.abort_connection();
        self.set_state(ConnectionState::Closed);
    }

    fn abort_connection(&self) {
        if let Some(handle) = self
            .inner
            .conn_task
            .lock()
            .expect("conn slot poisoned")
            .take()
        {
            handle.abort();
        }
        *self.inner.outbound.lock().expect("outbound slot poisoned") = None;
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.inner.state_tx.send(state);
    }

    async fn run_attempt(self) {
        self.inner.intentional_close.store(false, Ordering::Relaxed);
        self.set_state(ConnectionState::Connecting);

        match tokio_tungstenite::connect_async(&self.inner.config.url).await {
            Ok((stream, _)) => self.run_connection(stream).await,
            Err(e) => {
                warn!("gateway connection failed: {}", e);
                self.set_state(ConnectionState::Error);
                // A failed attempt counts as an abnormal close
                self.schedule_reconnect();
            }
        }
    }

    async fn run_connection(
        &self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        info!("gateway connected");
        self.set_state(ConnectionState::Open);
        self.inner.attempts.store(0, Ordering::Relaxed);

        let (tx, mut rx) = mpsc::unbounded_channel::<ClientEnvelope>();
        *self.inner.outbound.lock().expect("outbound slot poisoned") = Some(tx.clone());

        // Re-authenticate on every (re)connect before anything else goes out
        if let Some(token) = &self.inner.config.auth_token {
            let _ = tx.send(ClientEnvelope::Authenticate {
                token: token.clone(),
                timestamp: Utc::now(),
            });
        }

        let (mut write, mut read) = stream.split();

        let write_task = async {
            while let Some(envelope) = rx.recv().await {
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to serialize envelope: {}", e);
                        continue;
                    }
                };
                if write.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        };

        let dispatcher = self.inner.dispatcher.clone();
        let reply = tx.clone();
        let read_task = async {
            // Resolves to true on a clean close handshake
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => dispatcher.handle(&text, &reply),
                    Some(Ok(Message::Close(_))) => return true,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        // Transport error: surfaced as Error state; the retry
                        // decision belongs to the close handling below.
                        warn!("gateway read error: {}", e);
                        self.set_state(ConnectionState::Error);
                        return false;
                    }
                    None => return false,
                }
            }
        };

        let clean_close = tokio::select! {
            _ = write_task => false,
            clean = read_task => clean,
        };

        *self.inner.outbound.lock().expect("outbound slot poisoned") = None;
        self.set_state(ConnectionState::Closed);

        if self.inner.intentional_close.load(Ordering::Relaxed) || clean_close {
            info!("gateway connection closed");
            return;
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if self.inner.intentional_close.load(Ordering::Relaxed) {
            return;
        }

        let attempts_made = self.inner.attempts.load(Ordering::Relaxed);
        match self.inner.policy.delay_for(attempts_made) {
            Some(delay) => {
                self.inner
                    .attempts
                    .store(attempts_made + 1, Ordering::Relaxed);
                info!(
                    "scheduling gateway reconnect attempt {} in {}ms",
                    attempts_made + 1,
                    delay.as_millis()
                );
                let manager = self.clone();
                self.inner.retry.schedule(delay, async move {
                    manager.connect();
                });
            }
            None => {
                warn!("gateway reconnect attempts exhausted");
                self.inner
                    .dispatcher
                    .bus()
                    .publish_connection(ConnectionEvent::Lost);
            }
        }
    }
}
