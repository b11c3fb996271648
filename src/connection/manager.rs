//! Connection manager with a persistent connection and automatic reconnection

use crate::transport::{TransportConnector, TransportEvent, TransportStream};
use anyhow::Result;
use feed_shared::{
    codec, Action, CloseInfo, ConnectionId, Frame, LinkEvent, LinkStateMachine, ReconnectPolicy,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, info, warn};

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Reconnection behaviour after involuntary closes
    pub reconnect: ReconnectPolicy,
    /// Upper bound on a graceful close before the transport is dropped
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            close_timeout: Duration::from_secs(5),
        }
    }
}

type MessageHandler<M> = Box<dyn FnMut(M) + Send>;
type OpenCallback = Box<dyn FnMut() + Send>;
type CloseCallback = Box<dyn FnMut(&CloseInfo) + Send>;
type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Lifecycle callbacks invoked by the connection manager
///
/// All callbacks run on the manager's task and should return quickly.
#[derive(Default)]
pub struct Callbacks {
    on_open: Option<OpenCallback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after `connected` flips true and queued frames are flushed
    pub fn on_open(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_open = Some(Box::new(callback));
        self
    }

    /// Called after `connected` flips false and the queue is cleared
    pub fn on_close(mut self, callback: impl FnMut(&CloseInfo) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Called on any transport error; informational only
    pub fn on_error(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

enum Command<M> {
    Connect(String),
    Disconnect,
    Send(Frame),
    SetHandler(MessageHandler<M>),
    SetCallbacks(Callbacks),
    Reconfigure(ReconnectPolicy),
    Shutdown,
}

/// Owns a single streaming connection and keeps it alive
///
/// Every method is non-blocking and infallible: commands are queued to the
/// manager's task, and failures surface only through the `connected` signal
/// and the lifecycle callbacks. `M` is the type inbound frames decode into.
pub struct ConnectionManager<M = serde_json::Value> {
    command_tx: mpsc::UnboundedSender<Command<M>>,
    connected_rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl<M> ConnectionManager<M>
where
    M: DeserializeOwned + Send + 'static,
{
    /// Create a new connection manager and start its task
    ///
    /// Must be called from within a tokio runtime. No connection is made
    /// until [`connect`](Self::connect) is called.
    pub fn new<C: TransportConnector>(connector: C, config: ConnectionConfig) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);

        let driver = Driver {
            connector: Arc::new(connector),
            machine: LinkStateMachine::new(config.reconnect),
            close_timeout: config.close_timeout,
            commands,
            connected_tx,
            pending: None,
            active: None,
            retry: None,
            handler: None,
            callbacks: Callbacks::default(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            command_tx,
            connected_rx,
            task,
        }
    }

    /// Point the manager at `address`
    ///
    /// A no-op if already open or connecting to the same address. A new
    /// address tears the current connection down before connecting. Also
    /// clears a previous [`disconnect`](Self::disconnect).
    pub fn connect(&self, address: impl Into<String>) {
        self.command(Command::Connect(address.into()));
    }

    /// Encode `message` and deliver it, queueing while not connected
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) {
        match codec::encode(message) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => warn!(error = %e, "dropping message that failed to encode"),
        }
    }

    /// Deliver a pre-encoded frame, queueing while not connected
    pub fn send_frame(&self, frame: Frame) {
        self.command(Command::Send(frame));
    }

    /// Close the connection and suppress reconnection until the next `connect`
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Replace the inbound message handler
    pub fn set_handler(&self, handler: impl FnMut(M) + Send + 'static) {
        self.command(Command::SetHandler(Box::new(handler)));
    }

    /// Replace the lifecycle callbacks
    pub fn set_callbacks(&self, callbacks: Callbacks) {
        self.command(Command::SetCallbacks(callbacks));
    }

    /// Replace the reconnect policy
    pub fn reconfigure(&self, policy: ReconnectPolicy) {
        self.command(Command::Reconfigure(policy));
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Watch the "connected" signal
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// Close the connection, stop reconnecting and wait for the task to exit
    pub async fn shutdown(self) {
        self.command(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "connection manager task failed");
        }
    }

    fn command(&self, command: Command<M>) {
        if self.command_tx.send(command).is_err() {
            debug!("connection manager stopped, command dropped");
        }
    }
}

struct ActiveTransport<S> {
    id: ConnectionId,
    stream: S,
}

type ConnectFuture<S> = Pin<Box<dyn Future<Output = Result<S>> + Send>>;

struct PendingConnect<S> {
    id: ConnectionId,
    future: ConnectFuture<S>,
}

/// Task-side half of the manager: runs the state machine's actions
struct Driver<C: TransportConnector, M> {
    connector: Arc<C>,
    machine: LinkStateMachine,
    close_timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command<M>>,
    connected_tx: watch::Sender<bool>,
    pending: Option<PendingConnect<C::Stream>>,
    active: Option<ActiveTransport<C::Stream>>,
    retry: Option<Pin<Box<Sleep>>>,
    handler: Option<MessageHandler<M>>,
    callbacks: Callbacks,
}

impl<C, M> Driver<C, M>
where
    C: TransportConnector,
    M: DeserializeOwned + Send + 'static,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                (id, result) = next_connect(&mut self.pending) => {
                    self.pending = None;
                    self.on_connect_result(id, result).await;
                }
                (id, event) = next_event(&mut self.active) => {
                    self.on_transport_event(id, event).await;
                }
                () = retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    self.dispatch(LinkEvent::RetryElapsed).await;
                }
            }
        }

        self.dispatch(LinkEvent::Disconnect).await;
        self.pending = None;
        self.active = None;
        self.retry = None;
        info!("connection manager stopped");
    }

    async fn handle_command(&mut self, command: Command<M>) {
        match command {
            Command::Connect(address) => self.dispatch(LinkEvent::Connect { address }).await,
            Command::Disconnect => self.dispatch(LinkEvent::Disconnect).await,
            Command::Send(frame) => self.dispatch(LinkEvent::Send(frame)).await,
            Command::SetHandler(handler) => self.handler = Some(handler),
            Command::SetCallbacks(callbacks) => self.callbacks = callbacks,
            Command::Reconfigure(policy) => self.machine.set_policy(policy),
            Command::Shutdown => {}
        }
    }

    async fn on_connect_result(&mut self, id: ConnectionId, result: Result<C::Stream>) {
        match result {
            Ok(stream) => {
                if self.machine.current_id() != Some(id) {
                    debug!(%id, "discarding stale connection");
                    return;
                }
                self.active = Some(ActiveTransport { id, stream });
                self.dispatch(LinkEvent::Opened(id)).await;
            }
            Err(e) => {
                warn!(%id, error = %e, "connection attempt failed");
                self.dispatch(LinkEvent::ConnectFailed {
                    id,
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn on_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        match event {
            TransportEvent::Message(frame) => self.deliver(frame),
            TransportEvent::Error(reason) => {
                warn!(%id, %reason, "transport error");
                self.dispatch(LinkEvent::TransportError { id, reason }).await;
            }
            TransportEvent::Closed(close) => {
                self.active = None;
                self.dispatch(LinkEvent::Closed { id, close }).await;
            }
        }
    }

    /// Decode an inbound frame and hand it to the current handler
    fn deliver(&mut self, frame: Frame) {
        match codec::decode::<M>(&frame) {
            Ok(message) => match self.handler.as_mut() {
                Some(handler) => handler(message),
                None => debug!(bytes = frame.len(), "no handler set, frame dropped"),
            },
            Err(e) => warn!(error = %e, bytes = frame.len(), "dropping undecodable frame"),
        }
    }

    /// Feed an event through the state machine, including any follow-up
    /// events its actions produce
    async fn dispatch(&mut self, event: LinkEvent) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            for action in self.machine.handle(event) {
                self.perform(action, &mut events).await;
            }
        }
    }

    async fn perform(&mut self, action: Action, follow_up: &mut VecDeque<LinkEvent>) {
        match action {
            Action::StartConnect { id, address } => {
                info!(
                    %id,
                    %address,
                    transport = self.connector.name(),
                    attempt = self.machine.attempts(),
                    "connecting"
                );
                let connector = Arc::clone(&self.connector);
                let future: ConnectFuture<C::Stream> =
                    Box::pin(async move { connector.connect(&address).await });
                self.pending = Some(PendingConnect { id, future });
            }
            Action::AbortConnect { id } => {
                if self.pending.as_ref().is_some_and(|pending| pending.id == id) {
                    debug!(%id, "aborting connection attempt");
                    self.pending = None;
                }
            }
            Action::CloseTransport { id } => {
                if let Some(mut active) = self.active.take() {
                    if active.id == id {
                        self.close_transport(&mut active).await;
                    } else {
                        self.active = Some(active);
                    }
                }
                follow_up.push_back(LinkEvent::Closed {
                    id,
                    close: CloseInfo::normal(),
                });
            }
            Action::Transmit(frame) => {
                let sent = match self.active.as_mut() {
                    Some(active) => active.stream.send(frame.clone()).await,
                    None => Err(anyhow::anyhow!("no open transport")),
                };
                if let Err(e) = sent {
                    warn!(error = %e, "transmit failed, frame re-queued");
                    follow_up.push_back(LinkEvent::SendFailed(frame));
                }
            }
            Action::ScheduleRetry { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.retry = Some(Box::pin(sleep(delay)));
            }
            Action::CancelRetry => {
                self.retry = None;
            }
            Action::RetriesExhausted { attempts } => {
                warn!(
                    attempts,
                    address = self.machine.address().unwrap_or_default(),
                    "reconnect attempts exhausted, giving up"
                );
            }
            Action::SetConnected(connected) => {
                self.connected_tx.send_replace(connected);
            }
            Action::NotifyOpen => {
                info!(address = self.machine.address().unwrap_or_default(), "connected");
                if let Some(on_open) = self.callbacks.on_open.as_mut() {
                    on_open();
                }
            }
            Action::NotifyClose(close) => {
                info!(
                    code = close.code,
                    reason = %close.reason,
                    clean = close.was_clean,
                    "disconnected"
                );
                if let Some(on_close) = self.callbacks.on_close.as_mut() {
                    on_close(&close);
                }
            }
            Action::NotifyError(reason) => {
                if let Some(on_error) = self.callbacks.on_error.as_mut() {
                    on_error(&reason);
                }
            }
        }
    }

    async fn close_transport(&mut self, active: &mut ActiveTransport<C::Stream>) {
        match timeout(self.close_timeout, active.stream.close()).await {
            Ok(Ok(())) => debug!(id = %active.id, "transport closed"),
            Ok(Err(e)) => warn!(id = %active.id, error = %e, "transport close failed"),
            Err(_) => warn!(
                id = %active.id,
                timeout_ms = self.close_timeout.as_millis() as u64,
                "transport close timed out"
            ),
        }
    }
}

async fn next_connect<S>(slot: &mut Option<PendingConnect<S>>) -> (ConnectionId, Result<S>) {
    match slot {
        Some(attempt) => {
            let result = attempt.future.as_mut().await;
            (attempt.id, result)
        }
        None => pending().await,
    }
}

async fn next_event<S: TransportStream>(
    slot: &mut Option<ActiveTransport<S>>,
) -> (ConnectionId, TransportEvent) {
    match slot {
        Some(active) => (active.id, active.stream.recv().await),
        None => pending().await,
    }
}

async fn retry_elapsed(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
