//! Connection State Machine
//!
//! Defines the lifecycle of a single streaming connection, the outbound queue
//! and the reconnect bookkeeping. The machine performs no I/O: every input is
//! a [`LinkEvent`] and every side effect comes back as an [`Action`] for the
//! runtime driver to carry out.
//!
//! ```text
//! Disconnected --Connect--> Connecting --Opened--> Open --Disconnect--> Closing --Closed--> Disconnected
//!      ^                        |                    |
//!      |                   ConnectFailed           Closed (involuntary)
//!      +--RetryElapsed----------+--------------------+
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::codec::Frame;
use crate::limits::{ABNORMAL_CLOSE_CODE, NORMAL_CLOSE_CODE};
use crate::policy::ReconnectPolicy;

/// Lifecycle state of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Generation number of a connection attempt
///
/// Every attempt gets a fresh id. Transport events carrying any other id
/// belong to a connection that has already been discarded and are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Details of a transport close event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseInfo {
    /// Close requested by the owning application
    pub fn normal() -> Self {
        Self {
            code: NORMAL_CLOSE_CODE,
            reason: String::new(),
            was_clean: true,
        }
    }

    /// Connection lost without a close handshake
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSE_CODE,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Application (re)configured the target address
    Connect { address: String },
    /// Application requested a manual close
    Disconnect,
    /// Application wants a frame delivered
    Send(Frame),
    /// Transmitting a frame on the open transport failed
    SendFailed(Frame),
    /// Transport finished establishing
    Opened(ConnectionId),
    /// Transport could not be established
    ConnectFailed { id: ConnectionId, reason: String },
    /// Transport closed
    Closed { id: ConnectionId, close: CloseInfo },
    /// Transport reported an error (informational)
    TransportError { id: ConnectionId, reason: String },
    /// The scheduled reconnect delay has elapsed
    RetryElapsed,
}

/// Side effects requested from the runtime driver
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Begin establishing a transport to `address`
    StartConnect { id: ConnectionId, address: String },
    /// Drop an in-flight connection attempt
    AbortConnect { id: ConnectionId },
    /// Gracefully close the transport, then report `Closed` for `id`
    CloseTransport { id: ConnectionId },
    /// Write a frame to the open transport
    Transmit(Frame),
    /// Arm the reconnect timer
    ScheduleRetry { attempt: u32, delay: Duration },
    /// Disarm the reconnect timer
    CancelRetry,
    /// Reconnect budget ran out; no timer was armed
    RetriesExhausted { attempts: u32 },
    /// Update the observable "connected" signal
    SetConnected(bool),
    NotifyOpen,
    NotifyClose(CloseInfo),
    NotifyError(String),
}

/// The connection state machine
#[derive(Debug)]
pub struct LinkStateMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    address: Option<String>,
    current: Option<ConnectionId>,
    next_id: u64,
    queue: VecDeque<Frame>,
    attempts: u32,
    manual_close: bool,
    retry_pending: bool,
    connect_after_close: bool,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl LinkStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            address: None,
            current: None,
            next_id: 0,
            queue: VecDeque::new(),
            attempts: 0,
            manual_close: false,
            retry_pending: false,
            connect_after_close: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Current target address, if one has been configured
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Id of the live attempt or connection
    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Reconnect attempts since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of frames waiting for an open connection
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_manually_closed(&self) -> bool {
        self.manual_close
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Replace the reconnect policy; applies to the next scheduling decision
    pub fn set_policy(&mut self, policy: ReconnectPolicy) {
        self.policy = policy;
    }

    /// Process an event and return the side effects to perform, in order
    pub fn handle(&mut self, event: LinkEvent) -> Vec<Action> {
        match event {
            LinkEvent::Connect { address } => self.on_connect(address),
            LinkEvent::Disconnect => self.on_disconnect(),
            LinkEvent::Send(frame) => self.on_send(frame),
            LinkEvent::SendFailed(frame) => {
                self.queue.push_back(frame);
                Vec::new()
            }
            LinkEvent::Opened(id) => self.on_opened(id),
            LinkEvent::ConnectFailed { id, reason } => self.on_connect_failed(id, reason),
            LinkEvent::Closed { id, close } => self.on_closed(id, close),
            LinkEvent::TransportError { id, reason } => {
                if self.current == Some(id) {
                    vec![Action::NotifyError(reason)]
                } else {
                    Vec::new()
                }
            }
            LinkEvent::RetryElapsed => self.on_retry_elapsed(),
        }
    }

    fn on_connect(&mut self, address: String) -> Vec<Action> {
        self.manual_close = false;

        let same_address = self.address.as_deref() == Some(address.as_str());
        if same_address
            && matches!(self.state, ConnectionState::Open | ConnectionState::Connecting)
        {
            return Vec::new();
        }

        let mut actions = self.cancel_retry();
        self.attempts = 0;
        if !same_address {
            self.address = Some(address);
        }

        match self.state {
            ConnectionState::Open => {
                // Only reachable with a new address
                actions.extend(self.begin_close());
                self.connect_after_close = true;
            }
            ConnectionState::Connecting => {
                if let Some(id) = self.current.take() {
                    actions.push(Action::AbortConnect { id });
                }
                // Nothing was delivered yet; the queue follows the new address
                self.state = ConnectionState::Disconnected;
                actions.extend(self.start_connect());
            }
            ConnectionState::Closing => {
                self.connect_after_close = true;
            }
            ConnectionState::Disconnected => {
                actions.extend(self.start_connect());
            }
        }

        actions
    }

    fn on_disconnect(&mut self) -> Vec<Action> {
        self.manual_close = true;
        self.connect_after_close = false;

        let mut actions = self.cancel_retry();
        self.queue.clear();

        match self.state {
            ConnectionState::Open => actions.extend(self.begin_close()),
            ConnectionState::Connecting => {
                if let Some(id) = self.current.take() {
                    actions.push(Action::AbortConnect { id });
                }
                self.state = ConnectionState::Disconnected;
            }
            ConnectionState::Closing | ConnectionState::Disconnected => {}
        }

        actions
    }

    fn on_send(&mut self, frame: Frame) -> Vec<Action> {
        if self.state == ConnectionState::Open {
            vec![Action::Transmit(frame)]
        } else {
            self.queue.push_back(frame);
            Vec::new()
        }
    }

    fn on_opened(&mut self, id: ConnectionId) -> Vec<Action> {
        if self.current != Some(id) || self.state != ConnectionState::Connecting {
            return Vec::new();
        }

        self.state = ConnectionState::Open;
        self.attempts = 0;

        let mut actions = Vec::with_capacity(self.queue.len() + 2);
        actions.push(Action::SetConnected(true));
        actions.extend(self.queue.drain(..).map(Action::Transmit));
        actions.push(Action::NotifyOpen);
        actions
    }

    fn on_connect_failed(&mut self, id: ConnectionId, reason: String) -> Vec<Action> {
        if self.current != Some(id) || self.state != ConnectionState::Connecting {
            return Vec::new();
        }

        self.current = None;
        self.state = ConnectionState::Disconnected;

        let mut actions = vec![Action::NotifyError(reason)];
        actions.extend(self.schedule_retry());
        actions
    }

    fn on_closed(&mut self, id: ConnectionId, close: CloseInfo) -> Vec<Action> {
        if self.current != Some(id) {
            return Vec::new();
        }

        match self.state {
            ConnectionState::Closing => {
                self.current = None;
                self.state = ConnectionState::Disconnected;
                if std::mem::take(&mut self.connect_after_close) && !self.manual_close {
                    self.start_connect()
                } else {
                    Vec::new()
                }
            }
            ConnectionState::Open => {
                self.current = None;
                self.state = ConnectionState::Disconnected;
                self.queue.clear();

                let mut actions = vec![Action::SetConnected(false), Action::NotifyClose(close)];
                actions.extend(self.schedule_retry());
                actions
            }
            ConnectionState::Connecting => {
                // Only for drivers that surface transport events before `Opened`;
                // treated like a failed attempt
                self.current = None;
                self.state = ConnectionState::Disconnected;
                self.schedule_retry()
            }
            ConnectionState::Disconnected => Vec::new(),
        }
    }

    fn on_retry_elapsed(&mut self) -> Vec<Action> {
        if !self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = false;

        if self.manual_close || self.state != ConnectionState::Disconnected {
            return Vec::new();
        }

        self.start_connect()
    }

    /// Enter Connecting against the current address under a fresh id
    fn start_connect(&mut self) -> Vec<Action> {
        let Some(address) = self.address.clone() else {
            return Vec::new();
        };

        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.current = Some(id);
        self.state = ConnectionState::Connecting;

        vec![Action::StartConnect { id, address }]
    }

    /// Tear down an open connection on the application's request
    fn begin_close(&mut self) -> Vec<Action> {
        self.state = ConnectionState::Closing;
        self.queue.clear();

        let mut actions = vec![
            Action::SetConnected(false),
            Action::NotifyClose(CloseInfo::normal()),
        ];
        if let Some(id) = self.current {
            actions.push(Action::CloseTransport { id });
        }
        actions
    }

    /// Single retry routine for both failed and lost connections
    fn schedule_retry(&mut self) -> Vec<Action> {
        if self.manual_close || self.address.is_none() || !self.policy.enabled {
            return Vec::new();
        }

        let attempt = self.attempts + 1;
        if !self.policy.allows_attempt(attempt) {
            return vec![Action::RetriesExhausted {
                attempts: self.attempts,
            }];
        }

        self.attempts = attempt;
        self.retry_pending = true;
        vec![Action::ScheduleRetry {
            attempt,
            delay: self.policy.delay_for_attempt(attempt),
        }]
    }

    fn cancel_retry(&mut self) -> Vec<Action> {
        if std::mem::take(&mut self.retry_pending) {
            vec![Action::CancelRetry]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "wss://feed.example/ws";
    const OTHER_FEED: &str = "wss://other.example/ws";

    fn connect(fsm: &mut LinkStateMachine, address: &str) -> Vec<Action> {
        fsm.handle(LinkEvent::Connect {
            address: address.to_string(),
        })
    }

    fn started_id(actions: &[Action]) -> ConnectionId {
        actions
            .iter()
            .find_map(|action| match action {
                Action::StartConnect { id, .. } => Some(*id),
                _ => None,
            })
            .expect("expected StartConnect")
    }

    fn open(fsm: &mut LinkStateMachine, address: &str) -> ConnectionId {
        let id = started_id(&connect(fsm, address));
        fsm.handle(LinkEvent::Opened(id));
        id
    }

    fn drop_connection(fsm: &mut LinkStateMachine, id: ConnectionId) -> Vec<Action> {
        fsm.handle(LinkEvent::Closed {
            id,
            close: CloseInfo::abnormal("reset"),
        })
    }

    fn transmitted(actions: &[Action]) -> Vec<Frame> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Transmit(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let fsm = LinkStateMachine::default();
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
        assert!(!fsm.is_connected());
        assert_eq!(fsm.address(), None);
    }

    #[test]
    fn test_connect_then_open() {
        let mut fsm = LinkStateMachine::default();
        let actions = connect(&mut fsm, FEED);
        assert_eq!(fsm.state(), ConnectionState::Connecting);
        assert!(matches!(
            &actions[..],
            [Action::StartConnect { address, .. }] if address == FEED
        ));

        let actions = fsm.handle(LinkEvent::Opened(started_id(&actions)));
        assert_eq!(actions, vec![Action::SetConnected(true), Action::NotifyOpen]);
        assert!(fsm.is_connected());
    }

    #[test]
    fn test_queued_frames_flush_in_order_on_open() {
        let mut fsm = LinkStateMachine::default();
        for n in 0..5 {
            assert!(fsm.handle(LinkEvent::Send(Frame::from(format!("m{n}")))).is_empty());
        }
        let id = started_id(&connect(&mut fsm, FEED));
        fsm.handle(LinkEvent::Send(Frame::from("m5")));
        assert_eq!(fsm.queued(), 6);

        let actions = fsm.handle(LinkEvent::Opened(id));
        let expected: Vec<Frame> = (0..6).map(|n| Frame::from(format!("m{n}"))).collect();
        assert_eq!(transmitted(&actions), expected);
        assert_eq!(actions.first(), Some(&Action::SetConnected(true)));
        assert_eq!(actions.last(), Some(&Action::NotifyOpen));
        assert_eq!(fsm.queued(), 0);

        // Flushed exactly once
        let id2 = {
            let actions = drop_connection(&mut fsm, id);
            assert!(transmitted(&actions).is_empty());
            fsm.handle(LinkEvent::RetryElapsed);
            fsm.current_id().expect("retry started")
        };
        assert!(transmitted(&fsm.handle(LinkEvent::Opened(id2))).is_empty());
    }

    #[test]
    fn test_send_while_open_transmits_immediately() {
        let mut fsm = LinkStateMachine::default();
        open(&mut fsm, FEED);
        let actions = fsm.handle(LinkEvent::Send(Frame::from("now")));
        assert_eq!(actions, vec![Action::Transmit(Frame::from("now"))]);
    }

    #[test]
    fn test_send_failure_requeues() {
        let mut fsm = LinkStateMachine::default();
        open(&mut fsm, FEED);
        fsm.handle(LinkEvent::SendFailed(Frame::from("lost")));
        assert_eq!(fsm.queued(), 1);
        assert!(fsm.is_connected());
    }

    #[test]
    fn test_connect_same_address_is_noop() {
        let mut fsm = LinkStateMachine::default();
        connect(&mut fsm, FEED);
        assert!(connect(&mut fsm, FEED).is_empty());

        let id = fsm.current_id().unwrap();
        fsm.handle(LinkEvent::Opened(id));
        assert!(connect(&mut fsm, FEED).is_empty());
        assert_eq!(fsm.current_id(), Some(id));
    }

    #[test]
    fn test_involuntary_close_schedules_retry() {
        let mut fsm = LinkStateMachine::default();
        let id = open(&mut fsm, FEED);
        fsm.handle(LinkEvent::Send(Frame::from("x")));
        fsm.handle(LinkEvent::SendFailed(Frame::from("x")));

        let actions = drop_connection(&mut fsm, id);
        assert_eq!(
            actions,
            vec![
                Action::SetConnected(false),
                Action::NotifyClose(CloseInfo::abnormal("reset")),
                Action::ScheduleRetry {
                    attempt: 1,
                    delay: Duration::from_millis(3000)
                },
            ]
        );
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
        assert_eq!(fsm.queued(), 0);
        assert!(fsm.retry_pending());

        let actions = fsm.handle(LinkEvent::RetryElapsed);
        assert!(matches!(&actions[..], [Action::StartConnect { address, .. }] if address == FEED));
    }

    #[test]
    fn test_backoff_grows_across_failed_attempts() {
        let mut fsm = LinkStateMachine::default();
        let mut id = started_id(&connect(&mut fsm, FEED));
        let mut delays = Vec::new();

        for _ in 0..3 {
            let actions = fsm.handle(LinkEvent::ConnectFailed {
                id,
                reason: "refused".into(),
            });
            assert_eq!(actions[0], Action::NotifyError("refused".into()));
            match actions[1] {
                Action::ScheduleRetry { delay, .. } => delays.push(delay.as_millis()),
                ref other => panic!("unexpected action {other:?}"),
            }
            id = started_id(&fsm.handle(LinkEvent::RetryElapsed));
        }

        assert_eq!(delays, vec![3000, 4500, 6750]);
        fsm.handle(LinkEvent::Opened(id));
        assert_eq!(fsm.attempts(), 0);
    }

    #[test]
    fn test_disconnect_clears_queue_and_cancels_retry() {
        let mut fsm = LinkStateMachine::default();
        let id = open(&mut fsm, FEED);
        drop_connection(&mut fsm, id);
        fsm.handle(LinkEvent::Send(Frame::from("pending")));
        assert!(fsm.retry_pending());

        let actions = fsm.handle(LinkEvent::Disconnect);
        assert_eq!(actions, vec![Action::CancelRetry]);
        assert_eq!(fsm.queued(), 0);
        assert!(fsm.is_manually_closed());

        // A timer that fires anyway is a no-op
        assert!(fsm.handle(LinkEvent::RetryElapsed).is_empty());
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_while_open() {
        let mut fsm = LinkStateMachine::default();
        let id = open(&mut fsm, FEED);

        let actions = fsm.handle(LinkEvent::Disconnect);
        assert_eq!(
            actions,
            vec![
                Action::SetConnected(false),
                Action::NotifyClose(CloseInfo::normal()),
                Action::CloseTransport { id },
            ]
        );
        assert_eq!(fsm.state(), ConnectionState::Closing);

        let actions = fsm.handle(LinkEvent::Closed {
            id,
            close: CloseInfo::normal(),
        });
        assert!(actions.is_empty());
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_while_connecting_aborts_attempt() {
        let mut fsm = LinkStateMachine::default();
        let id = started_id(&connect(&mut fsm, FEED));

        let actions = fsm.handle(LinkEvent::Disconnect);
        assert_eq!(actions, vec![Action::AbortConnect { id }]);
        assert_eq!(fsm.state(), ConnectionState::Disconnected);

        // Late events from the aborted attempt are ignored
        assert!(fsm.handle(LinkEvent::Opened(id)).is_empty());
        assert!(!fsm.is_connected());
    }

    #[test]
    fn test_connect_after_disconnect_resumes() {
        let mut fsm = LinkStateMachine::default();
        let id = open(&mut fsm, FEED);
        fsm.handle(LinkEvent::Disconnect);
        fsm.handle(LinkEvent::Closed {
            id,
            close: CloseInfo::normal(),
        });

        let actions = connect(&mut fsm, FEED);
        assert!(!fsm.is_manually_closed());
        assert_ne!(started_id(&actions), id);
    }

    #[test]
    fn test_connect_during_manual_close_reconnects_after_close() {
        let mut fsm = LinkStateMachine::default();
        let id = open(&mut fsm, FEED);
        fsm.handle(LinkEvent::Disconnect);
        assert!(connect(&mut fsm, FEED).is_empty());

        let actions = fsm.handle(LinkEvent::Closed {
            id,
            close: CloseInfo::normal(),
        });
        assert!(matches!(&actions[..], [Action::StartConnect { address, .. }] if address == FEED));
    }

    #[test]
    fn test_address_change_while_open() {
        let mut fsm = LinkStateMachine::default();
        let old = open(&mut fsm, FEED);
        fsm.handle(LinkEvent::Send(Frame::from("stale")));
        fsm.handle(LinkEvent::SendFailed(Frame::from("stale")));

        let actions = connect(&mut fsm, OTHER_FEED);
        assert!(actions.contains(&Action::CloseTransport { id: old }));
        assert!(!actions
            .iter()
            .any(|action| matches!(action, Action::StartConnect { .. })));
        assert_eq!(fsm.queued(), 0);

        // Frames sent after the switch go to the new connection
        fsm.handle(LinkEvent::Send(Frame::from("fresh")));

        let actions = fsm.handle(LinkEvent::Closed {
            id: old,
            close: CloseInfo::normal(),
        });
        let new = match &actions[..] {
            [Action::StartConnect { id, address }] if address == OTHER_FEED => *id,
            other => panic!("unexpected actions {other:?}"),
        };
        assert_ne!(new, old);
        assert!(!fsm.retry_pending());

        let actions = fsm.handle(LinkEvent::Opened(new));
        assert_eq!(transmitted(&actions), vec![Frame::from("fresh")]);
    }

    #[test]
    fn test_address_change_while_connecting() {
        let mut fsm = LinkStateMachine::default();
        let old = started_id(&connect(&mut fsm, FEED));

        let actions = connect(&mut fsm, OTHER_FEED);
        assert_eq!(actions[0], Action::AbortConnect { id: old });
        let new = started_id(&actions);

        // The old attempt failing late must not schedule anything
        assert!(fsm
            .handle(LinkEvent::ConnectFailed {
                id: old,
                reason: "late".into()
            })
            .is_empty());
        assert_eq!(fsm.current_id(), Some(new));
    }

    #[test]
    fn test_address_change_while_connecting_keeps_queue() {
        let mut fsm = LinkStateMachine::default();
        fsm.handle(LinkEvent::Send(Frame::from("subscribe")));
        connect(&mut fsm, FEED);

        let new = started_id(&connect(&mut fsm, OTHER_FEED));
        assert_eq!(fsm.queued(), 1);

        let actions = fsm.handle(LinkEvent::Opened(new));
        assert_eq!(transmitted(&actions), vec![Frame::from("subscribe")]);
    }

    #[test]
    fn test_address_change_while_retry_pending_keeps_queue() {
        let mut fsm = LinkStateMachine::default();
        fsm.handle(LinkEvent::Send(Frame::from("subscribe")));
        let id = started_id(&connect(&mut fsm, FEED));
        fsm.handle(LinkEvent::ConnectFailed {
            id,
            reason: "refused".into(),
        });
        assert!(fsm.retry_pending());

        connect(&mut fsm, OTHER_FEED);
        assert_eq!(fsm.queued(), 1);
    }

    #[test]
    fn test_address_change_resets_attempts() {
        let mut fsm = LinkStateMachine::default();
        let id = started_id(&connect(&mut fsm, FEED));
        fsm.handle(LinkEvent::ConnectFailed {
            id,
            reason: "refused".into(),
        });
        assert_eq!(fsm.attempts(), 1);

        let actions = connect(&mut fsm, OTHER_FEED);
        assert_eq!(actions[0], Action::CancelRetry);
        assert_eq!(fsm.attempts(), 0);
    }

    #[test]
    fn test_stale_close_ignored() {
        let mut fsm = LinkStateMachine::default();
        let old = open(&mut fsm, FEED);
        connect(&mut fsm, OTHER_FEED);
        fsm.handle(LinkEvent::Closed {
            id: old,
            close: CloseInfo::normal(),
        });
        let new = fsm.current_id().unwrap();
        fsm.handle(LinkEvent::Opened(new));

        assert!(drop_connection(&mut fsm, old).is_empty());
        assert!(fsm.is_connected());
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let policy = ReconnectPolicy::default().with_max_attempts(2);
        let mut fsm = LinkStateMachine::new(policy);
        let mut id = started_id(&connect(&mut fsm, FEED));

        for _ in 0..2 {
            fsm.handle(LinkEvent::ConnectFailed {
                id,
                reason: "refused".into(),
            });
            id = started_id(&fsm.handle(LinkEvent::RetryElapsed));
        }

        let actions = fsm.handle(LinkEvent::ConnectFailed {
            id,
            reason: "refused".into(),
        });
        assert_eq!(
            actions,
            vec![
                Action::NotifyError("refused".into()),
                Action::RetriesExhausted { attempts: 2 },
            ]
        );
        assert!(!fsm.retry_pending());
        assert!(fsm.handle(LinkEvent::RetryElapsed).is_empty());
        assert_eq!(fsm.state(), ConnectionState::Disconnected);

        // An explicit connect starts over
        assert!(matches!(
            &connect(&mut fsm, FEED)[..],
            [Action::StartConnect { .. }]
        ));
    }

    #[test]
    fn test_reconnect_disabled() {
        let mut fsm = LinkStateMachine::new(ReconnectPolicy::disabled());
        let id = open(&mut fsm, FEED);
        let actions = drop_connection(&mut fsm, id);
        assert_eq!(
            actions,
            vec![
                Action::SetConnected(false),
                Action::NotifyClose(CloseInfo::abnormal("reset")),
            ]
        );
    }

    #[test]
    fn test_retry_ignored_when_attempt_in_progress() {
        let mut fsm = LinkStateMachine::default();
        let id = open(&mut fsm, FEED);
        drop_connection(&mut fsm, id);
        assert!(fsm.retry_pending());

        // Manual reconnect starts an attempt before the timer fires
        let actions = connect(&mut fsm, FEED);
        assert_eq!(actions[0], Action::CancelRetry);
        let in_flight = started_id(&actions);

        assert!(fsm.handle(LinkEvent::RetryElapsed).is_empty());
        assert_eq!(fsm.current_id(), Some(in_flight));
    }

    #[test]
    fn test_transport_error_is_informational() {
        let mut fsm = LinkStateMachine::default();
        let id = open(&mut fsm, FEED);
        let actions = fsm.handle(LinkEvent::TransportError {
            id,
            reason: "broken pipe".into(),
        });
        assert_eq!(actions, vec![Action::NotifyError("broken pipe".into())]);
        assert!(fsm.is_connected());
    }

    #[test]
    fn test_close_during_handshake_retries() {
        let mut fsm = LinkStateMachine::default();
        let id = started_id(&connect(&mut fsm, FEED));
        let actions = drop_connection(&mut fsm, id);
        assert!(matches!(&actions[..], [Action::ScheduleRetry { attempt: 1, .. }]));
    }
}
