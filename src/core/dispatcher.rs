//! Device link and dispatcher
//!
//! [`Link`] owns the single connection to the device: it opens sockets through
//! a [`Transport`], tracks which socket is current, rejects sends while the
//! socket is not open and schedules a fixed-delay reconnect after every close.
//! [`Dispatcher`] pairs a link with a [`HandlerRegistry`] so inbound frames on
//! the current socket reach the handlers registered for their source.
//!
//! Nothing here performs I/O. Transports feed [`TransportEvent`]s back in,
//! which keeps the state machine identical on native and in the browser.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::protocol::{InboundEvent, Source};
use super::registry::{HandlerError, HandlerRegistry, RouteOutcome};
use crate::ws_state::LinkState;

/// Port of the device's WebSocket server
pub const DEVICE_WS_PORT: u16 = 81;

/// Delay between a close and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Identity of one socket opened by the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notification from a transport back into the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened(ConnectionId),
    Message(ConnectionId, String),
    Error(ConnectionId, String),
    Closed {
        id: ConnectionId,
        code: Option<u16>,
        reason: String,
    },
    /// The reconnect timer fired
    ReconnectDue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to open WebSocket: {0}")]
    Open(String),
    #[error("connection {0} is not available")]
    Unavailable(ConnectionId),
    #[error("failed to send: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("WebSocket is not open (state: {0})")]
    NotOpen(LinkState),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Socket backend driven by the link
///
/// Implementations must not call back into the link synchronously; outcomes
/// are reported later as [`TransportEvent`]s.
pub trait Transport {
    /// Start connecting a new socket
    fn open(&mut self, id: ConnectionId, url: &str) -> Result<(), TransportError>;

    /// Transmit one text frame on an open socket
    fn send_text(&mut self, id: ConnectionId, text: String) -> Result<(), TransportError>;

    /// Drop a socket the link no longer uses
    fn close(&mut self, id: ConnectionId);

    /// Deliver [`TransportEvent::ReconnectDue`] once `delay` has elapsed
    fn schedule_reconnect(&mut self, delay: Duration);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl LinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// `ws://<host>:81/`
    pub fn for_host(host: &str) -> Self {
        Self::new(format!("ws://{}:{}/", host, DEVICE_WS_PORT))
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// The single shared connection to the device
pub struct Link<T: Transport> {
    transport: T,
    config: LinkConfig,
    state: LinkState,
    current: Option<ConnectionId>,
    next_id: u64,
    /// Set while a connection attempt is in flight
    initializing: bool,
    reconnect_pending: bool,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, config: LinkConfig) -> Self {
        Self {
            transport,
            config,
            state: LinkState::Absent,
            current: None,
            next_id: 0,
            initializing: false,
            reconnect_pending: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn current(&self) -> Option<ConnectionId> {
        self.current
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Return the current connection, opening a new one unless it is open or
    /// an attempt is already in flight
    pub fn ensure_connection(&mut self) -> Result<ConnectionId, DispatchError> {
        if let Some(id) = self.current {
            if self.initializing || self.state.is_open() {
                return Ok(id);
            }
            debug!(%id, state = %self.state, "Replacing connection that is not open");
            self.transport.close(id);
            self.current = None;
        }

        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        info!(url = %self.config.url, %id, "Connecting to device");

        if let Err(e) = self.transport.open(id, &self.config.url) {
            error!(error = %e, %id, "Failed to create WebSocket");
            self.state = LinkState::Closed;
            self.initializing = false;
            self.schedule_reconnect();
            return Err(e.into());
        }

        self.current = Some(id);
        self.state = LinkState::Connecting;
        self.initializing = true;
        Ok(id)
    }

    /// Serialize and transmit; rejected without retry unless the link is open
    pub fn send<P: Serialize + ?Sized>(&mut self, payload: &P) -> Result<(), DispatchError> {
        let id = self.ensure_connection()?;
        if !self.state.is_open() {
            error!(state = %self.state, "WebSocket is not open, dropping message");
            return Err(DispatchError::NotOpen(self.state));
        }

        let text = serde_json::to_string(payload)?;
        trace!(%id, len = text.len(), "Sending message");
        self.transport.send_text(id, text).map_err(|e| {
            error!(error = %e, %id, "Failed to send message");
            DispatchError::from(e)
        })
    }

    /// Like [`Link::send`], but a message the link could not deliver is only
    /// logged; returns whether it went out. Only an unencodable payload errors.
    pub fn try_send<P: Serialize + ?Sized>(&mut self, payload: &P) -> Result<bool, DispatchError> {
        match self.send(payload) {
            Ok(()) => Ok(true),
            Err(DispatchError::Encode(e)) => Err(DispatchError::Encode(e)),
            Err(DispatchError::NotOpen(_) | DispatchError::Transport(_)) => Ok(false),
        }
    }

    /// Apply a transport event; returns the text of a frame received on the
    /// current connection
    pub fn on_event(&mut self, event: TransportEvent) -> Option<String> {
        match event {
            TransportEvent::Opened(id) if self.is_current(id) => {
                info!(%id, "WebSocket connected");
                self.state = LinkState::Open;
                self.initializing = false;
                None
            }
            TransportEvent::Message(id, text) if self.is_current(id) => Some(text),
            TransportEvent::Error(id, msg) if self.is_current(id) => {
                error!(%id, error = %msg, "WebSocket error");
                self.initializing = false;
                None
            }
            TransportEvent::Closed { id, code, reason } if self.is_current(id) => {
                warn!(%id, ?code, reason = %reason, "WebSocket closed");
                self.current = None;
                self.state = LinkState::Closed;
                self.initializing = false;
                self.transport.close(id);
                self.schedule_reconnect();
                None
            }
            TransportEvent::ReconnectDue => {
                self.reconnect_pending = false;
                if let Err(e) = self.ensure_connection() {
                    warn!(error = %e, "Reconnect attempt failed");
                }
                None
            }
            stale => {
                trace!(event = ?stale, "Ignoring event from superseded connection");
                None
            }
        }
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.current == Some(id)
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_pending {
            return;
        }
        self.reconnect_pending = true;
        debug!(delay_ms = self.config.reconnect_delay.as_millis() as u64, "Scheduling reconnect");
        self.transport.schedule_reconnect(self.config.reconnect_delay);
    }
}

/// Link plus handler registry, for front ends that own both in one place
pub struct Dispatcher<T: Transport> {
    link: Link<T>,
    registry: HandlerRegistry,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, config: LinkConfig) -> Self {
        Self {
            link: Link::new(transport, config),
            registry: HandlerRegistry::new(),
        }
    }

    pub fn ensure_connection(&mut self) -> Result<ConnectionId, DispatchError> {
        self.link.ensure_connection()
    }

    pub fn register_handler<F>(&mut self, source: Source, handler: F)
    where
        F: FnMut(&InboundEvent) -> Result<(), HandlerError> + 'static,
    {
        self.registry.register(source, handler);
    }

    pub fn send<P: Serialize + ?Sized>(&mut self, payload: &P) -> Result<(), DispatchError> {
        self.link.send(payload)
    }

    pub fn try_send<P: Serialize + ?Sized>(&mut self, payload: &P) -> Result<bool, DispatchError> {
        self.link.try_send(payload)
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link<T> {
        &mut self.link
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Feed one transport event through the link and route any frame it yields
    pub fn handle(&mut self, event: TransportEvent) -> RouteOutcome {
        match self.link.on_event(event) {
            Some(text) => self.registry.route_frame(&text),
            None => RouteOutcome::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::commands::{Command, MaintenanceAction};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeTransport {
        opened: Vec<ConnectionId>,
        sent: Vec<(ConnectionId, String)>,
        closed: Vec<ConnectionId>,
        timers: Vec<Duration>,
        fail_open: bool,
    }

    impl Transport for FakeTransport {
        fn open(&mut self, id: ConnectionId, _url: &str) -> Result<(), TransportError> {
            if self.fail_open {
                return Err(TransportError::Open("invalid url".into()));
            }
            self.opened.push(id);
            Ok(())
        }

        fn send_text(&mut self, id: ConnectionId, text: String) -> Result<(), TransportError> {
            self.sent.push((id, text));
            Ok(())
        }

        fn close(&mut self, id: ConnectionId) {
            self.closed.push(id);
        }

        fn schedule_reconnect(&mut self, delay: Duration) {
            self.timers.push(delay);
        }
    }

    fn dispatcher() -> Dispatcher<FakeTransport> {
        Dispatcher::new(FakeTransport::default(), LinkConfig::for_host("192.168.4.1"))
    }

    fn open(d: &mut Dispatcher<FakeTransport>) -> ConnectionId {
        let id = d.ensure_connection().unwrap();
        d.handle(TransportEvent::Opened(id));
        id
    }

    fn closed(id: ConnectionId) -> TransportEvent {
        TransportEvent::Closed {
            id,
            code: Some(1006),
            reason: String::new(),
        }
    }

    #[test]
    fn test_url_for_host() {
        assert_eq!(LinkConfig::for_host("10.0.0.7").url, "ws://10.0.0.7:81/");
        assert_eq!(LinkConfig::for_host("h").reconnect_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_ensure_connection_is_idempotent_while_connecting() {
        let mut d = dispatcher();
        assert_eq!(d.state(), LinkState::Absent);
        let first = d.ensure_connection().unwrap();
        let second = d.ensure_connection().unwrap();
        assert_eq!(first, second);
        assert_eq!(d.link().transport().opened, vec![first]);
        assert_eq!(d.state(), LinkState::Connecting);
    }

    #[test]
    fn test_ensure_connection_reuses_open_socket() {
        let mut d = dispatcher();
        let id = open(&mut d);
        assert_eq!(d.state(), LinkState::Open);
        assert_eq!(d.ensure_connection().unwrap(), id);
        assert_eq!(d.link().transport().opened.len(), 1);
    }

    #[test]
    fn test_handlers_registered_before_connect_receive_events() {
        let mut d = dispatcher();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b"] {
            let seen = seen.clone();
            d.register_handler(Source::Gpio, move |_| {
                seen.borrow_mut().push(name);
                Ok(())
            });
        }

        let id = open(&mut d);
        d.handle(TransportEvent::Message(id, "Connected to Doppelgänger server.".into()));
        let outcome = d.handle(TransportEvent::Message(
            id,
            r#"{"source":"gpio","status":"success"}"#.into(),
        ));
        assert_eq!(outcome.invoked, 2);
        assert_eq!(*seen.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_send_when_open() {
        let mut d = dispatcher();
        let id = open(&mut d);
        d.send(&Command::Maintenance(MaintenanceAction::ResetGpio)).unwrap();
        let sent = &d.link().transport().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, id);
        let value: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(value, serde_json::json!({"source": "gpio", "reset_gpio": true}));
    }

    #[test]
    fn test_send_while_not_open_is_dropped() {
        let mut d = dispatcher();
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        d.register_handler(Source::Gpio, move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        });

        let err = d.send(&serde_json::json!({"DEBUG": true})).unwrap_err();
        assert!(matches!(err, DispatchError::NotOpen(LinkState::Connecting)));
        // The send still kicked off a connection attempt, but nothing went out
        assert_eq!(d.link().transport().opened.len(), 1);
        assert!(d.link().transport().sent.is_empty());
        assert_eq!(d.registry().handler_count(Source::Gpio), 1);
        assert_eq!(*calls.borrow(), 0);

        // Not replayed once the socket opens
        let id = d.link().current().unwrap();
        d.handle(TransportEvent::Opened(id));
        assert!(d.link().transport().sent.is_empty());
    }

    #[test]
    fn test_try_send_swallows_undeliverable_messages() {
        let mut d = dispatcher();
        assert!(!d.try_send(&serde_json::json!({"DEBUG": true})).unwrap());
        assert!(d.link().transport().sent.is_empty());

        let id = d.link().current().unwrap();
        d.handle(TransportEvent::Opened(id));
        assert!(d.try_send(&serde_json::json!({"DEBUG": true})).unwrap());
        assert_eq!(d.link().transport().sent.len(), 1);

        // Closed with the reconnect still pending
        d.handle(closed(id));
        assert!(!d.try_send(&serde_json::json!({"DEBUG": false})).unwrap());
        assert_eq!(d.link().transport().sent.len(), 1);
    }

    #[test]
    fn test_try_send_reports_unencodable_payload() {
        let mut d = dispatcher();
        open(&mut d);
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON");
        assert!(matches!(d.try_send(&bad), Err(DispatchError::Encode(_))));
        assert!(d.link().transport().sent.is_empty());
    }

    #[test]
    fn test_close_schedules_single_reconnect() {
        let mut d = dispatcher();
        let first = open(&mut d);

        d.handle(closed(first));
        assert_eq!(d.state(), LinkState::Closed);
        assert_eq!(d.link().current(), None);
        assert_eq!(d.link().transport().timers, vec![DEFAULT_RECONNECT_DELAY]);
        assert!(d.link().transport().closed.contains(&first));

        // A repeated close for the same socket schedules nothing more
        d.handle(closed(first));
        assert_eq!(d.link().transport().timers.len(), 1);
        assert_eq!(d.link().transport().opened.len(), 1);

        d.handle(TransportEvent::ReconnectDue);
        let second = d.link().current().unwrap();
        assert_ne!(first, second);
        assert_eq!(d.state(), LinkState::Connecting);
        assert_eq!(d.link().transport().opened, vec![first, second]);
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut d = dispatcher();
        let hits = Rc::new(RefCell::new(0));
        let counter = hits.clone();
        d.register_handler(Source::Cards, move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        });

        let first = open(&mut d);
        d.handle(closed(first));
        d.handle(TransportEvent::ReconnectDue);
        let second = d.link().current().unwrap();

        d.handle(TransportEvent::Opened(first));
        assert_eq!(d.state(), LinkState::Connecting);
        d.handle(TransportEvent::Message(
            first,
            r#"{"source":"cards","status":"success"}"#.into(),
        ));
        assert_eq!(*hits.borrow(), 0);
        d.handle(closed(first));
        assert_eq!(d.link().current(), Some(second));
    }

    #[test]
    fn test_error_releases_in_flight_guard() {
        let mut d = dispatcher();
        let first = d.ensure_connection().unwrap();
        d.handle(TransportEvent::Error(first, "refused".into()));
        assert_eq!(d.state(), LinkState::Connecting);

        let second = d.ensure_connection().unwrap();
        assert_ne!(first, second);
        assert_eq!(d.link().transport().closed, vec![first]);
    }

    #[test]
    fn test_open_failure_schedules_reconnect() {
        let transport = FakeTransport {
            fail_open: true,
            ..Default::default()
        };
        let config = LinkConfig::new("not a url").with_reconnect_delay(Duration::from_millis(10));
        let mut d = Dispatcher::new(transport, config);

        assert!(matches!(d.ensure_connection(), Err(DispatchError::Transport(_))));
        assert_eq!(d.state(), LinkState::Closed);
        assert_eq!(d.link().transport().timers, vec![Duration::from_millis(10)]);

        // Still failing: the timer fires, the attempt fails, one new timer
        d.handle(TransportEvent::ReconnectDue);
        assert_eq!(d.link().transport().timers.len(), 2);
    }
}
