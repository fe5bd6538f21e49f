//! Native WebSocket transport for talking to the device
//!
//! Each socket runs in its own tokio task with tokio-tungstenite. Outcomes
//! come back over an unbounded channel and are applied by the single owner of
//! the dispatcher, so the dispatcher itself needs no locking.

use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::core::{
    ConnectionId, DispatchError, Dispatcher, LinkConfig, RouteOutcome, Transport, TransportError,
    TransportEvent,
};

/// tokio-tungstenite backend for [`Dispatcher`]
pub struct NativeTransport {
    events: UnboundedSender<TransportEvent>,
    /// Outbound queue of every live socket task
    sockets: HashMap<ConnectionId, UnboundedSender<Message>>,
}

impl NativeTransport {
    /// Create the transport and the receiver its events arrive on
    pub fn new() -> (Self, UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events: tx,
            sockets: HashMap::new(),
        };
        (transport, rx)
    }
}

impl Transport for NativeTransport {
    fn open(&mut self, id: ConnectionId, url: &str) -> Result<(), TransportError> {
        let handle = Handle::try_current().map_err(|e| TransportError::Open(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets.insert(id, tx);
        handle.spawn(run_socket(id, url.to_string(), rx, self.events.clone()));
        Ok(())
    }

    fn send_text(&mut self, id: ConnectionId, text: String) -> Result<(), TransportError> {
        let socket = self
            .sockets
            .get(&id)
            .ok_or(TransportError::Unavailable(id))?;
        socket
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::Unavailable(id))
    }

    fn close(&mut self, id: ConnectionId) {
        // Dropping the sender ends the socket task's write half
        if self.sockets.remove(&id).is_some() {
            debug!(%id, "Socket released");
        }
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        let events = self.events.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(TransportEvent::ReconnectDue);
                });
            }
            Err(e) => error!(error = %e, "No tokio runtime, cannot schedule reconnect"),
        }
    }
}

async fn run_socket(
    id: ConnectionId,
    url: String,
    mut outbound: UnboundedReceiver<Message>,
    events: UnboundedSender<TransportEvent>,
) {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;

    debug!(%id, url = %url, "Opening socket");

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(id, e.to_string()));
            let _ = events.send(TransportEvent::Closed {
                id,
                code: None,
                reason: e.to_string(),
            });
            return;
        }
    };

    if events.send(TransportEvent::Opened(id)).is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();

    let (code, reason) = loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(msg) => {
                    if let Err(e) = write.send(msg).await {
                        let _ = events.send(TransportEvent::Error(id, e.to_string()));
                        break (None, e.to_string());
                    }
                }
                None => {
                    info!(%id, "Closing released socket");
                    let _ = write.close().await;
                    break (Some(1000), "released".to_string());
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Message(id, text.to_string())).is_err() {
                        // Receiver dropped, exit
                        break (None, "client dropped".to_string());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(id, e.to_string()));
                    break (None, e.to_string());
                }
                None => {
                    warn!(%id, "WebSocket stream ended");
                    break (None, "stream ended".to_string());
                }
            }
        }
    };

    let _ = events.send(TransportEvent::Closed { id, code, reason });
}

/// Dispatcher bound to the native transport, pumped from one tokio task
pub struct NativeClient {
    dispatcher: Dispatcher<NativeTransport>,
    events: UnboundedReceiver<TransportEvent>,
}

impl NativeClient {
    pub fn new(config: LinkConfig) -> Self {
        let (transport, events) = NativeTransport::new();
        Self {
            dispatcher: Dispatcher::new(transport, config),
            events,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<NativeTransport> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<NativeTransport> {
        &mut self.dispatcher
    }

    /// Wait for the next transport event and apply it
    pub async fn next(&mut self) -> Option<RouteOutcome> {
        let event = self.events.recv().await?;
        Some(self.dispatcher.handle(event))
    }

    /// Connect if needed and keep applying events until the link is open
    pub async fn wait_open(&mut self, limit: Duration) -> Result<(), DispatchError> {
        self.dispatcher.ensure_connection()?;
        let opened = tokio::time::timeout(limit, async {
            while !self.dispatcher.state().is_open() {
                if self.next().await.is_none() {
                    break;
                }
            }
        })
        .await;

        match opened {
            Ok(()) if self.dispatcher.state().is_open() => Ok(()),
            _ => Err(DispatchError::NotOpen(self.dispatcher.state())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Command, ConnectionId, GpioCommand, Source};
    use futures_util::{SinkExt, StreamExt};
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn test_round_trip_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Text("Connected to Doppelgänger server.".into()))
                .await
                .unwrap();
            let received = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => break text.to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {other:?}"),
                }
            };
            ws.send(Message::Text(r#"{"source":"gpio","status":"success"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();

            // The client comes back after its reconnect delay
            let (tcp, _) = listener.accept().await.unwrap();
            let _second = accept_async(tcp).await.unwrap();
            received
        });

        let config = LinkConfig::new(format!("ws://{}/", addr))
            .with_reconnect_delay(Duration::from_millis(50));
        let mut client = NativeClient::new(config);

        let replies = Rc::new(Cell::new(0));
        let counter = replies.clone();
        client
            .dispatcher_mut()
            .register_handler(Source::Gpio, move |event| {
                if event.is_success() {
                    counter.set(counter.get() + 1);
                }
                Ok(())
            });

        client.wait_open(Duration::from_secs(5)).await.unwrap();
        client
            .dispatcher_mut()
            .send(&Command::Gpio(GpioCommand {
                pin35_enabled: true,
                pin35_pulse_duration: 1000,
                pin36_enabled: false,
                pin36_pulse_duration: 500,
            }))
            .unwrap();

        timeout(Duration::from_secs(5), async {
            while replies.get() == 0 {
                client.next().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(replies.get(), 1);

        timeout(Duration::from_secs(5), async {
            loop {
                client.next().await;
                let dispatcher = client.dispatcher();
                if dispatcher.state().is_open() && dispatcher.link().current() == Some(ConnectionId(2)) {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let received = server.await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(value["pin35_enabled"], serde_json::json!(true));
        assert_eq!(value["pin36_pulse_duration"], serde_json::json!(500));
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected() {
        let mut client = NativeClient::new(LinkConfig::new("ws://127.0.0.1:9/"));
        let err = client
            .dispatcher_mut()
            .send(&serde_json::json!({"DEBUG": false}))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotOpen(_)));
    }
}
