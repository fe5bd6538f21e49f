//! Browser WebSocket transport and the JS-facing device channel

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, Event, MessageEvent, WebSocket};

use crate::core::{
    ConnectionId, HandlerError, InboundEvent, Link, LinkConfig, SharedRegistry, Source, Transport,
    TransportError, TransportEvent,
};

/// Where socket callbacks and timers report to
pub type EventSink = Rc<dyn Fn(TransportEvent)>;

/// One browser socket and the callbacks attached to it
struct Socket {
    ws: WebSocket,
    _on_open: Closure<dyn FnMut(Event)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(Event)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl Socket {
    fn detach(&self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
    }
}

/// web-sys backend for [`Link`]
pub struct WasmTransport {
    sink: EventSink,
    sockets: HashMap<ConnectionId, Socket>,
    /// Released sockets, kept until the next open so a callback that released
    /// its own socket finishes before the closure is freed
    retired: Vec<Socket>,
}

impl WasmTransport {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            sockets: HashMap::new(),
            retired: Vec::new(),
        }
    }
}

impl Transport for WasmTransport {
    fn open(&mut self, id: ConnectionId, url: &str) -> Result<(), TransportError> {
        self.retired.clear();
        let ws = WebSocket::new(url).map_err(|e| TransportError::Open(format!("{e:?}")))?;

        let sink = self.sink.clone();
        let on_open = Closure::wrap(Box::new(move |_: Event| {
            sink(TransportEvent::Opened(id));
        }) as Box<dyn FnMut(Event)>);
        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

        let sink = self.sink.clone();
        let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
            match e.data().dyn_into::<js_sys::JsString>() {
                Ok(txt) => sink(TransportEvent::Message(id, txt.into())),
                Err(_) => debug!(%id, "Ignoring non-text frame"),
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        // Browsers deliver a plain Event here, not an ErrorEvent
        let sink = self.sink.clone();
        let on_error = Closure::wrap(Box::new(move |e: Event| {
            sink(TransportEvent::Error(id, e.type_()));
        }) as Box<dyn FnMut(Event)>);
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        let sink = self.sink.clone();
        let on_close = Closure::wrap(Box::new(move |e: CloseEvent| {
            sink(TransportEvent::Closed {
                id,
                code: Some(e.code()),
                reason: e.reason(),
            });
        }) as Box<dyn FnMut(CloseEvent)>);
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        self.sockets.insert(
            id,
            Socket {
                ws,
                _on_open: on_open,
                _on_message: on_message,
                _on_error: on_error,
                _on_close: on_close,
            },
        );
        Ok(())
    }

    fn send_text(&mut self, id: ConnectionId, text: String) -> Result<(), TransportError> {
        let socket = self.sockets.get(&id).ok_or(TransportError::Unavailable(id))?;
        socket
            .ws
            .send_with_str(&text)
            .map_err(|e| TransportError::Send(format!("{e:?}")))
    }

    fn close(&mut self, id: ConnectionId) {
        let Some(socket) = self.sockets.remove(&id) else {
            return;
        };
        socket.detach();
        if let Err(e) = socket.ws.close() {
            debug!(%id, error = ?e, "Socket close failed");
        }
        self.retired.push(socket);
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        let Some(window) = web_sys::window() else {
            error!("No window, cannot schedule reconnect");
            return;
        };
        let sink = self.sink.clone();
        let callback = Closure::once_into_js(move || sink(TransportEvent::ReconnectDue));
        let millis = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
        if let Err(e) = window
            .set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), millis)
        {
            error!(error = ?e, "Failed to schedule reconnect");
        }
    }
}

type SharedLink = Rc<RefCell<Link<WasmTransport>>>;

/// Apply transport events to the link, then route frames with the link released
/// so handlers may call back into the channel
fn event_sink(link: Weak<RefCell<Link<WasmTransport>>>, registry: SharedRegistry) -> EventSink {
    Rc::new(move |event| {
        let Some(link) = link.upgrade() else {
            return;
        };
        let frame = match link.try_borrow_mut() {
            Ok(mut link) => link.on_event(event),
            Err(_) => {
                warn!(?event, "Link busy, dropping transport event");
                return;
            }
        };
        if let Some(text) = frame {
            registry.route_frame(&text);
        }
    })
}

fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn event_to_js(event: &InboundEvent) -> Result<JsValue, HandlerError> {
    let text = event.body.to_string();
    js_sys::JSON::parse(&text).map_err(|e| HandlerError::new(format!("{e:?}")))
}

/// The page's connection to the device, created once and handed to every form
#[wasm_bindgen]
pub struct DeviceChannel {
    link: SharedLink,
    registry: SharedRegistry,
}

#[wasm_bindgen]
impl DeviceChannel {
    /// Connect to `url`, or to port 81 on the host that served the page.
    /// The first connection attempt starts immediately.
    #[wasm_bindgen(constructor)]
    pub fn new(url: Option<String>) -> Result<DeviceChannel, JsValue> {
        let config = match url {
            Some(url) => LinkConfig::new(url),
            None => {
                let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
                LinkConfig::for_host(&window.location().hostname()?)
            }
        };

        let registry = SharedRegistry::new();
        let link = Rc::new_cyclic(|weak| {
            let transport = WasmTransport::new(event_sink(weak.clone(), registry.clone()));
            RefCell::new(Link::new(transport, config))
        });
        let channel = DeviceChannel { link, registry };
        channel.ensure_connection();
        Ok(channel)
    }

    /// Open the socket unless it is open or connecting; returns the link state.
    /// A failed attempt is logged and retried after the reconnect delay.
    #[wasm_bindgen(js_name = ensureConnection)]
    pub fn ensure_connection(&self) -> String {
        let mut link = self.link.borrow_mut();
        if let Err(e) = link.ensure_connection() {
            warn!(error = %e, "Connection attempt failed");
        }
        link.state().label().to_string()
    }

    /// Call `handler(message)` for every reply tagged with `source`.
    /// Handlers added from inside a handler run from the next message on.
    #[wasm_bindgen(js_name = registerHandler)]
    pub fn register_handler(&self, source: &str, handler: js_sys::Function) -> Result<(), JsValue> {
        let source: Source = source.parse().map_err(to_js_error)?;
        self.registry.register(source, move |event| {
            let message = event_to_js(event)?;
            handler
                .call1(&JsValue::NULL, &message)
                .map(|_| ())
                .map_err(|e| HandlerError::new(format!("{e:?}")))
        });
        Ok(())
    }

    /// Send a JSON-serializable object and return whether it went out.
    /// A message the socket cannot take right now is logged to the console
    /// and dropped; only a payload that is not valid JSON throws.
    pub fn send(&self, payload: JsValue) -> Result<bool, JsValue> {
        let text: String = js_sys::JSON::stringify(&payload)?.into();
        let value: serde_json::Value = serde_json::from_str(&text).map_err(to_js_error)?;
        self.link
            .borrow_mut()
            .try_send(&value)
            .map_err(to_js_error)
    }

    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        self.link.borrow().state().label().to_string()
    }
}

fn to_js_strings(errors: Vec<String>) -> js_sys::Array {
    errors.into_iter().map(JsValue::from).collect()
}

/// Error messages for a reset card template; empty when valid
#[wasm_bindgen(js_name = validateResetCardInput)]
pub fn validate_reset_card_input(
    bit_length: &str,
    facility_code: &str,
    card_number: &str,
) -> js_sys::Array {
    to_js_strings(crate::core::validate_reset_card_input(
        bit_length,
        facility_code,
        card_number,
    ))
}

#[wasm_bindgen(js_name = validatePaxtonResetInput)]
pub fn validate_paxton_reset_input(hex: &str) -> js_sys::Array {
    to_js_strings(crate::core::validate_paxton_reset_input(hex))
}

/// Rows of `{BL, FC, CN}` from the captured card log
#[wasm_bindgen(js_name = parseCardsCsv)]
pub fn parse_cards_csv(text: &str) -> Result<JsValue, JsValue> {
    let rows = crate::core::parse_cards_csv(text);
    let json = serde_json::to_string(&rows).map_err(to_js_error)?;
    js_sys::JSON::parse(&json)
}
