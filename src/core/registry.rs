//! Source-keyed handler registry
//!
//! Handlers for a source run in registration order for every matching event.
//! A handler that fails or panics is logged and skipped; its siblings still run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use super::protocol::{classify_frame, Frame, InboundEvent, Source};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type Handler = Box<dyn FnMut(&InboundEvent) -> Result<(), HandlerError>>;

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteOutcome {
    /// Handlers that ran to completion
    pub invoked: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Source, Vec<Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; registering twice yields two invocations per event
    pub fn register<F>(&mut self, source: Source, handler: F)
    where
        F: FnMut(&InboundEvent) -> Result<(), HandlerError> + 'static,
    {
        self.push(source, Box::new(handler));
    }

    fn push(&mut self, source: Source, handler: Handler) {
        let list = self.handlers.entry(source).or_default();
        list.push(handler);
        debug!(%source, count = list.len(), "Handler registered");
    }

    pub fn handler_count(&self, source: Source) -> usize {
        self.handlers.get(&source).map_or(0, Vec::len)
    }

    /// Classify a text frame and run the handlers it routes to
    pub fn route_frame(&mut self, text: &str) -> RouteOutcome {
        match classify_frame(text) {
            Frame::Banner => {
                trace!("Ignoring connection banner");
                RouteOutcome::default()
            }
            Frame::Malformed(e) => {
                warn!(error = %e, "Failed to parse WebSocket message");
                RouteOutcome::default()
            }
            Frame::Unrouted { source } => {
                trace!(?source, "Dropping message without a known source");
                RouteOutcome::default()
            }
            Frame::Event(event) => self.dispatch(&event),
        }
    }

    /// Run every handler registered for the event's source
    pub fn dispatch(&mut self, event: &InboundEvent) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        let Some(handlers) = self.handlers.get_mut(&event.source) else {
            trace!(source = %event.source, "No handlers registered");
            return outcome;
        };

        for (index, handler) in handlers.iter_mut().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => outcome.invoked += 1,
                Ok(Err(e)) => {
                    error!(source = %event.source, index, error = %e, "Handler failed");
                    outcome.failed += 1;
                }
                Err(_) => {
                    error!(source = %event.source, index, "Handler panicked");
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

/// Registry shared with the handlers it runs
///
/// A handler may register further handlers while an event is being
/// dispatched. Those are held back and appended once dispatch finishes, so
/// they see events from the next frame on.
#[derive(Clone, Default)]
pub struct SharedRegistry {
    inner: Rc<RefCell<HandlerRegistry>>,
    deferred: Rc<RefCell<Vec<(Source, Handler)>>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, source: Source, handler: F)
    where
        F: FnMut(&InboundEvent) -> Result<(), HandlerError> + 'static,
    {
        match self.inner.try_borrow_mut() {
            Ok(mut registry) => registry.register(source, handler),
            Err(_) => {
                debug!(%source, "Dispatch in progress, deferring handler");
                self.deferred.borrow_mut().push((source, Box::new(handler)));
            }
        }
    }

    /// Registered handlers for `source`, not counting deferred ones
    pub fn handler_count(&self, source: Source) -> usize {
        self.inner
            .try_borrow()
            .map_or(0, |registry| registry.handler_count(source))
    }

    pub fn route_frame(&self, text: &str) -> RouteOutcome {
        let outcome = match self.inner.try_borrow_mut() {
            Ok(mut registry) => registry.route_frame(text),
            Err(_) => {
                warn!("Frame arrived during dispatch, dropping it");
                return RouteOutcome::default();
            }
        };
        self.apply_deferred();
        outcome
    }

    fn apply_deferred(&self) {
        let deferred = std::mem::take(&mut *self.deferred.borrow_mut());
        if deferred.is_empty() {
            return;
        }
        let mut registry = self.inner.borrow_mut();
        for (source, handler) in deferred {
            registry.push(source, handler);
        }
    }
}
