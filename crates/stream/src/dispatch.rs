//! Decoding and delivery of inbound frames
//!
//! The dispatcher sits inline on a session's read loop: it decodes one raw
//! payload and hands the typed event to the caller's handler before the next
//! frame is read. There is no buffering, so a slow handler applies
//! backpressure to the socket.

use crate::errors::StreamError;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Maps one raw frame payload to a typed event
///
/// Implemented for any `Fn(&[u8]) -> Result<E, Err>` closure, so simple
/// streams need no dedicated type.
pub trait Decoder: 'static {
    type Event: 'static;
    type Error: fmt::Display;

    fn decode(&self, raw: &[u8]) -> std::result::Result<Self::Event, Self::Error>;
}

impl<F, E, Err> Decoder for F
where
    F: Fn(&[u8]) -> std::result::Result<E, Err> + 'static,
    E: 'static,
    Err: fmt::Display,
{
    type Event = E;
    type Error = Err;

    fn decode(&self, raw: &[u8]) -> std::result::Result<E, Err> {
        self(raw)
    }
}

/// Decoder that forwards payloads untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    type Event = Vec<u8>;
    type Error = std::convert::Infallible;

    fn decode(&self, raw: &[u8]) -> std::result::Result<Vec<u8>, Self::Error> {
        Ok(raw.to_vec())
    }
}

/// Event and error callbacks supplied once at start and shared by every
/// session of a supervisor
pub struct Handlers<E> {
    on_event: Rc<dyn Fn(E, &[u8])>,
    on_error: Rc<dyn Fn(StreamError)>,
}

impl<E> Clone for Handlers<E> {
    fn clone(&self) -> Self {
        Self {
            on_event: Rc::clone(&self.on_event),
            on_error: Rc::clone(&self.on_error),
        }
    }
}

impl<E: 'static> Handlers<E> {
    pub fn new<H, R>(on_event: H, on_error: R) -> Self
    where
        H: Fn(E, &[u8]) + 'static,
        R: Fn(StreamError) + 'static,
    {
        Self {
            on_event: Rc::new(on_event),
            on_error: Rc::new(on_error),
        }
    }

    pub fn event(&self, event: E, raw: &[u8]) {
        (self.on_event)(event, raw)
    }

    pub fn error(&self, err: StreamError) {
        (self.on_error)(err)
    }

    pub(crate) fn error_sink(&self) -> Rc<dyn Fn(StreamError)> {
        Rc::clone(&self.on_error)
    }

    /// Same handlers with `hook` run before every error is delivered
    pub(crate) fn with_error_hook<F>(self, hook: F) -> Self
    where
        F: Fn(&StreamError) + 'static,
    {
        let on_error = self.on_error;
        Self {
            on_event: self.on_event,
            on_error: Rc::new(move |err: StreamError| {
                hook(&err);
                on_error(err)
            }),
        }
    }
}

/// Decodes raw payloads and routes the outcome to the handlers
pub struct EventDispatcher<D: Decoder> {
    decoder: Rc<D>,
    handlers: Handlers<D::Event>,
}

impl<D: Decoder> Clone for EventDispatcher<D> {
    fn clone(&self) -> Self {
        Self {
            decoder: Rc::clone(&self.decoder),
            handlers: self.handlers.clone(),
        }
    }
}

impl<D: Decoder> EventDispatcher<D> {
    pub fn new(decoder: Rc<D>, handlers: Handlers<D::Event>) -> Self {
        Self { decoder, handlers }
    }

    /// Decode and deliver one payload. A decode failure is reported exactly
    /// once and the handler is not invoked; returns whether an event was
    /// delivered.
    pub fn dispatch(&self, raw: &[u8]) -> bool {
        match self.decoder.decode(raw) {
            Ok(event) => {
                self.handlers.event(event, raw);
                true
            }
            Err(err) => {
                debug!("Dropping undecodable frame ({} bytes): {}", raw.len(), err);
                self.handlers.error(StreamError::Decode(err.to_string()));
                false
            }
        }
    }

    pub fn handlers(&self) -> &Handlers<D::Event> {
        &self.handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Seen = Rc<RefCell<Vec<String>>>;

    fn recording<E: fmt::Debug + 'static>() -> (Handlers<E>, Seen, Seen) {
        let events: Seen = Rc::default();
        let errors: Seen = Rc::default();
        let (ev, er) = (events.clone(), errors.clone());
        let handlers = Handlers::new(
            move |event: E, _raw: &[u8]| ev.borrow_mut().push(format!("{event:?}")),
            move |err: StreamError| er.borrow_mut().push(err.to_string()),
        );
        (handlers, events, errors)
    }

    fn parse_u32(raw: &[u8]) -> std::result::Result<u32, String> {
        std::str::from_utf8(raw)
            .map_err(|e| e.to_string())?
            .parse::<u32>()
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_dispatch_success() {
        let (handlers, events, errors) = recording::<u32>();
        let dispatcher = EventDispatcher::new(Rc::new(parse_u32), handlers);

        assert!(dispatcher.dispatch(b"42"));
        assert_eq!(*events.borrow(), vec!["42"]);
        assert!(errors.borrow().is_empty());
    }

    #[test]
    fn test_decode_failure_reports_once() {
        let (handlers, events, errors) = recording::<u32>();
        let dispatcher = EventDispatcher::new(Rc::new(parse_u32), handlers);

        assert!(!dispatcher.dispatch(b"not a number"));
        assert!(events.borrow().is_empty());
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].starts_with("Decode error"));

        assert!(dispatcher.dispatch(b"7"));
        assert_eq!(*events.borrow(), vec!["7"]);
    }

    #[test]
    fn test_raw_decoder_passes_bytes() {
        let (handlers, events, _) = recording::<Vec<u8>>();
        let dispatcher = EventDispatcher::new(Rc::new(RawDecoder), handlers);
        dispatcher.dispatch(&[1, 2, 3]);
        assert_eq!(*events.borrow(), vec!["[1, 2, 3]"]);
    }

    #[test]
    fn test_error_hook_runs_first() {
        let (handlers, _, errors) = recording::<u32>();
        let hooked: Rc<RefCell<u32>> = Rc::default();
        let counter = hooked.clone();
        let handlers = handlers.with_error_hook(move |_| *counter.borrow_mut() += 1);

        handlers.error(StreamError::NotConnected);
        assert_eq!(*hooked.borrow(), 1);
        assert_eq!(errors.borrow().len(), 1);
    }
}
