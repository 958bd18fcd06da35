//! Transport contract between the supervisor and a concrete connection
//!
//! A [`Connector`] dials; the resulting [`Connection`] is handed to the
//! [`Subscription`] while it is still whole, then split into a
//! [`FrameReader`] (driven by the session's read loop) and a
//! [`FrameWriter`] (driven by the session's single writer task).
//!
//! All traits are `?Send`: sessions run as local tasks on one monoio
//! thread.

use crate::errors::Result;
use async_trait::async_trait;
use std::fmt;

/// Close status codes that end a session without being reported
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Reported when a close frame carries no status code
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Reported when the connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "normal closure")
    }

    /// Normal closure or going away
    pub fn is_normal(&self) -> bool {
        matches!(self.code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// One logical message on a streaming connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Payload of a data message
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text) => Some(text.as_bytes()),
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close(_))
    }
}

/// Read half of a connection
#[async_trait(?Send)]
pub trait FrameReader: 'static {
    /// Next complete message. Control frames are returned, never answered.
    async fn recv(&mut self) -> Result<Message>;
}

/// Write half of a connection
#[async_trait(?Send)]
pub trait FrameWriter: 'static {
    async fn send(&mut self, message: Message) -> Result<()>;

    /// Tear down the underlying socket. Must tolerate repeated calls.
    async fn shutdown(&mut self) -> Result<()>;
}

/// A live, not yet split connection
#[async_trait(?Send)]
pub trait Connection: 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    async fn send(&mut self, message: Message) -> Result<()>;

    async fn recv(&mut self) -> Result<Message>;

    /// Drop the connection without further traffic
    async fn close(&mut self) -> Result<()>;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Opens connections; invoked once per connection attempt
#[async_trait(?Send)]
pub trait Connector: 'static {
    type Conn: Connection;

    async fn connect(&self) -> Result<Self::Conn>;
}

/// Work done on a fresh connection before any inbound frame is dispatched:
/// authentication, subscription requests. Re-run on every reconnect.
#[async_trait(?Send)]
pub trait Subscription<C: Connection>: 'static {
    async fn subscribe(&self, conn: &mut C) -> Result<()>;
}

/// Subscription for endpoints that stream without a request
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSubscription;

#[async_trait(?Send)]
impl<C: Connection> Subscription<C> for NoSubscription {
    async fn subscribe(&self, _conn: &mut C) -> Result<()> {
        Ok(())
    }
}

/// Subscription that sends a fixed list of frames in order
#[derive(Debug, Clone, Default)]
pub struct SendFrames(pub Vec<Message>);

#[async_trait(?Send)]
impl<C: Connection> Subscription<C> for SendFrames {
    async fn subscribe(&self, conn: &mut C) -> Result<()> {
        for message in &self.0 {
            conn.send(message.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
