//! A single streaming session
//!
//! A [`Session`] owns one physical connection from dial to teardown. Once
//! the connection is open and subscribed it is split, and a handful of local
//! tasks cooperate on it:
//!
//! - reader: reads frames, answers keepalives, feeds the dispatcher, and
//!   owns teardown
//! - writer: the only task that writes; drains the outbound queue with a
//!   bounded write timeout and sends the courteous close frame
//! - idle watcher: ends the session when nothing was heard for too long
//! - shutdown watcher: turns a supervisor stop or a cancellation into a
//!   session end
//! - pinger (optional): queues our own keepalive pings
//!
//! Every trigger goes through [`SessionShared::end`]. The first reason
//! recorded wins, the kill signal fires once, and errors observed after that
//! point are suppressed.

use crate::config::KeepaliveConfig;
use crate::dispatch::{Decoder, EventDispatcher};
use crate::errors::{Result, StreamError};
use crate::health::HealthTracker;
use crate::keepalive::{AppKeepalive, Classified};
use crate::transport::{
    CloseFrame, Connection, Connector, FrameReader, FrameWriter, Message, Subscription,
    CLOSE_NO_STATUS,
};
use monoio::task::JoinHandle;
use sriquant_core::{PerfTimer, SessionId, Signal, Timestamp};
use std::cell::{Cell, OnceCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalReason {
    /// The remote sent a close frame
    RemoteClose(CloseFrame),
    /// Unrecoverable read or write failure
    Error(StreamError),
    /// Nothing was heard for longer than the idle timeout
    IdleTimeout(Duration),
    /// The supervisor asked the session to stop
    Stopped,
    /// The enclosing scope was cancelled
    Cancelled,
}

impl TerminalReason {
    /// Caller-initiated ends
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Stopped | Self::Cancelled)
    }

    /// Remote close with a normal or going-away code
    pub fn is_normal_close(&self) -> bool {
        matches!(self, Self::RemoteClose(close) if close.is_normal())
    }

    /// The error this end was reported as, if it was reported at all
    pub fn error(&self) -> Option<StreamError> {
        match self {
            Self::RemoteClose(close) if close.is_normal() => None,
            Self::RemoteClose(close) => Some(StreamError::ConnectionClosed {
                code: close.code,
                reason: close.reason.clone(),
            }),
            Self::Error(err) => Some(err.clone()),
            Self::IdleTimeout(idle) => Some(StreamError::IdleTimeout { idle: *idle }),
            Self::Stopped | Self::Cancelled => None,
        }
    }

    /// Close frame the writer sends before shutting the socket down
    fn close_reply(&self) -> Option<Message> {
        match self {
            Self::Stopped | Self::Cancelled => Some(Message::Close(Some(CloseFrame::normal()))),
            Self::RemoteClose(close) if close.code == CLOSE_NO_STATUS => Some(Message::Close(None)),
            Self::RemoteClose(close) => Some(Message::Close(Some(CloseFrame::new(close.code, "")))),
            Self::Error(_) | Self::IdleTimeout(_) => None,
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteClose(close) => write!(f, "remote close {close}"),
            Self::Error(err) => write!(f, "{err}"),
            Self::IdleTimeout(idle) => write!(f, "idle for {}ms", idle.as_millis()),
            Self::Stopped => f.write_str("stopped"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What a finished session hands back to its owner
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub started_at: Timestamp,
    pub reason: TerminalReason,
    /// Data frames delivered to the dispatcher
    pub frames: u64,
}

/// Everything a session needs besides the connection itself. Built once per
/// supervisor and shared by all of its sessions.
pub struct SessionContext<D: Decoder> {
    pub keepalive: KeepaliveConfig,
    pub dispatcher: EventDispatcher<D>,
    pub app_keepalive: Option<Rc<dyn AppKeepalive>>,
    pub health: HealthTracker,
    /// Supervisor stop request
    pub stop: Signal,
    /// Cancellation of the enclosing scope
    pub cancel: Signal,
}

impl<D: Decoder> Clone for SessionContext<D> {
    fn clone(&self) -> Self {
        Self {
            keepalive: self.keepalive.clone(),
            dispatcher: self.dispatcher.clone(),
            app_keepalive: self.app_keepalive.clone(),
            health: self.health.clone(),
            stop: self.stop.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<D: Decoder> SessionContext<D> {
    pub fn new(keepalive: KeepaliveConfig, dispatcher: EventDispatcher<D>) -> Self {
        Self {
            keepalive,
            dispatcher,
            app_keepalive: None,
            health: HealthTracker::new(),
            stop: Signal::new(),
            cancel: Signal::new(),
        }
    }

    pub fn with_app_keepalive(mut self, keepalive: Rc<dyn AppKeepalive>) -> Self {
        self.app_keepalive = Some(keepalive);
        self
    }

    pub fn with_signals(mut self, stop: Signal, cancel: Signal) -> Self {
        self.stop = stop;
        self.cancel = cancel;
        self
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = health;
        self
    }
}

struct SessionShared {
    id: SessionId,
    started_at: Timestamp,
    kill: Signal,
    reason: OnceCell<TerminalReason>,
    last_activity: Cell<Instant>,
    frames: Cell<u64>,
    health: HealthTracker,
    report: Rc<dyn Fn(StreamError)>,
}

impl SessionShared {
    /// Record `reason` and fire the kill signal. Returns whether this call
    /// decided the session's fate.
    fn end(&self, reason: TerminalReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.kill.fire();
        first
    }

    /// End the session and report `err`, unless it was already ending
    fn fail(&self, reason: TerminalReason, err: StreamError) {
        if self.end(reason) {
            (self.report)(err);
        } else {
            debug!("Session {} already ending, suppressed: {}", self.id, err);
        }
    }

    fn touch(&self) {
        self.last_activity.set(Instant::now());
        self.health.activity();
    }

    fn count_frame(&self) {
        self.frames.set(self.frames.get() + 1);
        self.health.frame_received();
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            started_at: self.started_at,
            // Every path that fires `kill` records a reason first.
            reason: self.reason.get().cloned().unwrap_or(TerminalReason::Stopped),
            frames: self.frames.get(),
        }
    }
}

/// A live connection and its worker tasks
pub struct Session {
    shared: Rc<SessionShared>,
    done: Signal,
}

impl Session {
    /// Dial, subscribe and start the session's workers.
    ///
    /// A dial failure returns the dial error. A subscribe failure closes the
    /// connection and returns [`StreamError::SubscribeFailed`]. In both cases
    /// nothing is spawned.
    ///
    /// Returns `Ok(None)` when the context's stop or cancel signal fires
    /// first. A connection that was already dialed gets a normal close frame
    /// and is shut down before returning.
    pub async fn open<C, S, D>(
        connector: &C,
        subscription: &S,
        ctx: &SessionContext<D>,
    ) -> Result<Option<Session>>
    where
        C: Connector,
        S: Subscription<C::Conn>,
        D: Decoder,
    {
        if ctx.stop.is_fired() || ctx.cancel.is_fired() {
            return Ok(None);
        }

        let timer = PerfTimer::start("session_open");
        let dialed = monoio::select! {
            _ = ctx.stop.wait() => None,
            _ = ctx.cancel.wait() => None,
            result = connector.connect() => Some(result),
        };
        let Some(dialed) = dialed else {
            return Ok(None);
        };
        let mut conn = dialed?;

        let subscribed = monoio::select! {
            _ = ctx.stop.wait() => None,
            _ = ctx.cancel.wait() => None,
            result = subscription.subscribe(&mut conn) => Some(result),
        };
        match subscribed {
            None => {
                info!("Shutdown requested while subscribing, closing connection");
                let close = Message::Close(Some(CloseFrame::normal()));
                match monoio::time::timeout(ctx.keepalive.write_timeout, conn.send(close)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => debug!("Close frame after interrupted subscribe: {}", err),
                    Err(_) => debug!("Close frame after interrupted subscribe timed out"),
                }
                if let Err(err) = conn.close().await {
                    debug!("Close after interrupted subscribe: {}", err);
                }
                return Ok(None);
            }
            Some(Err(err)) => {
                if let Err(close_err) = conn.close().await {
                    debug!("Close after failed subscribe: {}", close_err);
                }
                return Err(match err {
                    StreamError::SubscribeFailed(_) => err,
                    other => StreamError::SubscribeFailed(other.to_string()),
                });
            }
            Some(Ok(())) => {}
        }

        let id = SessionId::new();
        let (reader, writer) = conn.split();
        let shared = Rc::new(SessionShared {
            id: id.clone(),
            started_at: Timestamp::now(),
            kill: Signal::new(),
            reason: OnceCell::new(),
            last_activity: Cell::new(Instant::now()),
            frames: Cell::new(0),
            health: ctx.health.clone(),
            report: ctx.dispatcher.handlers().error_sink(),
        });
        let done = Signal::new();
        let (outbound_tx, outbound_rx) = flume::unbounded();
        let keepalive = &ctx.keepalive;

        let workers = Workers {
            writer: monoio::spawn(write_loop(
                writer,
                shared.clone(),
                outbound_rx,
                keepalive.write_timeout,
            )),
            idle: monoio::spawn(idle_watch(
                shared.clone(),
                keepalive.idle_timeout,
                keepalive.idle_check_interval(),
            )),
            watcher: monoio::spawn(shutdown_watch(
                shared.clone(),
                ctx.stop.clone(),
                ctx.cancel.clone(),
            )),
            pinger: keepalive.ping_interval.map(|every| {
                monoio::spawn(ping_loop(
                    shared.clone(),
                    every,
                    ctx.app_keepalive.clone(),
                    outbound_tx.clone(),
                ))
            }),
        };

        let inbound = Inbound {
            shared: shared.clone(),
            dispatcher: ctx.dispatcher.clone(),
            app_keepalive: ctx.app_keepalive.clone(),
            outbound: outbound_tx,
        };
        monoio::spawn(read_loop(reader, inbound, workers, done.clone()));

        info!("✅ Session {} established ({}μs)", id, timer.elapsed_micros());
        Ok(Some(Session { shared, done }))
    }

    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn started_at(&self) -> Timestamp {
        self.shared.started_at
    }

    /// Ask the session to close courteously. Returns `false` if it was
    /// already ending.
    pub fn close(&self) -> bool {
        self.shared.end(TerminalReason::Stopped)
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_fired()
    }

    /// Fires once every worker has exited and the socket is shut down
    pub fn done(&self) -> Signal {
        self.done.clone()
    }

    /// Wait for the session to end
    pub async fn finished(&self) -> SessionSummary {
        self.done.wait().await;
        self.shared.summary()
    }
}

struct Workers {
    writer: JoinHandle<()>,
    idle: JoinHandle<()>,
    watcher: JoinHandle<()>,
    pinger: Option<JoinHandle<()>>,
}

/// Read-side state: everything the reader needs per frame
struct Inbound<D: Decoder> {
    shared: Rc<SessionShared>,
    dispatcher: EventDispatcher<D>,
    app_keepalive: Option<Rc<dyn AppKeepalive>>,
    outbound: flume::Sender<Message>,
}

impl<D: Decoder> Inbound<D> {
    /// Handle one message; returns `false` once the session must end
    fn handle(&self, message: Message) -> bool {
        self.shared.touch();
        match message {
            Message::Ping(payload) => {
                self.queue(Message::Pong(payload));
                true
            }
            Message::Pong(_) => true,
            Message::Close(close) => {
                self.remote_close(close);
                false
            }
            Message::Text(text) => {
                self.data(text.as_bytes());
                true
            }
            Message::Binary(bytes) => {
                self.data(&bytes);
                true
            }
        }
    }

    fn data(&self, payload: &[u8]) {
        if let Some(app) = &self.app_keepalive {
            match app.classify(payload) {
                Classified::Ping(reply) => return self.queue(reply),
                Classified::Pong => return,
                Classified::Data => {}
            }
        }
        self.shared.count_frame();
        self.dispatcher.dispatch(payload);
    }

    fn remote_close(&self, close: Option<CloseFrame>) {
        let close = close.unwrap_or_else(|| CloseFrame::new(CLOSE_NO_STATUS, ""));
        if close.is_normal() {
            info!("Session {} closed by remote: {}", self.shared.id, close);
            self.shared.end(TerminalReason::RemoteClose(close));
        } else {
            let err = StreamError::ConnectionClosed {
                code: close.code,
                reason: close.reason.clone(),
            };
            self.shared.fail(TerminalReason::RemoteClose(close), err);
        }
    }

    fn queue(&self, message: Message) {
        // The writer only hangs up once the session is ending.
        if self.outbound.send(message).is_err() {
            debug!("Session {} writer gone, reply dropped", self.shared.id);
        }
    }
}

async fn read_loop<R, D>(mut reader: R, inbound: Inbound<D>, workers: Workers, done: Signal)
where
    R: FrameReader,
    D: Decoder,
{
    let shared = inbound.shared.clone();

    loop {
        let next = monoio::select! {
            _ = shared.kill.wait() => None,
            result = reader.recv() => Some(result),
        };
        let Some(result) = next else {
            break;
        };

        match result {
            Ok(message) => {
                if !inbound.handle(message) {
                    break;
                }
            }
            Err(err) => {
                shared.fail(TerminalReason::Error(err.clone()), err);
                break;
            }
        }
    }

    shared.kill.fire();
    drop(inbound);
    drop(reader);

    workers.writer.await;
    workers.idle.await;
    workers.watcher.await;
    if let Some(pinger) = workers.pinger {
        pinger.await;
    }

    let summary = shared.summary();
    sriquant_core::log_session_end!(summary.id, summary.reason, summary.frames);
    done.fire();
}

async fn write_loop<W: FrameWriter>(
    mut writer: W,
    shared: Rc<SessionShared>,
    outbound: flume::Receiver<Message>,
    write_timeout: Duration,
) {
    loop {
        let next = monoio::select! {
            _ = shared.kill.wait() => None,
            message = outbound.recv_async() => message.ok(),
        };
        let Some(message) = next else {
            break;
        };

        match monoio::time::timeout(write_timeout, writer.send(message)).await {
            Ok(Ok(())) => shared.touch(),
            Ok(Err(err)) => {
                shared.fail(TerminalReason::Error(err.clone()), err);
                break;
            }
            Err(_) => {
                let err = StreamError::Timeout(format!(
                    "write exceeded {}ms",
                    write_timeout.as_millis()
                ));
                shared.fail(TerminalReason::Error(err.clone()), err);
                break;
            }
        }
    }

    let reply = shared.reason.get().and_then(TerminalReason::close_reply);
    if let Some(close) = reply {
        match monoio::time::timeout(write_timeout, writer.send(close)).await {
            Ok(Ok(())) => debug!("Session {} sent close frame", shared.id),
            Ok(Err(err)) => debug!("Session {} close frame not sent: {}", shared.id, err),
            Err(_) => debug!("Session {} close frame timed out", shared.id),
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!("Session {} shutdown: {}", shared.id, err);
    }
}

async fn idle_watch(shared: Rc<SessionShared>, idle_timeout: Duration, check_every: Duration) {
    let mut ticker = monoio::time::interval(check_every);
    ticker.tick().await;

    loop {
        let ticked = monoio::select! {
            _ = shared.kill.wait() => false,
            _ = ticker.tick() => true,
        };
        if !ticked {
            break;
        }

        let idle = shared.last_activity.get().elapsed();
        if idle > idle_timeout {
            warn!(
                "⚠️ Session {} silent for {}ms, closing",
                shared.id,
                idle.as_millis()
            );
            shared.fail(
                TerminalReason::IdleTimeout(idle),
                StreamError::IdleTimeout { idle },
            );
            break;
        }
    }
}

async fn shutdown_watch(shared: Rc<SessionShared>, stop: Signal, cancel: Signal) {
    let reason = monoio::select! {
        _ = shared.kill.wait() => None,
        _ = stop.wait() => Some(TerminalReason::Stopped),
        _ = cancel.wait() => Some(TerminalReason::Cancelled),
    };

    if let Some(reason) = reason {
        debug!("Session {} shutting down: {}", shared.id, reason);
        shared.end(reason);
    }
}

async fn ping_loop(
    shared: Rc<SessionShared>,
    every: Duration,
    app_keepalive: Option<Rc<dyn AppKeepalive>>,
    outbound: flume::Sender<Message>,
) {
    let mut ticker = monoio::time::interval(every);
    ticker.tick().await;

    loop {
        let ticked = monoio::select! {
            _ = shared.kill.wait() => false,
            _ = ticker.tick() => true,
        };
        if !ticked {
            break;
        }

        let ping = match &app_keepalive {
            Some(app) => app.ping(),
            None => Message::Ping(Vec::new()),
        };
        if outbound.send(ping).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Handlers;
    use crate::keepalive::JsonKeepalive;
    use crate::transport::mock::{Dial, MockConnector, MockPeer};
    use crate::transport::{NoSubscription, SendFrames};
    use std::cell::RefCell;

    type NumberDecoder = fn(&[u8]) -> std::result::Result<u64, String>;

    fn decode_number(raw: &[u8]) -> std::result::Result<u64, String> {
        std::str::from_utf8(raw)
            .map_err(|e| e.to_string())?
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| e.to_string())
    }

    struct Harness {
        connector: MockConnector,
        peers: flume::Receiver<MockPeer>,
        events: Rc<RefCell<Vec<u64>>>,
        errors: Rc<RefCell<Vec<StreamError>>>,
        ctx: SessionContext<NumberDecoder>,
    }

    impl Harness {
        fn new(keepalive: KeepaliveConfig) -> Self {
            let connector = MockConnector::new([Dial::Accept]);
            let events: Rc<RefCell<Vec<u64>>> = Rc::default();
            let errors: Rc<RefCell<Vec<StreamError>>> = Rc::default();
            let (ev, er) = (events.clone(), errors.clone());
            let handlers = Handlers::new(
                move |n: u64, _raw: &[u8]| ev.borrow_mut().push(n),
                move |err: StreamError| er.borrow_mut().push(err),
            );
            let dispatcher = EventDispatcher::new(Rc::new(decode_number as NumberDecoder), handlers);

            Self {
                peers: connector.peers(),
                connector,
                events,
                errors,
                ctx: SessionContext::new(keepalive, dispatcher),
            }
        }

        async fn open(&self) -> (Session, MockPeer) {
            let session = Session::open(&self.connector, &NoSubscription, &self.ctx)
                .await
                .unwrap()
                .expect("no shutdown requested");
            let peer = self.peers.try_recv().unwrap();
            (session, peer)
        }
    }

    fn keepalive(idle_ms: u64) -> KeepaliveConfig {
        KeepaliveConfig {
            idle_timeout: Duration::from_millis(idle_ms),
            ping_interval: None,
            write_timeout: Duration::from_millis(200),
        }
    }

    async fn finish(session: &Session) -> SessionSummary {
        monoio::time::timeout(Duration::from_secs(2), session.finished())
            .await
            .expect("session did not finish")
    }

    async fn next_sent(peer: &MockPeer) -> Message {
        monoio::time::timeout(Duration::from_secs(2), peer.next_sent())
            .await
            .expect("nothing written")
            .expect("writer gone")
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_data_frames_are_dispatched_in_order() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;

        peer.send_text("1");
        peer.send(Message::Binary(b"2".to_vec()));
        peer.send_text("3");
        peer.send(Message::Close(Some(CloseFrame::normal())));

        let summary = finish(&session).await;
        assert_eq!(*harness.events.borrow(), vec![1, 2, 3]);
        assert_eq!(summary.frames, 3);
        assert!(summary.reason.is_normal_close());
        assert!(harness.errors.borrow().is_empty());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_ping_is_answered_not_dispatched() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;

        peer.send(Message::Ping(b"hb".to_vec()));
        assert_eq!(next_sent(&peer).await, Message::Pong(b"hb".to_vec()));
        assert!(harness.events.borrow().is_empty());

        session.close();
        finish(&session).await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_decode_failure_reports_once_and_continues() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;

        peer.send_text("not a number");
        peer.send_text("9");
        peer.send(Message::Close(None));

        let summary = finish(&session).await;
        assert_eq!(*harness.events.borrow(), vec![9]);

        let errors = harness.errors.borrow();
        assert!(matches!(errors[0], StreamError::Decode(_)));
        // A close frame without a status code is abnormal.
        assert!(matches!(
            errors[1],
            StreamError::ConnectionClosed { code: CLOSE_NO_STATUS, .. }
        ));
        assert_eq!(errors.len(), 2);
        assert_eq!(summary.reason.error(), Some(errors[1].clone()));
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_app_keepalive_is_answered_not_forwarded() {
        let mut harness = Harness::new(keepalive(5_000));
        harness.ctx = harness.ctx.clone().with_app_keepalive(Rc::new(JsonKeepalive::default()));
        let (session, peer) = harness.open().await;

        peer.send_text(r#"{"ping":1700000000000}"#);
        assert_eq!(next_sent(&peer).await, Message::text(r#"{"pong":1700000000000}"#));
        peer.send_text(r#"{"pong":5}"#);
        peer.send_text("11");
        peer.send(Message::Close(Some(CloseFrame::new(1001, "going away"))));

        let summary = finish(&session).await;
        assert_eq!(*harness.events.borrow(), vec![11]);
        assert_eq!(summary.frames, 1);
        assert!(harness.errors.borrow().is_empty());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_idle_timeout_ends_silent_session() {
        let harness = Harness::new(keepalive(60));
        let (session, peer) = harness.open().await;

        let summary = finish(&session).await;
        assert!(matches!(summary.reason, TerminalReason::IdleTimeout(idle) if idle > Duration::from_millis(60)));

        let errors = harness.errors.borrow();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], StreamError::IdleTimeout { .. }));
        // Dead connection: no close frame, just the socket.
        assert!(peer.sent().is_empty());
        assert_eq!(peer.shutdowns(), 1);
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_inbound_activity_defers_idle_timeout() {
        let harness = Harness::new(keepalive(80));
        let (session, peer) = harness.open().await;

        for _ in 0..6 {
            monoio::time::sleep(Duration::from_millis(30)).await;
            peer.send(Message::Pong(Vec::new()));
        }
        assert!(!session.is_finished());

        session.close();
        let summary = finish(&session).await;
        assert_eq!(summary.reason, TerminalReason::Stopped);
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_stop_sends_courteous_close_once() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;

        assert!(harness.ctx.stop.fire());
        let summary = finish(&session).await;

        assert_eq!(summary.reason, TerminalReason::Stopped);
        assert_eq!(peer.sent(), vec![Message::Close(Some(CloseFrame::normal()))]);
        assert_eq!(peer.shutdowns(), 1);
        assert!(!session.close());
        assert!(harness.errors.borrow().is_empty());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_cancel_mid_read() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;
        peer.send_text("1");
        monoio::time::sleep(Duration::from_millis(10)).await;

        harness.ctx.cancel.fire();
        let summary = finish(&session).await;
        assert_eq!(summary.reason, TerminalReason::Cancelled);
        assert_eq!(peer.sent(), vec![Message::Close(Some(CloseFrame::normal()))]);
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_concurrent_triggers_close_once() {
        let harness = Harness::new(keepalive(20));
        let (session, peer) = harness.open().await;

        monoio::time::sleep(Duration::from_millis(25)).await;
        session.close();
        harness.ctx.cancel.fire();
        peer.fail(StreamError::NetworkError("reset".into()));

        finish(&session).await;
        assert_eq!(peer.shutdowns(), 1);
        assert!(harness.errors.borrow().len() <= 1);
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_read_error_is_reported() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;

        let err = StreamError::NetworkError("connection reset by peer".into());
        peer.fail(err.clone());

        let summary = finish(&session).await;
        assert_eq!(summary.reason, TerminalReason::Error(err.clone()));
        assert_eq!(*harness.errors.borrow(), vec![err]);
        assert!(peer.sent().is_empty());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_read_error_after_stop_is_suppressed() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;

        session.close();
        peer.fail(StreamError::NetworkError("reset".into()));
        drop(peer);

        let summary = finish(&session).await;
        assert_eq!(summary.reason, TerminalReason::Stopped);
        assert!(harness.errors.borrow().is_empty());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_remote_close_is_echoed() {
        let harness = Harness::new(keepalive(5_000));
        let (session, peer) = harness.open().await;

        peer.send(Message::Close(Some(CloseFrame::new(1011, "internal error"))));
        let summary = finish(&session).await;

        assert_eq!(peer.sent(), vec![Message::Close(Some(CloseFrame::new(1011, "")))]);
        assert_eq!(
            *harness.errors.borrow(),
            vec![StreamError::ConnectionClosed {
                code: 1011,
                reason: "internal error".into()
            }]
        );
        assert!(!summary.reason.is_normal_close());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_pinger_sends_protocol_pings() {
        let mut config = keepalive(5_000);
        config.ping_interval = Some(Duration::from_millis(20));
        let harness = Harness::new(config);
        let (session, peer) = harness.open().await;

        assert_eq!(next_sent(&peer).await, Message::Ping(Vec::new()));
        assert_eq!(next_sent(&peer).await, Message::Ping(Vec::new()));

        session.close();
        finish(&session).await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_dial_failure_spawns_nothing() {
        let harness = Harness::new(keepalive(5_000));
        harness.connector.push(Dial::Fail(StreamError::NetworkError("refused".into())));
        // Consume the scripted accept first.
        let (session, _peer) = harness.open().await;
        session.close();
        finish(&session).await;

        let result = Session::open(&harness.connector, &NoSubscription, &harness.ctx).await;
        assert!(matches!(result, Err(StreamError::NetworkError(_))));
        assert!(harness.peers.try_recv().is_err());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_subscription_runs_before_reads() {
        let harness = Harness::new(keepalive(5_000));
        let connector = MockConnector::new([Dial::Accept]);
        let peers = connector.peers();
        let subscription = SendFrames(vec![Message::text("subscribe")]);

        let session = Session::open(&connector, &subscription, &harness.ctx)
            .await
            .unwrap()
            .expect("no shutdown requested");
        let peer = peers.try_recv().unwrap();
        assert_eq!(peer.sent(), vec![Message::text("subscribe")]);

        session.close();
        finish(&session).await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_subscribe_failure_closes_connection() {
        struct Rejecting;

        #[async_trait::async_trait(?Send)]
        impl<C: Connection> Subscription<C> for Rejecting {
            async fn subscribe(&self, _conn: &mut C) -> Result<()> {
                Err(StreamError::ProtocolError("auth rejected".into()))
            }
        }

        let harness = Harness::new(keepalive(5_000));
        let result = Session::open(&harness.connector, &Rejecting, &harness.ctx).await;

        assert!(matches!(
            result,
            Err(StreamError::SubscribeFailed(msg)) if msg.contains("auth rejected")
        ));
        let peer = harness.peers.try_recv().unwrap();
        assert_eq!(peer.shutdowns(), 1);
        assert!(harness.errors.borrow().is_empty());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_cancel_during_subscribe_closes_politely() {
        struct Hanging;

        #[async_trait::async_trait(?Send)]
        impl<C: Connection> Subscription<C> for Hanging {
            async fn subscribe(&self, _conn: &mut C) -> Result<()> {
                std::future::pending().await
            }
        }

        let harness = Harness::new(keepalive(5_000));
        let cancel = Signal::new();
        let ctx = harness.ctx.clone().with_signals(Signal::new(), cancel.clone());

        let trigger = cancel.clone();
        monoio::spawn(async move {
            monoio::time::sleep(Duration::from_millis(20)).await;
            trigger.fire();
        });
        let result = monoio::time::timeout(
            Duration::from_secs(2),
            Session::open(&harness.connector, &Hanging, &ctx),
        )
        .await
        .expect("open did not return after cancel");

        assert!(matches!(result, Ok(None)));
        let peer = harness.peers.try_recv().unwrap();
        assert_eq!(peer.sent(), vec![Message::Close(Some(CloseFrame::normal()))]);
        assert_eq!(peer.shutdowns(), 1);
        assert!(harness.errors.borrow().is_empty());
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_open_after_stop_does_not_dial() {
        let harness = Harness::new(keepalive(5_000));
        let stop = Signal::new();
        stop.fire();
        let ctx = harness.ctx.clone().with_signals(stop, Signal::new());

        let result = Session::open(&harness.connector, &NoSubscription, &ctx).await;
        assert!(matches!(result, Ok(None)));
        assert_eq!(harness.connector.dials(), 0);
    }
}
