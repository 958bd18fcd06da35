//! End-to-end supervisor behaviour over the in-memory transport

use async_trait::async_trait;
use sriquant_core::Signal;
use sriquant_stream::transport::mock::{Dial, MockConnection, MockConnector, MockPeer};
use sriquant_stream::{
    CloseFrame, Message, NoSubscription, StreamConfig, StreamError, StreamHandle, Subscription,
    Supervisor, SupervisorState,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const BOUND: Duration = Duration::from_secs(2);

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn refused() -> StreamError {
    StreamError::NetworkError("connection refused".to_string())
}

fn parse_number(raw: &[u8]) -> Result<u64, String> {
    std::str::from_utf8(raw)
        .map_err(|e| e.to_string())?
        .parse::<u64>()
        .map_err(|e| e.to_string())
}

fn config(initial_ms: u64) -> StreamConfig {
    StreamConfig::new("ws://mock.invalid/ws").with_backoff(ms(initial_ms), ms(1_000))
}

/// Everything the handlers saw
#[derive(Clone, Default)]
struct Recorder {
    events: Rc<RefCell<Vec<u64>>>,
    errors: Rc<RefCell<Vec<StreamError>>>,
}

impl Recorder {
    fn start<S>(
        &self,
        config: StreamConfig,
        connector: MockConnector,
        subscription: S,
        cancel: Signal,
    ) -> StreamHandle
    where
        S: Subscription<MockConnection>,
    {
        let events = self.events.clone();
        let errors = self.errors.clone();
        Supervisor::new(config, connector, subscription, parse_number)
            .start(
                cancel,
                move |event, _raw| events.borrow_mut().push(event),
                move |err| errors.borrow_mut().push(err),
            )
            .unwrap()
    }

    fn errors(&self) -> Vec<StreamError> {
        self.errors.borrow().clone()
    }

    fn events(&self) -> Vec<u64> {
        self.events.borrow().clone()
    }

    async fn wait_for_errors(&self, count: usize) {
        let errors = self.errors.clone();
        wait_until(move || errors.borrow().len() >= count).await;
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    let polled = monoio::time::timeout(BOUND, async {
        while !condition() {
            monoio::time::sleep(ms(2)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within {BOUND:?}");
}

async fn next_peer(peers: &flume::Receiver<MockPeer>) -> MockPeer {
    monoio::time::timeout(BOUND, peers.recv_async())
        .await
        .expect("no connection within bound")
        .expect("connector dropped")
}

async fn assert_done(handle: &StreamHandle) {
    assert!(
        monoio::time::timeout(BOUND, handle.done()).await.is_ok(),
        "supervisor did not stop within {BOUND:?}"
    );
    assert!(handle.is_stopped());
    assert_eq!(handle.health().state, SupervisorState::Stopped);
}

fn reconnect_delay(err: &StreamError) -> Option<(u32, Duration)> {
    match err {
        StreamError::ReconnectPending { attempt, delay, .. } => Some((*attempt, *delay)),
        _ => None,
    }
}

/// Subscription that never completes
struct HangingSubscription;

#[async_trait(?Send)]
impl Subscription<MockConnection> for HangingSubscription {
    async fn subscribe(&self, _conn: &mut MockConnection) -> sriquant_stream::Result<()> {
        std::future::pending().await
    }
}

/// Subscription the venue always refuses
struct RejectedSubscription;

#[async_trait(?Send)]
impl Subscription<MockConnection> for RejectedSubscription {
    async fn subscribe(&self, _conn: &mut MockConnection) -> sriquant_stream::Result<()> {
        Err(StreamError::ProtocolError("invalid stream name".to_string()))
    }
}

#[monoio::test(timer_enabled = true)]
async fn test_backoff_doubles_then_resets_after_connect() {
    let recorder = Recorder::default();
    let connector =
        MockConnector::new([Dial::Fail(refused()), Dial::Fail(refused()), Dial::Accept, Dial::Accept]);
    let peers = connector.peers();
    let handle = recorder.start(config(20), connector, NoSubscription, Signal::new());

    let first = next_peer(&peers).await;
    let delays: Vec<_> = recorder.errors().iter().filter_map(reconnect_delay).collect();
    assert_eq!(delays, vec![(1, ms(20)), (2, ms(40))]);

    first.fail(StreamError::NetworkError("connection reset".to_string()));
    let _second = next_peer(&peers).await;

    let errors = recorder.errors();
    assert_eq!(errors.len(), 4);
    assert_eq!(errors[2], StreamError::NetworkError("connection reset".to_string()));
    assert_eq!(reconnect_delay(&errors[3]), Some((1, ms(20))));

    let tracked = handle.clone();
    wait_until(move || tracked.health().sessions_started == 2).await;
    assert_eq!(handle.health().reconnect_count, 3);

    handle.shutdown().await;
    assert_done(&handle).await;
}

#[monoio::test(timer_enabled = true)]
async fn test_stop_without_session() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Fail(refused())]);
    let handle = recorder.start(config(10_000), connector, NoSubscription, Signal::new());

    // Parked in a 10s backoff wait
    recorder.wait_for_errors(1).await;
    assert_eq!(handle.health().state, SupervisorState::Reconnecting);

    assert!(handle.stop());
    assert_done(&handle).await;
}

#[monoio::test(timer_enabled = true)]
async fn test_double_stop_is_safe() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept]);
    let peers = connector.peers();
    let handle = recorder.start(config(10), connector, NoSubscription, Signal::new());
    let peer = next_peer(&peers).await;

    assert!(handle.stop());
    assert!(!handle.stop());
    assert_done(&handle).await;
    assert!(!handle.stop());

    let closes = peer
        .sent()
        .into_iter()
        .filter(|message| matches!(message, Message::Close(_)))
        .count();
    assert_eq!(closes, 1);
    assert_eq!(peer.shutdowns(), 1);
    assert!(recorder.errors().is_empty());
}

#[monoio::test(timer_enabled = true)]
async fn test_cancel_mid_dial() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Hang]);
    let dials = connector.clone();
    let cancel = Signal::new();
    let handle = recorder.start(config(10), connector, NoSubscription, cancel.clone());

    wait_until(|| dials.dials() == 1).await;
    cancel.fire();

    assert_done(&handle).await;
    assert!(recorder.errors().is_empty());
}

#[monoio::test(timer_enabled = true)]
async fn test_cancel_mid_subscribe() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept]);
    let peers = connector.peers();
    let cancel = Signal::new();
    let handle = recorder.start(config(10), connector, HangingSubscription, cancel.clone());

    let peer = next_peer(&peers).await;
    assert_eq!(handle.health().sessions_started, 0);
    cancel.fire();

    assert_done(&handle).await;
    assert!(recorder.errors().is_empty());
    assert!(matches!(
        peer.sent().as_slice(),
        [Message::Close(Some(close))] if close.code == 1000
    ));
    assert_eq!(peer.shutdowns(), 1);
}

#[monoio::test(timer_enabled = true)]
async fn test_cancel_mid_read() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept]);
    let peers = connector.peers();
    let cancel = Signal::new();
    let handle = recorder.start(config(10), connector, NoSubscription, cancel.clone());

    let peer = next_peer(&peers).await;
    peer.send_text("7");
    let events = recorder.events.clone();
    wait_until(move || !events.borrow().is_empty()).await;

    cancel.fire();
    assert_done(&handle).await;

    assert_eq!(recorder.events(), vec![7]);
    assert!(recorder.errors().is_empty());
    assert!(matches!(
        peer.sent().as_slice(),
        [Message::Close(Some(close))] if close.code == 1000
    ));
}

#[monoio::test(timer_enabled = true)]
async fn test_normal_remote_close_reconnects_quietly() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept, Dial::Accept]);
    let peers = connector.peers();
    let handle = recorder.start(config(10), connector, NoSubscription, Signal::new());

    let first = next_peer(&peers).await;
    first.send(Message::Close(Some(CloseFrame::new(1000, "server restart"))));
    let _second = next_peer(&peers).await;

    assert!(recorder.errors().is_empty());
    assert_eq!(handle.health().reconnect_count, 1);
    // Close echoed with the same code
    assert!(matches!(
        first.sent().as_slice(),
        [Message::Close(Some(close))] if close.code == 1000
    ));

    handle.shutdown().await;
    assert_done(&handle).await;
}

#[monoio::test(timer_enabled = true)]
async fn test_read_error_reported_then_reconnects() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept, Dial::Accept]);
    let peers = connector.peers();
    let handle = recorder.start(config(10), connector, NoSubscription, Signal::new());

    let first = next_peer(&peers).await;
    first.fail(StreamError::NetworkError("connection reset".to_string()));
    let _second = next_peer(&peers).await;

    let errors = recorder.errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0], StreamError::NetworkError("connection reset".to_string()));
    assert!(matches!(
        &errors[1],
        StreamError::ReconnectPending { cause, .. } if cause.contains("connection reset")
    ));

    handle.shutdown().await;
    assert_done(&handle).await;
}

#[monoio::test(timer_enabled = true)]
async fn test_gives_up_after_max_attempts() {
    let recorder = Recorder::default();
    let connector =
        MockConnector::new([Dial::Fail(refused()), Dial::Fail(refused()), Dial::Fail(refused())]);
    let dials = connector.clone();
    let handle = recorder.start(
        config(5).with_max_attempts(3),
        connector,
        NoSubscription,
        Signal::new(),
    );

    assert_done(&handle).await;
    assert_eq!(dials.dials(), 3);

    let errors = recorder.errors();
    assert_eq!(errors.len(), 3);
    assert!(reconnect_delay(&errors[0]).is_some());
    assert!(reconnect_delay(&errors[1]).is_some());
    assert!(matches!(
        &errors[2],
        StreamError::MaxAttemptsExceeded { attempts: 3, last_error } if last_error.contains("refused")
    ));
    assert!(errors[2].is_fatal());
}

#[monoio::test(timer_enabled = true)]
async fn test_bad_frame_does_not_end_session() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept]);
    let peers = connector.peers();
    let handle = recorder.start(config(10), connector, NoSubscription, Signal::new());

    let peer = next_peer(&peers).await;
    peer.send_text("not a number");
    peer.send_text("42");
    let events = recorder.events.clone();
    wait_until(move || !events.borrow().is_empty()).await;

    assert_eq!(recorder.events(), vec![42]);
    let errors = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], StreamError::Decode(_)));
    assert_eq!(handle.health().sessions_started, 1);
    assert_eq!(handle.health().errors_reported, 1);

    handle.shutdown().await;
    assert_done(&handle).await;
}

#[monoio::test(timer_enabled = true)]
async fn test_silent_connection_is_replaced() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept, Dial::Accept]);
    let peers = connector.peers();
    let handle = recorder.start(
        config(10).with_idle_timeout(ms(50)),
        connector,
        NoSubscription,
        Signal::new(),
    );

    let first = next_peer(&peers).await;
    let _second = next_peer(&peers).await;

    let errors = recorder.errors();
    assert!(matches!(errors[0], StreamError::IdleTimeout { .. }));
    assert!(reconnect_delay(&errors[1]).is_some());
    // Dead connections are dropped without a close handshake
    assert!(first.sent().is_empty());
    assert_eq!(first.shutdowns(), 1);

    handle.shutdown().await;
    assert_done(&handle).await;
}

#[monoio::test(timer_enabled = true)]
async fn test_subscribe_rejection_keeps_backing_off() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept, Dial::Accept, Dial::Accept]);
    let peers = connector.peers();
    let handle = recorder.start(config(10), connector, RejectedSubscription, Signal::new());

    recorder.wait_for_errors(3).await;
    handle.shutdown().await;
    assert_done(&handle).await;

    let errors = recorder.errors();
    let delays: Vec<_> = errors.iter().filter_map(reconnect_delay).collect();
    assert_eq!(delays, vec![(1, ms(10)), (2, ms(20)), (3, ms(40))]);
    assert!(errors.iter().all(|err| matches!(
        err,
        StreamError::ReconnectPending { cause, .. } if cause.contains("Subscribe failed")
    )));
    assert_eq!(handle.health().sessions_started, 0);

    let rejected: Vec<_> = peers.try_iter().collect();
    assert_eq!(rejected.len(), 3);
    assert!(rejected.iter().all(|peer| peer.shutdowns() == 1));
}

#[monoio::test(timer_enabled = true)]
async fn test_stop_racing_read_error_announces_no_retry() {
    let recorder = Recorder::default();
    let connector = MockConnector::new([Dial::Accept, Dial::Accept]);
    let dials = connector.clone();
    let peers = connector.peers();
    let handle = recorder.start(config(10), connector, NoSubscription, Signal::new());

    let peer = next_peer(&peers).await;
    peer.fail(StreamError::NetworkError("connection reset".to_string()));
    handle.stop();

    assert_done(&handle).await;
    assert!(
        recorder.errors().iter().all(|err| reconnect_delay(err).is_none()),
        "retry announced after stop: {:?}",
        recorder.errors()
    );
    assert_eq!(dials.dials(), 1);
    assert_eq!(handle.health().reconnect_count, 0);
}
