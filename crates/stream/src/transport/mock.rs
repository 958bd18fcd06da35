//! In-memory transport for driving sessions in tests
//!
//! A [`MockConnector`] follows a script of [`Dial`] outcomes. Every accepted
//! dial yields a [`MockPeer`] on [`MockConnector::peers`], which plays the
//! remote end: it injects frames or read errors and observes what the
//! session wrote.

use crate::errors::{Result, StreamError};
use crate::transport::{Connection, Connector, FrameReader, FrameWriter, Message};
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Outcome of one scripted dial
#[derive(Debug, Clone)]
pub enum Dial {
    Accept,
    Fail(StreamError),
    /// Never completes; for cancellation tests
    Hang,
}

enum Inbound {
    Frame(Message),
    Error(StreamError),
}

/// Scripted connector. Once the script is exhausted every dial hangs.
#[derive(Clone)]
pub struct MockConnector {
    script: Rc<RefCell<VecDeque<Dial>>>,
    dials: Rc<Cell<u32>>,
    peers_tx: flume::Sender<MockPeer>,
    peers_rx: flume::Receiver<MockPeer>,
}

impl MockConnector {
    pub fn new(script: impl IntoIterator<Item = Dial>) -> Self {
        let (peers_tx, peers_rx) = flume::unbounded();
        Self {
            script: Rc::new(RefCell::new(script.into_iter().collect())),
            dials: Rc::new(Cell::new(0)),
            peers_tx,
            peers_rx,
        }
    }

    pub fn push(&self, dial: Dial) {
        self.script.borrow_mut().push_back(dial);
    }

    /// Number of dials attempted so far
    pub fn dials(&self) -> u32 {
        self.dials.get()
    }

    /// Remote ends of accepted connections, in dial order
    pub fn peers(&self) -> flume::Receiver<MockPeer> {
        self.peers_rx.clone()
    }
}

#[async_trait(?Send)]
impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn connect(&self) -> Result<MockConnection> {
        self.dials.set(self.dials.get() + 1);
        let next = self.script.borrow_mut().pop_front().unwrap_or(Dial::Hang);

        match next {
            Dial::Fail(err) => Err(err),
            Dial::Hang => std::future::pending().await,
            Dial::Accept => {
                let (conn, peer) = pair();
                // The test may have dropped its receiver; the session still runs.
                let _ = self.peers_tx.send(peer);
                Ok(conn)
            }
        }
    }
}

fn pair() -> (MockConnection, MockPeer) {
    let (inbound_tx, inbound_rx) = flume::unbounded();
    let (outbound_tx, outbound_rx) = flume::unbounded();
    let shutdowns = Rc::new(Cell::new(0));

    let conn = MockConnection {
        reader: MockReader {
            inbound: inbound_rx,
        },
        writer: MockWriter {
            outbound: outbound_tx,
            shutdowns: shutdowns.clone(),
        },
    };
    let peer = MockPeer {
        inbound: inbound_tx,
        outbound: outbound_rx,
        shutdowns,
    };
    (conn, peer)
}

/// Client side of an in-memory connection
pub struct MockConnection {
    reader: MockReader,
    writer: MockWriter,
}

pub struct MockReader {
    inbound: flume::Receiver<Inbound>,
}

pub struct MockWriter {
    outbound: flume::Sender<Message>,
    shutdowns: Rc<Cell<u32>>,
}

#[async_trait(?Send)]
impl FrameReader for MockReader {
    async fn recv(&mut self) -> Result<Message> {
        match self.inbound.recv_async().await {
            Ok(Inbound::Frame(message)) => Ok(message),
            Ok(Inbound::Error(err)) => Err(err),
            Err(_) => Err(StreamError::NetworkError("mock peer hung up".to_string())),
        }
    }
}

#[async_trait(?Send)]
impl FrameWriter for MockWriter {
    async fn send(&mut self, message: Message) -> Result<()> {
        if self.shutdowns.get() > 0 {
            return Err(StreamError::NotConnected);
        }
        self.outbound
            .send(message)
            .map_err(|_| StreamError::NetworkError("mock peer hung up".to_string()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.shutdowns.set(self.shutdowns.get() + 1);
        Ok(())
    }
}

#[async_trait(?Send)]
impl Connection for MockConnection {
    type Reader = MockReader;
    type Writer = MockWriter;

    async fn send(&mut self, message: Message) -> Result<()> {
        self.writer.send(message).await
    }

    async fn recv(&mut self) -> Result<Message> {
        self.reader.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn split(self) -> (MockReader, MockWriter) {
        (self.reader, self.writer)
    }
}

/// Remote end of an in-memory connection
pub struct MockPeer {
    inbound: flume::Sender<Inbound>,
    outbound: flume::Receiver<Message>,
    shutdowns: Rc<Cell<u32>>,
}

impl MockPeer {
    /// Deliver a message to the client
    pub fn send(&self, message: Message) {
        let _ = self.inbound.send(Inbound::Frame(message));
    }

    pub fn send_text(&self, text: &str) {
        self.send(Message::text(text));
    }

    /// Make the client's next read fail with `err`
    pub fn fail(&self, err: StreamError) {
        let _ = self.inbound.send(Inbound::Error(err));
    }

    /// Next message the client wrote, waiting for it
    pub async fn next_sent(&self) -> Option<Message> {
        self.outbound.recv_async().await.ok()
    }

    /// Messages the client wrote so far
    pub fn sent(&self) -> Vec<Message> {
        self.outbound.try_iter().collect()
    }

    /// How many times the client shut the connection down
    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.get()
    }
}
