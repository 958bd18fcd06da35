//! Monoio-native WebSocket client transport
//!
//! RFC 6455 client side on top of [`crate::tls`]:
//! - Masked outbound frames, extended payload lengths
//! - HTTP/1.1 upgrade with `Sec-WebSocket-Accept` validation
//! - Fragmented message reassembly and close payload parsing
//! - Independent read and write halves for the session's worker tasks
//!
//! Control frames are surfaced to the caller, never answered here: replying
//! to pings is the session's job so that every write goes through its single
//! writer.

use crate::config::StreamConfig;
use crate::errors::{Result, StreamError};
use crate::tls::{self, NetReader, NetStream, NetWriter};
use crate::transport::{
    CloseFrame, Connection, Connector, FrameReader, FrameWriter, Message, CLOSE_ABNORMAL,
};
use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use rustls::ClientConfig;
use sha1::{Digest, Sha1};
use sriquant_core::PerfTimer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest single frame or reassembled message accepted from the server
pub const MAX_MESSAGE_SIZE: usize = 64 << 20;

const MAX_CONTROL_PAYLOAD: usize = 125;
const MAX_HANDSHAKE_RESPONSE: usize = 16 * 1024;

/// WebSocket opcode constants
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// A single WebSocket frame with its payload unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Final, client-masked frame
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: Some(rand::thread_rng().r#gen()),
            payload,
        }
    }

    pub fn close(close: Option<&CloseFrame>) -> Self {
        let payload = match close {
            None => Vec::new(),
            Some(close) => {
                let mut reason = close.reason.as_str();
                while reason.len() > MAX_CONTROL_PAYLOAD - 2 {
                    let mut cut = reason.len() - 1;
                    while !reason.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    reason = &reason[..cut];
                }
                let mut payload = Vec::with_capacity(2 + reason.len());
                payload.extend_from_slice(&close.code.to_be_bytes());
                payload.extend_from_slice(reason.as_bytes());
                payload
            }
        };
        Self::new(OpCode::Close, payload)
    }

    pub fn from_message(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::new(OpCode::Text, text.into_bytes()),
            Message::Binary(data) => Self::new(OpCode::Binary, data),
            Message::Ping(data) => Self::new(OpCode::Ping, data),
            Message::Pong(data) => Self::new(OpCode::Pong, data),
            Message::Close(close) => Self::close(close.as_ref()),
        }
    }

    fn apply_mask(payload: &mut [u8], mask: &[u8; 4]) {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i & 3];
        }
    }

    /// Wire encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);

        let fin_bit = if self.fin { 0x80 } else { 0 };
        out.push(fin_bit | self.opcode as u8);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match &self.mask {
            Some(mask) => {
                out.extend_from_slice(mask);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                Self::apply_mask(&mut out[start..], mask);
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }

    /// Parse one server frame from the front of `data`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered, otherwise the
    /// frame and the number of bytes it occupied.
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }

        let first_byte = data[0];
        let second_byte = data[1];

        if first_byte & 0x70 != 0 {
            return Err(StreamError::ProtocolError("reserved bits set".to_string()));
        }
        let fin = first_byte & 0x80 != 0;
        let opcode = OpCode::from_u8(first_byte & 0x0f).ok_or_else(|| {
            StreamError::ProtocolError(format!("invalid opcode {:#x}", first_byte & 0x0f))
        })?;

        if second_byte & 0x80 != 0 {
            return Err(StreamError::ProtocolError(
                "server frames must not be masked".to_string(),
            ));
        }

        let mut offset = 2;
        let payload_len = match second_byte & 0x7f {
            126 => {
                let Some(bytes) = data.get(offset..offset + 2) else {
                    return Ok(None);
                };
                offset += 2;
                u16::from_be_bytes([bytes[0], bytes[1]]) as u64
            }
            127 => {
                let Some(bytes) = data.get(offset..offset + 8) else {
                    return Ok(None);
                };
                offset += 8;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                u64::from_be_bytes(raw)
            }
            len => len as u64,
        };

        if payload_len > MAX_MESSAGE_SIZE as u64 {
            return Err(StreamError::ProtocolError(format!(
                "frame of {payload_len} bytes exceeds limit"
            )));
        }
        let payload_len = payload_len as usize;

        if opcode.is_control() && (!fin || payload_len > MAX_CONTROL_PAYLOAD) {
            return Err(StreamError::ProtocolError(format!(
                "malformed {opcode:?} control frame"
            )));
        }

        let Some(payload) = data.get(offset..offset + payload_len) else {
            return Ok(None);
        };

        let frame = Frame {
            fin,
            opcode,
            mask: None,
            payload: payload.to_vec(),
        };
        Ok(Some((frame, offset + payload_len)))
    }
}

/// Decode a close frame payload
pub fn parse_close_payload(payload: &[u8]) -> Result<Option<CloseFrame>> {
    match payload {
        [] => Ok(None),
        [_] => Err(StreamError::ProtocolError(
            "close payload of one byte".to_string(),
        )),
        [hi, lo, reason @ ..] => {
            let reason = std::str::from_utf8(reason).map_err(|_| {
                StreamError::ProtocolError("close reason is not UTF-8".to_string())
            })?;
            Ok(Some(CloseFrame::new(u16::from_be_bytes([*hi, *lo]), reason)))
        }
    }
}

/// Joins data frames into messages and surfaces control frames
#[derive(Debug, Default)]
pub struct MessageAssembler {
    opcode: Option<OpCode>,
    buffer: Vec<u8>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame; returns a message once one is complete
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.payload))),
            OpCode::Close => Ok(Some(Message::Close(parse_close_payload(&frame.payload)?))),
            OpCode::Text | OpCode::Binary => {
                if self.opcode.is_some() {
                    return Err(StreamError::ProtocolError(
                        "new message started inside a fragmented one".to_string(),
                    ));
                }
                if frame.fin {
                    return Self::complete(frame.opcode, frame.payload).map(Some);
                }
                self.opcode = Some(frame.opcode);
                self.buffer = frame.payload;
                Ok(None)
            }
            OpCode::Continuation => {
                let Some(opcode) = self.opcode else {
                    return Err(StreamError::ProtocolError(
                        "continuation without a message".to_string(),
                    ));
                };
                if self.buffer.len() + frame.payload.len() > MAX_MESSAGE_SIZE {
                    return Err(StreamError::ProtocolError(
                        "fragmented message exceeds limit".to_string(),
                    ));
                }
                self.buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                self.opcode = None;
                Self::complete(opcode, std::mem::take(&mut self.buffer)).map(Some)
            }
        }
    }

    fn complete(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
        if opcode == OpCode::Text {
            String::from_utf8(payload)
                .map(Message::Text)
                .map_err(|e| StreamError::ProtocolError(format!("invalid UTF-8 in text message: {e}")))
        } else {
            Ok(Message::Binary(payload))
        }
    }
}

/// Random `Sec-WebSocket-Key`
pub fn generate_key() -> String {
    let key: [u8; 16] = rand::thread_rng().r#gen();
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// `Sec-WebSocket-Accept` the server must answer `key` with
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn handshake_request(url: &Url, key: &str) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| StreamError::InvalidUrl(format!("no host in {url}")))?;
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let path = if url.path().is_empty() { "/" } else { url.path() };
    let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();

    Ok(format!(
        "GET {path}{query} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         User-Agent: SriQuant.ai/1.0\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    ))
}

fn validate_handshake_response(head: &[u8], key: &str) -> Result<()> {
    let status = tls::parse_status_code(head)?;
    if status != 101 {
        return Err(StreamError::HandshakeFailed(format!(
            "expected 101 Switching Protocols, got {status}"
        )));
    }

    let head = String::from_utf8_lossy(head);
    let header = |name: &str| {
        head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    };

    if !header("upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket")) {
        return Err(StreamError::HandshakeFailed("missing Upgrade: websocket".to_string()));
    }
    if !header("connection").is_some_and(|v| {
        v.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    }) {
        return Err(StreamError::HandshakeFailed("missing Connection: Upgrade".to_string()));
    }
    if header("sec-websocket-accept").as_deref() != Some(accept_key(key).as_str()) {
        return Err(StreamError::HandshakeFailed("invalid Sec-WebSocket-Accept".to_string()));
    }
    Ok(())
}

/// Read half of a WebSocket connection
pub struct WsReader {
    net: NetReader,
    buffer: Vec<u8>,
    assembler: MessageAssembler,
}

#[async_trait(?Send)]
impl FrameReader for WsReader {
    async fn recv(&mut self) -> Result<Message> {
        loop {
            while let Some((frame, consumed)) = Frame::parse(&self.buffer)? {
                self.buffer.drain(..consumed);
                if let Some(message) = self.assembler.push(frame)? {
                    return Ok(message);
                }
            }

            if self.net.read_into(&mut self.buffer).await? == 0 {
                return Err(StreamError::ConnectionClosed {
                    code: CLOSE_ABNORMAL,
                    reason: "connection dropped without close frame".to_string(),
                });
            }
        }
    }
}

/// Write half of a WebSocket connection
pub struct WsWriter {
    net: NetWriter,
    close_sent: bool,
}

#[async_trait(?Send)]
impl FrameWriter for WsWriter {
    async fn send(&mut self, message: Message) -> Result<()> {
        let is_close = matches!(message, Message::Close(_));
        if self.close_sent {
            // One close frame per connection; data after it is a caller bug.
            return if is_close { Ok(()) } else { Err(StreamError::NotConnected) };
        }

        let frame = Frame::from_message(message);
        debug!("Sending WebSocket frame: {:?} ({} bytes)", frame.opcode, frame.payload.len());
        self.net.write_all(&frame.to_bytes()).await?;
        self.close_sent = is_close;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.net.shutdown().await
    }
}

/// An upgraded WebSocket connection
pub struct WsConnection {
    reader: WsReader,
    writer: WsWriter,
}

impl WsConnection {
    /// Perform the upgrade handshake over an established byte stream
    pub async fn handshake(mut stream: NetStream, url: &Url) -> Result<Self> {
        let timer = PerfTimer::start("websocket_handshake");

        let key = generate_key();
        stream.write_all(handshake_request(url, &key)?.as_bytes()).await?;

        let mut buffer = Vec::with_capacity(4096);
        let head_len = loop {
            if let Some(end) = tls::find_header_end(&buffer) {
                break end;
            }
            if buffer.len() > MAX_HANDSHAKE_RESPONSE {
                return Err(StreamError::HandshakeFailed(
                    "upgrade response headers too large".to_string(),
                ));
            }
            if stream.read_into(&mut buffer).await? == 0 {
                return Err(StreamError::HandshakeFailed(
                    "connection closed during upgrade".to_string(),
                ));
            }
        };

        validate_handshake_response(&buffer[..head_len], &key)?;
        // Frames the server sent right behind the 101 stay buffered.
        buffer.drain(..head_len);
        timer.log_elapsed();

        let (net_reader, net_writer) = stream.into_split();
        Ok(Self {
            reader: WsReader {
                net: net_reader,
                buffer,
                assembler: MessageAssembler::new(),
            },
            writer: WsWriter {
                net: net_writer,
                close_sent: false,
            },
        })
    }
}

#[async_trait(?Send)]
impl Connection for WsConnection {
    type Reader = WsReader;
    type Writer = WsWriter;

    async fn send(&mut self, message: Message) -> Result<()> {
        self.writer.send(message).await
    }

    async fn recv(&mut self) -> Result<Message> {
        self.reader.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn split(self) -> (WsReader, WsWriter) {
        (self.reader, self.writer)
    }
}

/// Dials `ws://` and `wss://` endpoints, optionally through a CONNECT proxy
#[derive(Clone)]
pub struct WsConnector {
    url: Url,
    proxy: Option<Url>,
    connect_timeout: Duration,
    tls_config: Arc<ClientConfig>,
}

impl WsConnector {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(StreamError::InvalidUrl(format!(
                    "unsupported scheme {other:?}, expected ws or wss"
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(StreamError::InvalidUrl(format!("no host in {url}")));
        }

        Ok(Self {
            url,
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            tls_config: tls::default_tls_config(),
        })
    }

    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        let mut connector = Self::new(&config.url)?.with_connect_timeout(config.connect_timeout);
        if let Some(proxy) = &config.proxy {
            connector = connector.with_proxy(proxy)?;
        }
        Ok(connector)
    }

    pub fn with_proxy(mut self, proxy: &str) -> Result<Self> {
        let proxy = Url::parse(proxy)?;
        if proxy.scheme() != "http" {
            return Err(StreamError::InvalidUrl(format!(
                "only http:// CONNECT proxies are supported, got {proxy}"
            )));
        }
        self.proxy = Some(proxy);
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls_config = config;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn dial(&self) -> Result<WsConnection> {
        let timer = PerfTimer::start("websocket_connect");
        let host = self
            .url
            .host_str()
            .ok_or_else(|| StreamError::InvalidUrl(format!("no host in {}", self.url)))?;
        let port = self.url.port_or_known_default().unwrap_or(443);

        let tcp = tls::connect_tcp(host, port, self.proxy.as_ref()).await?;
        debug!("TCP connection established to {}:{}", host, port);

        let stream = if self.url.scheme() == "wss" {
            let stream = NetStream::tls(tcp, Arc::clone(&self.tls_config), host).await?;
            debug!("TLS handshake completed with {}", host);
            stream
        } else {
            NetStream::plain(tcp)
        };

        let connection = WsConnection::handshake(stream, &self.url).await?;
        let elapsed = timer.log_elapsed();
        info!("🔗 WebSocket connected to {} ({}μs)", self.url, elapsed.as_micros());
        Ok(connection)
    }
}

#[async_trait(?Send)]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self) -> Result<WsConnection> {
        monoio::time::timeout(self.connect_timeout, self.dial())
            .await
            .map_err(|_| {
                StreamError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    self.url, self.connect_timeout
                ))
            })?
    }
}
