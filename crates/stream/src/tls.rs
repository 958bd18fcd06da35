//! Byte streams underneath the WebSocket codec
//!
//! - Plain TCP for `ws://`, rustls over TCP for `wss://`
//! - Optional HTTP CONNECT proxy tunnel
//! - Split into independently owned read and write halves
//!
//! The TCP socket is split before the TLS handshake. Both TLS halves share
//! the rustls state through `Rc<RefCell<..>>`; a borrow is only ever held
//! between awaits, never across one, so the reader and writer tasks can
//! interleave freely on the monoio thread.

use crate::errors::{Result, StreamError};
use monoio::io::{
    AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, OwnedReadHalf, OwnedWriteHalf, Splitable,
};
use monoio::net::TcpStream;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use std::cell::RefCell;
use std::io::{ErrorKind, Read, Write};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const READ_CHUNK: usize = 8192;
const MAX_PROXY_RESPONSE: usize = 16 * 1024;

/// Client TLS configuration trusting the webpki root set
pub fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

fn net_err(context: &str, err: impl std::fmt::Display) -> StreamError {
    StreamError::NetworkError(format!("{context}: {err}"))
}

/// Open a TCP connection to `host:port`, tunnelling through `proxy` if set
pub async fn connect_tcp(host: &str, port: u16, proxy: Option<&Url>) -> Result<TcpStream> {
    let Some(proxy) = proxy else {
        let tcp = TcpStream::connect(format!("{host}:{port}"))
            .await
            .map_err(|e| net_err("TCP connect failed", e))?;
        tcp.set_nodelay(true)?;
        return Ok(tcp);
    };

    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| StreamError::InvalidUrl(format!("proxy URL has no host: {proxy}")))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(8080);

    let mut tcp = TcpStream::connect(format!("{proxy_host}:{proxy_port}"))
        .await
        .map_err(|e| net_err("proxy connect failed", e))?;
    tcp.set_nodelay(true)?;

    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Proxy-Connection: Keep-Alive\r\n\
         \r\n"
    );
    let (result, _) = tcp.write_all(request.into_bytes()).await;
    result.map_err(|e| net_err("proxy write failed", e))?;

    let mut response = Vec::with_capacity(512);
    let mut chunk = vec![0u8; 512];
    while find_header_end(&response).is_none() {
        if response.len() > MAX_PROXY_RESPONSE {
            return Err(StreamError::HandshakeFailed(
                "proxy response headers too large".to_string(),
            ));
        }
        let (result, buf) = tcp.read(chunk).await;
        let n = result.map_err(|e| net_err("proxy read failed", e))?;
        if n == 0 {
            return Err(StreamError::HandshakeFailed(
                "proxy closed connection during CONNECT".to_string(),
            ));
        }
        response.extend_from_slice(&buf[..n]);
        chunk = buf;
    }

    let status = parse_status_code(&response)?;
    if status != 200 {
        return Err(StreamError::HandshakeFailed(format!(
            "proxy CONNECT to {host}:{port} returned {status}"
        )));
    }

    debug!("Tunnel to {}:{} established via {}", host, port, proxy_host);
    Ok(tcp)
}

/// Offset just past the `\r\n\r\n` that ends an HTTP header block
pub(crate) fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Status code from an HTTP/1.x status line
pub(crate) fn parse_status_code(response: &[u8]) -> Result<u16> {
    let line_end = response
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(response.len());
    let status_line = String::from_utf8_lossy(&response[..line_end]);

    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| StreamError::HandshakeFailed(format!("invalid status line: {status_line}")))
}

/// A connected byte stream, plain or TLS
pub struct NetStream {
    reader: NetReader,
    writer: NetWriter,
}

impl NetStream {
    pub fn plain(tcp: TcpStream) -> Self {
        let (read, write) = tcp.into_split();
        Self {
            reader: NetReader::Plain {
                tcp: read,
                buf: vec![0u8; READ_CHUNK],
            },
            writer: NetWriter::Plain { tcp: write, shut: false },
        }
    }

    /// Wrap `tcp` in TLS for `host` and complete the handshake
    pub async fn tls(tcp: TcpStream, config: Arc<ClientConfig>, host: &str) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| net_err("invalid server name", e))?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| net_err("TLS setup failed", e))?;
        let conn = Rc::new(RefCell::new(conn));

        let (read, write) = tcp.into_split();
        let mut reader = TlsReadHalf {
            tcp: read,
            conn: Rc::clone(&conn),
            buf: vec![0u8; READ_CHUNK],
        };
        let mut writer = TlsWriteHalf {
            tcp: write,
            conn,
            buf: Vec::with_capacity(READ_CHUNK),
            shut: false,
        };

        complete_handshake(&mut reader, &mut writer).await?;

        Ok(Self {
            reader: NetReader::Tls(reader),
            writer: NetWriter::Tls(writer),
        })
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await
    }

    /// Append at least one byte to `dst`; 0 means end of stream
    pub async fn read_into(&mut self, dst: &mut Vec<u8>) -> Result<usize> {
        self.reader.read_into(dst).await
    }

    pub fn into_split(self) -> (NetReader, NetWriter) {
        (self.reader, self.writer)
    }
}

async fn complete_handshake(reader: &mut TlsReadHalf, writer: &mut TlsWriteHalf) -> Result<()> {
    loop {
        writer.flush_tls().await?;

        let (handshaking, wants_read, wants_write) = {
            let conn = writer.conn.borrow();
            (conn.is_handshaking(), conn.wants_read(), conn.wants_write())
        };
        if !handshaking {
            return Ok(());
        }

        if wants_read {
            if reader.fill().await? == 0 {
                return Err(StreamError::HandshakeFailed(
                    "connection closed during TLS handshake".to_string(),
                ));
            }
        } else if !wants_write {
            return Err(StreamError::HandshakeFailed("TLS handshake stalled".to_string()));
        }
    }
}

/// Read half of a [`NetStream`]
pub enum NetReader {
    Plain {
        tcp: OwnedReadHalf<TcpStream>,
        buf: Vec<u8>,
    },
    Tls(TlsReadHalf),
}

impl NetReader {
    /// Append at least one byte to `dst`; 0 means end of stream
    pub async fn read_into(&mut self, dst: &mut Vec<u8>) -> Result<usize> {
        match self {
            Self::Plain { tcp, buf } => {
                let (result, chunk) = tcp.read(std::mem::take(buf)).await;
                *buf = chunk;
                let n = result.map_err(|e| net_err("TCP read failed", e))?;
                dst.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Self::Tls(half) => half.read_into(dst).await,
        }
    }
}

/// Write half of a [`NetStream`]
pub enum NetWriter {
    Plain {
        tcp: OwnedWriteHalf<TcpStream>,
        shut: bool,
    },
    Tls(TlsWriteHalf),
}

impl NetWriter {
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain { tcp, shut } => {
                if *shut {
                    return Err(StreamError::NotConnected);
                }
                let (result, _) = tcp.write_all(data.to_vec()).await;
                result.map_err(|e| net_err("TCP write failed", e))?;
                Ok(())
            }
            Self::Tls(half) => half.write_all(data).await,
        }
    }

    /// Shut the socket down. Later calls are no-ops.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Plain { tcp, shut } => {
                if std::mem::replace(shut, true) {
                    return Ok(());
                }
                tcp.shutdown().await.map_err(|e| net_err("TCP shutdown failed", e))
            }
            Self::Tls(half) => half.shutdown().await,
        }
    }
}

/// Read half of a TLS session
pub struct TlsReadHalf {
    tcp: OwnedReadHalf<TcpStream>,
    conn: Rc<RefCell<ClientConnection>>,
    buf: Vec<u8>,
}

impl TlsReadHalf {
    pub async fn read_into(&mut self, dst: &mut Vec<u8>) -> Result<usize> {
        loop {
            let plaintext = drain_plaintext(&mut self.conn.borrow_mut(), dst)?;
            if let Some(n) = plaintext {
                return Ok(n);
            }
            if self.fill().await? == 0 {
                return Ok(0);
            }
        }
    }

    /// Read one chunk of ciphertext from the socket into rustls
    async fn fill(&mut self) -> Result<usize> {
        let (result, chunk) = self.tcp.read(std::mem::take(&mut self.buf)).await;
        self.buf = chunk;
        let n = result.map_err(|e| net_err("TCP read failed", e))?;
        if n == 0 {
            return Ok(0);
        }

        let mut conn = self.conn.borrow_mut();
        let mut ciphertext = &self.buf[..n];
        while !ciphertext.is_empty() {
            let used = conn
                .read_tls(&mut ciphertext)
                .map_err(|e| net_err("TLS read failed", e))?;
            conn.process_new_packets()
                .map_err(|e| net_err("TLS process failed", e))?;
            if used == 0 {
                return Err(StreamError::ProtocolError(
                    "TLS receive buffer full".to_string(),
                ));
            }
        }
        Ok(n)
    }
}

/// Move decrypted bytes into `dst`. `None` means rustls needs more
/// ciphertext; `Some(0)` means the peer sent close_notify.
fn drain_plaintext(conn: &mut ClientConnection, dst: &mut Vec<u8>) -> Result<Option<usize>> {
    let mut chunk = [0u8; 4096];
    let mut total = 0;
    loop {
        match conn.reader().read(&mut chunk) {
            Ok(0) => return Ok(Some(total)),
            Ok(n) => {
                dst.extend_from_slice(&chunk[..n]);
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Ok((total > 0).then_some(total));
            }
            Err(e) => return Err(net_err("TLS read failed", e)),
        }
    }
}

/// Write half of a TLS session
pub struct TlsWriteHalf {
    tcp: OwnedWriteHalf<TcpStream>,
    conn: Rc<RefCell<ClientConnection>>,
    buf: Vec<u8>,
    shut: bool,
}

impl TlsWriteHalf {
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.shut {
            return Err(StreamError::NotConnected);
        }
        self.conn
            .borrow_mut()
            .writer()
            .write_all(data)
            .map_err(|e| net_err("TLS application write failed", e))?;
        self.flush_tls().await
    }

    async fn flush_tls(&mut self) -> Result<()> {
        loop {
            {
                let mut conn = self.conn.borrow_mut();
                if !conn.wants_write() {
                    return Ok(());
                }
                self.buf.clear();
                conn.write_tls(&mut self.buf)
                    .map_err(|e| net_err("TLS write failed", e))?;
            }
            let (result, buf) = self.tcp.write_all(std::mem::take(&mut self.buf)).await;
            self.buf = buf;
            result.map_err(|e| net_err("TCP write failed", e))?;
        }
    }

    /// Send close_notify and shut the socket down. Later calls are no-ops.
    pub async fn shutdown(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.shut, true) {
            return Ok(());
        }
        self.conn.borrow_mut().send_close_notify();
        if let Err(e) = self.flush_tls().await {
            debug!("close_notify not delivered: {}", e);
        }
        self.tcp
            .shutdown()
            .await
            .map_err(|e| net_err("TCP shutdown failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_tls_config() {
        let config = default_tls_config();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\n"), Some(19));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\nextra"), Some(19));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n"), None);
    }

    #[rstest]
    #[case(b"HTTP/1.1 200 Connection established\r\n\r\n".as_slice(), 200)]
    #[case(b"HTTP/1.0 407 Proxy Authentication Required\r\n".as_slice(), 407)]
    #[case(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n".as_slice(), 101)]
    fn test_parse_status_code(#[case] response: &[u8], #[case] expected: u16) {
        assert_eq!(parse_status_code(response).unwrap(), expected);
    }

    #[test]
    fn test_parse_status_code_rejects_garbage() {
        assert!(matches!(
            parse_status_code(b"garbage\r\n"),
            Err(StreamError::HandshakeFailed(_))
        ));
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_connect_refused_is_network_error() {
        // Port 1 on loopback is never listening in CI sandboxes.
        let result = connect_tcp("127.0.0.1", 1, None).await;
        assert!(matches!(result, Err(StreamError::NetworkError(_))));
    }
}
