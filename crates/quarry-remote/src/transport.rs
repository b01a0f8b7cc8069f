//! Pollable connection primitive underneath the retrieval client.
//!
//! A [`Transport`] is driven as connect → poll → request → poll → read chunks.
//! `TcpTransport` implements it over `std::net::TcpStream`, wrapped in rustls
//! for `https` endpoints, and decodes `Content-Length`, chunked, and
//! close-delimited bodies.

use crate::config::ClientOptions;
use crate::RemoteError;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use std::fmt;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const MAX_HEAD_LINE: u64 = 16 * 1024;
const MAX_HEADER_LINES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Requesting,
    /// Response head received; body may be read.
    Body,
    Failed(String),
}

impl ConnectionStatus {
    /// Still working towards the next terminal state.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Connecting | Self::Requesting)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Requesting => f.write_str("requesting"),
            Self::Body => f.write_str("body"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: &'static str,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    fn encode(&self) -> String {
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, self.path);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

/// One HTTP/1.1 exchange over a single connection.
pub trait Transport: Send {
    /// Begin connecting. Progress is observed through [`poll`](Self::poll).
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), RemoteError>;

    fn poll(&mut self) -> ConnectionStatus;

    /// Issue the request. Only valid once `poll` reports `Connected`.
    fn request(&mut self, head: &RequestHead) -> Result<(), RemoteError>;

    fn response_code(&self) -> Option<u16>;

    /// Raw `Name: value` header lines of the response.
    fn response_headers(&self) -> Vec<String>;

    /// Read the next piece of the body. `Ok(0)` marks the end of the body.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError>;

    fn close(&mut self);
}

/// Opens a fresh transport per connection (each redirect hop gets its own).
pub trait Connector: Send + Sync {
    fn open(&self) -> Box<dyn Transport>;
}

/// Connector producing [`TcpTransport`]s.
pub struct TcpConnector {
    options: ClientOptions,
    tls: Arc<ClientConfig>,
}

impl TcpConnector {
    pub fn new(options: ClientOptions) -> Result<Self, RemoteError> {
        Ok(Self {
            options,
            tls: tls_config()?,
        })
    }
}

impl Connector for TcpConnector {
    fn open(&self) -> Box<dyn Transport> {
        Box::new(TcpTransport::new(&self.options, Arc::clone(&self.tls)))
    }
}

fn tls_config() -> Result<Arc<ClientConfig>, RemoteError> {
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RemoteError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(u64),
    Chunked { remaining: u64, finished: bool },
    UntilClose,
}

impl Framing {
    fn for_response(code: u16, headers: &[String]) -> Self {
        if (100..200).contains(&code) || code == 204 || code == 304 {
            return Self::Length(0);
        }
        if header_value(headers, "transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
        {
            return Self::Chunked {
                remaining: 0,
                finished: false,
            };
        }
        match header_value(headers, "content-length").and_then(|v| v.parse().ok()) {
            Some(len) => Self::Length(len),
            None => Self::UntilClose,
        }
    }
}

fn header_value<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

enum State {
    Idle,
    Pending(Endpoint),
    Connected(Stream),
    AwaitingResponse(BufReader<Stream>),
    Body(BufReader<Stream>, Framing),
    Done,
    Failed(String),
}

pub struct TcpTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
    buffer_size: usize,
    tls: Arc<ClientConfig>,
    state: State,
    status_code: Option<u16>,
    headers: Vec<String>,
}

impl TcpTransport {
    fn new(options: &ClientOptions, tls: Arc<ClientConfig>) -> Self {
        Self {
            connect_timeout: options.connect_timeout().max(Duration::from_millis(1)),
            read_timeout: options.read_timeout().max(Duration::from_millis(1)),
            buffer_size: options.chunk_size.max(1024),
            tls,
            state: State::Idle,
            status_code: None,
            headers: Vec::new(),
        }
    }

    fn establish(&self, endpoint: &Endpoint) -> Result<Stream, String> {
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| format!("cannot resolve '{}': {e}", endpoint.host))?
            .collect();

        let mut last_err = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| {
            let why = last_err.map_or_else(|| "no addresses".to_owned(), |e| e.to_string());
            format!("connect to {}:{} failed: {why}", endpoint.host, endpoint.port)
        })?;
        tcp.set_read_timeout(Some(self.read_timeout))
            .and_then(|()| tcp.set_write_timeout(Some(self.read_timeout)))
            .and_then(|()| tcp.set_nodelay(true))
            .map_err(|e| format!("socket setup failed: {e}"))?;

        if !endpoint.tls {
            return Ok(Stream::Plain(tcp));
        }

        let name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| format!("invalid TLS server name '{}': {e}", endpoint.host))?;
        let conn = ClientConnection::new(Arc::clone(&self.tls), name)
            .map_err(|e| format!("TLS setup failed: {e}"))?;
        let mut tls = StreamOwned::new(conn, tcp);
        while tls.conn.is_handshaking() {
            tls.conn
                .complete_io(&mut tls.sock)
                .map_err(|e| format!("TLS handshake with '{}' failed: {e}", endpoint.host))?;
        }
        Ok(Stream::Tls(Box::new(tls)))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), RemoteError> {
        if !matches!(self.state, State::Idle) {
            return Err(RemoteError::Connect(
                "transport is already connected".to_owned(),
            ));
        }
        debug!(
            "connecting to {}:{} (tls: {})",
            endpoint.host, endpoint.port, endpoint.tls
        );
        self.state = State::Pending(endpoint.clone());
        Ok(())
    }

    fn poll(&mut self) -> ConnectionStatus {
        let (next, status) = match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => (State::Idle, ConnectionStatus::Disconnected),
            State::Pending(endpoint) => match self.establish(&endpoint) {
                Ok(stream) => (State::Connected(stream), ConnectionStatus::Connected),
                Err(reason) => (
                    State::Failed(reason.clone()),
                    ConnectionStatus::Failed(reason),
                ),
            },
            State::Connected(stream) => (State::Connected(stream), ConnectionStatus::Connected),
            State::AwaitingResponse(mut reader) => match read_head(&mut reader) {
                Ok((code, headers)) => {
                    trace!("response {code} with {} headers", headers.len());
                    let framing = Framing::for_response(code, &headers);
                    self.status_code = Some(code);
                    self.headers = headers;
                    (State::Body(reader, framing), ConnectionStatus::Body)
                }
                Err(reason) => (
                    State::Failed(reason.clone()),
                    ConnectionStatus::Failed(reason),
                ),
            },
            State::Body(reader, framing) => (State::Body(reader, framing), ConnectionStatus::Body),
            State::Done => (State::Done, ConnectionStatus::Disconnected),
            State::Failed(reason) => (
                State::Failed(reason.clone()),
                ConnectionStatus::Failed(reason),
            ),
        };
        self.state = next;
        status
    }

    fn request(&mut self, head: &RequestHead) -> Result<(), RemoteError> {
        let State::Connected(mut stream) = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(RemoteError::Request("transport is not connected".to_owned()));
        };
        let encoded = head.encode();
        if let Err(e) = stream
            .write_all(encoded.as_bytes())
            .and_then(|()| stream.flush())
        {
            self.state = State::Failed(e.to_string());
            return Err(RemoteError::Request(format!(
                "{} {}: {e}",
                head.method, head.path
            )));
        }
        self.state = State::AwaitingResponse(BufReader::with_capacity(self.buffer_size, stream));
        Ok(())
    }

    fn response_code(&self) -> Option<u16> {
        self.status_code
    }

    fn response_headers(&self) -> Vec<String> {
        self.headers.clone()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError> {
        let result = match &mut self.state {
            State::Body(reader, framing) => read_framed(reader, framing, buf),
            State::Done => return Ok(0),
            _ => {
                return Err(RemoteError::Read(
                    "no response body is available".to_owned(),
                ))
            }
        };
        match result {
            Ok(0) => self.state = State::Done,
            Err(ref e) => self.state = State::Failed(e.to_string()),
            Ok(_) => {}
        }
        result
    }

    fn close(&mut self) {
        self.state = State::Idle;
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut line = String::new();
    Read::take(&mut *reader, MAX_HEAD_LINE).read_line(&mut line)?;
    Ok(line)
}

fn read_head<R: BufRead>(reader: &mut R) -> Result<(u16, Vec<String>), String> {
    let describe = |e: io::Error| {
        if is_timeout(&e) {
            "timed out waiting for response".to_owned()
        } else {
            format!("failed reading response: {e}")
        }
    };

    let status_line = read_line(reader).map_err(describe)?;
    if status_line.is_empty() {
        return Err("connection closed before a response was received".to_owned());
    }
    let code = parse_status_line(status_line.trim_end())
        .ok_or_else(|| format!("malformed status line: '{}'", status_line.trim_end()))?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader).map_err(describe)?;
        if line.is_empty() {
            return Err("connection closed inside response headers".to_owned());
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADER_LINES {
            return Err("too many response headers".to_owned());
        }
        headers.push(line.to_owned());
    }
    Ok((code, headers))
}

fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code: u16 = parts.next()?.parse().ok()?;
    (100..=999).contains(&code).then_some(code)
}

fn map_body_error(e: io::Error) -> RemoteError {
    if is_timeout(&e) {
        RemoteError::Timeout {
            phase: "body read".to_owned(),
        }
    } else {
        RemoteError::Read(e.to_string())
    }
}

fn read_framed<R: BufRead>(
    reader: &mut R,
    framing: &mut Framing,
    buf: &mut [u8],
) -> Result<usize, RemoteError> {
    if buf.is_empty() {
        return Ok(0);
    }
    match framing {
        Framing::Length(remaining) => {
            if *remaining == 0 {
                return Ok(0);
            }
            let want = (*remaining).min(buf.len() as u64) as usize;
            let n = reader.read(&mut buf[..want]).map_err(map_body_error)?;
            if n == 0 {
                return Err(RemoteError::Read(format!(
                    "connection closed with {remaining} body bytes outstanding"
                )));
            }
            *remaining -= n as u64;
            Ok(n)
        }
        Framing::Chunked {
            remaining,
            finished,
        } => {
            if *finished {
                return Ok(0);
            }
            if *remaining == 0 {
                let size_line = read_line(reader).map_err(map_body_error)?;
                let size_hex = size_line.split(';').next().unwrap_or_default().trim();
                let size = u64::from_str_radix(size_hex, 16).map_err(|_| {
                    RemoteError::Read(format!("malformed chunk size line: '{}'", size_line.trim()))
                })?;
                if size == 0 {
                    // Trailer section ends at the first empty line.
                    loop {
                        let line = read_line(reader).map_err(map_body_error)?;
                        if line.trim().is_empty() {
                            break;
                        }
                    }
                    *finished = true;
                    return Ok(0);
                }
                *remaining = size;
            }
            let want = (*remaining).min(buf.len() as u64) as usize;
            let n = reader.read(&mut buf[..want]).map_err(map_body_error)?;
            if n == 0 {
                return Err(RemoteError::Read(
                    "connection closed inside a chunk".to_owned(),
                ));
            }
            *remaining -= n as u64;
            if *remaining == 0 {
                let crlf = read_line(reader).map_err(map_body_error)?;
                if !crlf.trim().is_empty() {
                    return Err(RemoteError::Read("missing chunk terminator".to_owned()));
                }
            }
            Ok(n)
        }
        Framing::UntilClose => match reader.read(buf) {
            Ok(n) => Ok(n),
            // Peers frequently skip TLS close_notify on close-delimited bodies.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(map_body_error(e)),
        },
    }
}
