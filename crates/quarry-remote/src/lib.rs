//! Network side of tool hydration.
//!
//! This crate provides the offline gate every connection must pass, the
//! network policy and client configuration it reads, a pollable transport
//! over TCP/TLS, and a small HTTP/1.1 GET client with redirect following and
//! streamed downloads on top of it.

pub mod config;
pub mod gate;
pub mod http;
pub mod mock;
pub mod transport;
pub mod url;

pub use config::{default_policy_path, ClientOptions, PolicyConfig, FORCE_OFFLINE_ENV};
pub use gate::{GateDecision, NetworkTarget, OfflineGate};
pub use http::{HeaderMap, HttpClient, Response};
pub use transport::{
    ConnectionStatus, Connector, Endpoint, RequestHead, TcpConnector, TcpTransport, Transport,
};
pub use url::{Scheme, Url};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("{0}")]
    PolicyDenied(String),
    #[error("failed to start connection: {0}")]
    Connect(String),
    #[error("could not connect to {url}: {status}")]
    NotConnected { url: String, status: String },
    #[error("failed to send request: {0}")]
    Request(String),
    #[error("failed to receive response: {0}")]
    Response(String),
    #[error("timed out waiting for {phase}")]
    Timeout { phase: String },
    #[error("redirect status {0} without a Location header")]
    MissingLocation(u16),
    #[error("too many redirects (limit {0})")]
    RedirectLimit(usize),
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(u64),
    #[error("failed to read response body: {0}")]
    Read(String),
    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("remote config error: {0}")]
    Config(String),
}

impl RemoteError {
    /// The request never left the process because policy forbade it.
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, Self::PolicyDenied(_))
    }
}
