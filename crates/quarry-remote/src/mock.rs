//! Scripted in-memory transport for tests.
//!
//! Each [`MockExchange`] describes one connection: how connecting behaves,
//! the response status and headers, and the body chunks. The connector hands
//! them out in order and counts every transport it opens.

use crate::transport::{ConnectionStatus, Connector, Endpoint, RequestHead, Transport};
use crate::RemoteError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockConnect {
    Ok,
    /// `connect()` itself returns an error.
    Refused,
    /// Polling ends in a failed state.
    FailsWhilePolling(String),
    /// Polling never leaves `Connecting`.
    Hangs,
}

#[derive(Debug, Clone)]
pub struct MockExchange {
    pub connect: MockConnect,
    /// Polls reporting `Connecting` before `Connected`.
    pub connecting_polls: usize,
    pub fail_request: bool,
    pub status: u16,
    pub headers: Vec<String>,
    pub body: Vec<Vec<u8>>,
}

impl MockExchange {
    pub fn ok(body: &[u8]) -> Self {
        Self::status(200).with_header(&format!("Content-Length: {}", body.len())).with_body(body)
    }

    pub fn status(status: u16) -> Self {
        Self {
            connect: MockConnect::Ok,
            connecting_polls: 0,
            fail_request: false,
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self::status(302).with_header(&format!("Location: {location}"))
    }

    pub fn connect_behavior(connect: MockConnect) -> Self {
        Self {
            connect,
            ..Self::status(200)
        }
    }

    #[must_use]
    pub fn with_header(mut self, line: &str) -> Self {
        self.headers.push(line.to_owned());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = vec![body.to_vec()];
        self
    }

    #[must_use]
    pub fn with_chunks(mut self, chunks: &[&[u8]]) -> Self {
        self.body = chunks.iter().map(|c| c.to_vec()).collect();
        self
    }
}

#[derive(Debug, Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<MockExchange>>,
    opened: AtomicUsize,
    requests: Arc<Mutex<Vec<(Endpoint, RequestHead)>>>,
}

impl MockConnector {
    pub fn new(script: Vec<MockExchange>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Number of transports opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Every request issued, with the endpoint it went to.
    pub fn requests(&self) -> Vec<(Endpoint, RequestHead)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Connector for MockConnector {
    fn open(&self) -> Box<dyn Transport> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let exchange = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                MockExchange::connect_behavior(MockConnect::FailsWhilePolling(
                    "mock script exhausted".to_owned(),
                ))
            });
        Box::new(MockTransport {
            exchange,
            status: ConnectionStatus::Disconnected,
            endpoint: None,
            remaining_connecting: 0,
            body: VecDeque::new(),
            requests: Arc::clone(&self.requests),
        })
    }
}

struct MockTransport {
    exchange: MockExchange,
    status: ConnectionStatus,
    endpoint: Option<Endpoint>,
    remaining_connecting: usize,
    body: VecDeque<Vec<u8>>,
    requests: Arc<Mutex<Vec<(Endpoint, RequestHead)>>>,
}

impl Transport for MockTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), RemoteError> {
        if self.exchange.connect == MockConnect::Refused {
            return Err(RemoteError::Connect(format!(
                "{}:{} refused",
                endpoint.host, endpoint.port
            )));
        }
        self.endpoint = Some(endpoint.clone());
        self.remaining_connecting = self.exchange.connecting_polls;
        self.status = ConnectionStatus::Connecting;
        Ok(())
    }

    fn poll(&mut self) -> ConnectionStatus {
        match self.status {
            ConnectionStatus::Connecting => match &self.exchange.connect {
                MockConnect::Hangs => {}
                MockConnect::FailsWhilePolling(reason) => {
                    self.status = ConnectionStatus::Failed(reason.clone());
                }
                _ if self.remaining_connecting > 0 => self.remaining_connecting -= 1,
                _ => self.status = ConnectionStatus::Connected,
            },
            ConnectionStatus::Requesting => self.status = ConnectionStatus::Body,
            _ => {}
        }
        self.status.clone()
    }

    fn request(&mut self, head: &RequestHead) -> Result<(), RemoteError> {
        if self.status != ConnectionStatus::Connected || self.exchange.fail_request {
            return Err(RemoteError::Request("mock request rejected".to_owned()));
        }
        if let Some(endpoint) = &self.endpoint {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((endpoint.clone(), head.clone()));
        }
        self.body = self.exchange.body.clone().into();
        self.status = ConnectionStatus::Requesting;
        Ok(())
    }

    fn response_code(&self) -> Option<u16> {
        (self.status == ConnectionStatus::Body).then_some(self.exchange.status)
    }

    fn response_headers(&self) -> Vec<String> {
        self.exchange.headers.clone()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError> {
        let Some(mut chunk) = self.body.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.body.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.status = ConnectionStatus::Disconnected;
    }
}
