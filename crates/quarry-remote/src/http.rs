use crate::config::ClientOptions;
use crate::gate::{NetworkTarget, OfflineGate};
use crate::transport::{ConnectionStatus, Connector, Endpoint, RequestHead, TcpConnector, Transport};
use crate::url::Url;
use crate::RemoteError;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Response headers keyed by lowercased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap(BTreeMap<String, String>);

impl HeaderMap {
    /// Split each raw line on its first colon; lines without one are ignored.
    pub fn parse(lines: &[String]) -> Self {
        let mut map = BTreeMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                map.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
            }
        }
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")?.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// URL that produced the response, after redirects.
    pub url: String,
}

struct OpenResponse {
    transport: Box<dyn Transport>,
    status: u16,
    headers: HeaderMap,
    url: Url,
}

/// Minimal HTTP/1.1 GET client.
///
/// Every connection, including each redirect hop, is first cleared with the
/// [`OfflineGate`] for its host and port. Redirects (3xx) are followed in a
/// bounded loop; any final status outside 2xx is an error.
pub struct HttpClient {
    gate: Arc<OfflineGate>,
    connector: Arc<dyn Connector>,
    options: ClientOptions,
}

impl HttpClient {
    /// Client over real TCP/TLS connections.
    pub fn new(gate: Arc<OfflineGate>, options: ClientOptions) -> Result<Self, RemoteError> {
        let connector = Arc::new(TcpConnector::new(options.clone())?);
        Ok(Self::with_connector(gate, connector, options))
    }

    pub fn with_connector(
        gate: Arc<OfflineGate>,
        connector: Arc<dyn Connector>,
        options: ClientOptions,
    ) -> Self {
        Self {
            gate,
            connector,
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn gate(&self) -> &Arc<OfflineGate> {
        &self.gate
    }

    /// GET `url` and buffer the whole body.
    pub fn get(&self, url: &str) -> Result<Response, RemoteError> {
        let mut open = self.open(url)?;
        let mut body = Vec::new();
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        loop {
            let n = open.transport.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            if (body.len() + n) as u64 > self.options.max_body_bytes {
                open.transport.close();
                return Err(RemoteError::BodyTooLarge(self.options.max_body_bytes));
            }
            body.extend_from_slice(&buf[..n]);
        }
        open.transport.close();
        debug!("GET {} -> {} ({} bytes)", open.url, open.status, body.len());
        Ok(Response {
            status: open.status,
            headers: open.headers,
            body,
            url: open.url.to_string(),
        })
    }

    /// GET `url` and stream the body into `dest`.
    ///
    /// `progress` receives `(bytes_so_far, total)` after every chunk. Without a
    /// usable `Content-Length` the total reported equals bytes so far. The
    /// destination only appears once the whole body has been written.
    pub fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<u64, RemoteError> {
        let mut open = self.open(url)?;
        let total = open.headers.content_length();
        let write_err = |source: std::io::Error| RemoteError::Write {
            path: dest.display().to_string(),
            source,
        };

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(write_err)?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;

        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut received: u64 = 0;
        loop {
            let n = open.transport.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            tmp.write_all(&buf[..n]).map_err(write_err)?;
            received += n as u64;
            progress(received, total.unwrap_or(received));
        }
        open.transport.close();

        tmp.flush().map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(dest).map_err(|e| write_err(e.error))?;
        info!("downloaded {} ({received} bytes) to {}", open.url, dest.display());
        Ok(received)
    }

    /// Connect, follow redirects, and stop once a 2xx head has arrived.
    fn open(&self, url: &str) -> Result<OpenResponse, RemoteError> {
        let mut current = Url::parse(url)?;
        let mut redirects = 0usize;
        loop {
            let mut open = self.exchange(&current)?;
            if (300..=399).contains(&open.status) {
                open.transport.close();
                let location = open
                    .headers
                    .get("location")
                    .ok_or(RemoteError::MissingLocation(open.status))?;
                if redirects >= self.options.max_redirects {
                    return Err(RemoteError::RedirectLimit(self.options.max_redirects));
                }
                redirects += 1;
                let next = current.join(location)?;
                debug!("redirect {redirects}: {current} -> {next}");
                current = next;
                continue;
            }
            if !(200..=299).contains(&open.status) {
                open.transport.close();
                return Err(RemoteError::Status {
                    status: open.status,
                    url: current.to_string(),
                });
            }
            return Ok(open);
        }
    }

    /// One request/response-head exchange on a fresh connection.
    fn exchange(&self, url: &Url) -> Result<OpenResponse, RemoteError> {
        let target = NetworkTarget::new(url.host.clone(), url.port);
        self.gate
            .guard_network_call(&format!("GET {url}"), Some(&target))?;

        let endpoint = Endpoint {
            host: url.host.clone(),
            port: url.port,
            tls: url.is_tls(),
        };
        let mut transport = self.connector.open();
        transport.connect(&endpoint)?;

        match self.wait(transport.as_mut(), self.options.connect_timeout(), "connect")? {
            ConnectionStatus::Connected => {}
            other => {
                transport.close();
                return Err(RemoteError::NotConnected {
                    url: url.to_string(),
                    status: other.to_string(),
                });
            }
        }

        let head = RequestHead {
            method: "GET",
            path: url.path.clone(),
            headers: vec![
                ("Host".to_owned(), url.host_header()),
                ("User-Agent".to_owned(), self.options.user_agent.clone()),
                ("Accept".to_owned(), "*/*".to_owned()),
                ("Accept-Encoding".to_owned(), "identity".to_owned()),
                ("Connection".to_owned(), "close".to_owned()),
            ],
        };
        transport.request(&head)?;

        match self.wait(transport.as_mut(), self.options.read_timeout(), "response")? {
            ConnectionStatus::Body => {}
            ConnectionStatus::Failed(reason) => {
                transport.close();
                return Err(RemoteError::Response(reason));
            }
            other => {
                transport.close();
                return Err(RemoteError::Response(format!(
                    "unexpected connection state: {other}"
                )));
            }
        }

        let status = transport
            .response_code()
            .ok_or_else(|| RemoteError::Response("no status code received".to_owned()))?;
        let headers = HeaderMap::parse(&transport.response_headers());
        debug!("GET {url} -> {status}");
        Ok(OpenResponse {
            transport,
            status,
            headers,
            url: url.clone(),
        })
    }

    /// Poll until the transport leaves its transient state or the deadline passes.
    fn wait(
        &self,
        transport: &mut dyn Transport,
        timeout: Duration,
        phase: &str,
    ) -> Result<ConnectionStatus, RemoteError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = transport.poll();
            if !status.is_pending() {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                transport.close();
                return Err(RemoteError::Timeout {
                    phase: phase.to_owned(),
                });
            }
            std::thread::sleep(self.options.poll_interval().min(deadline - now));
        }
    }
}
