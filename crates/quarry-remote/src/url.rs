use crate::RemoteError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// An `http://` or `https://` URL, split into the pieces a request needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    explicit_port: bool,
    /// Path plus query, always starting with `/`. Fragments are dropped.
    pub path: String,
}

impl Url {
    pub fn parse(input: &str) -> Result<Self, RemoteError> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| RemoteError::InvalidUrl(input.to_owned()))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(RemoteError::UnsupportedScheme(input.to_owned())),
        };

        let rest = rest.split('#').next().unwrap_or_default();
        let split_at = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, path) = rest.split_at(split_at);
        if authority.contains('@') {
            return Err(RemoteError::InvalidUrl(format!(
                "{input}: credentials in URLs are not supported"
            )));
        }

        let (host, port) = split_host_port(authority)
            .ok_or_else(|| RemoteError::InvalidUrl(input.to_owned()))?;
        if host.is_empty() {
            return Err(RemoteError::InvalidUrl(input.to_owned()));
        }

        let path = if path.is_empty() {
            "/".to_owned()
        } else if path.starts_with('?') {
            format!("/{}", encode_path(path))
        } else {
            encode_path(path)
        };

        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port: port.unwrap_or(scheme.default_port()),
            explicit_port: port.is_some(),
            path,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Value for the `Host` request header.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.explicit_port && self.port != self.scheme.default_port() {
            format!("{host}:{}", self.port)
        } else {
            host
        }
    }

    /// Resolve a `Location` header (absolute, scheme-relative, absolute-path,
    /// or relative) against this URL.
    pub fn join(&self, reference: &str) -> Result<Self, RemoteError> {
        let reference = reference.trim();
        if has_scheme(reference) {
            return Self::parse(reference);
        }
        if let Some(rest) = reference.strip_prefix("//") {
            return Self::parse(&format!("{}://{rest}", self.scheme.as_str()));
        }
        let base = format!("{}://{}", self.scheme.as_str(), self.authority());
        if reference.starts_with('/') {
            return Self::parse(&format!("{base}{reference}"));
        }
        let path_only = self.path.split('?').next().unwrap_or("/");
        let dir = match path_only.rfind('/') {
            Some(idx) => &path_only[..=idx],
            None => "/",
        };
        Self::parse(&format!("{base}{}", normalize_dots(&format!("{dir}{reference}"))))
    }

    fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{host}:{}", self.port)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.host_header(), self.path)
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after {
            "" => Some((host, None)),
            p => Some((host, Some(p.strip_prefix(':')?.parse().ok()?))),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host, Some(port.parse().ok()?))),
        Some(_) => None,
        None => Some((authority, None)),
    }
}

/// True when `reference` opens with `scheme:` (RFC 3986 section 3.1) before
/// any path, query or fragment delimiter.
fn has_scheme(reference: &str) -> bool {
    let Some(colon) = reference.find([':', '/', '?', '#']) else {
        return false;
    };
    if reference.as_bytes()[colon] != b':' {
        return false;
    }
    let scheme = &reference[..colon];
    scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Percent-encode every byte that may not appear raw in a request target.
/// Existing `%XX` escapes pass through unchanged.
fn encode_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw.as_bytes() {
        let keep = b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'-' | b'.' | b'_' | b'~' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*'
                    | b'+' | b',' | b';' | b'=' | b':' | b'@' | b'/' | b'?' | b'%'
            );
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Collapse `.` and `..` segments of a path (query left untouched).
fn normalize_dots(path: &str) -> String {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/').skip(1) {
        match seg {
            "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let trailing = path.ends_with("/.") || path.ends_with("/..");
    let mut out = format!("/{}", parts.join("/"));
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    if let Some(q) = query {
        out.push('?');
        out.push_str(q);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_ports() {
        let u = Url::parse("https://mirror.example.com/tools/a.tar").unwrap();
        assert!(u.is_tls());
        assert_eq!(u.port, 443);
        assert_eq!(u.host, "mirror.example.com");
        assert_eq!(u.path, "/tools/a.tar");

        let u = Url::parse("http://Mirror.Example.com").unwrap();
        assert!(!u.is_tls());
        assert_eq!(u.port, 80);
        assert_eq!(u.host, "mirror.example.com");
        assert_eq!(u.path, "/");
    }

    #[test]
    fn parses_explicit_port_and_query() {
        let u = Url::parse("http://127.0.0.1:8080/a?b=c#frag").unwrap();
        assert_eq!(u.port, 8080);
        assert_eq!(u.path, "/a?b=c");
        assert_eq!(u.host_header(), "127.0.0.1:8080");
        assert_eq!(u.to_string(), "http://127.0.0.1:8080/a?b=c");
    }

    #[test]
    fn parses_ipv6_literal() {
        let u = Url::parse("http://[::1]:9000/x").unwrap();
        assert_eq!(u.host, "::1");
        assert_eq!(u.port, 9000);
        assert_eq!(u.host_header(), "[::1]:9000");
    }

    #[test]
    fn rejects_bad_schemes_and_shapes() {
        assert!(matches!(
            Url::parse("ftp://example.com/a"),
            Err(RemoteError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            Url::parse("file:///etc/passwd"),
            Err(RemoteError::UnsupportedScheme(_))
        ));
        assert!(matches!(Url::parse("example.com/a"), Err(RemoteError::InvalidUrl(_))));
        assert!(matches!(Url::parse("http:///a"), Err(RemoteError::InvalidUrl(_))));
        assert!(matches!(
            Url::parse("http://host:notaport/"),
            Err(RemoteError::InvalidUrl(_))
        ));
        assert!(matches!(
            Url::parse("http://user:pw@host/"),
            Err(RemoteError::InvalidUrl(_))
        ));
    }

    #[test]
    fn join_handles_each_reference_form() {
        let base = Url::parse("http://a.example.com:8080/dir/file.tar?x=1").unwrap();
        assert_eq!(
            base.join("https://b.example.com/z").unwrap().to_string(),
            "https://b.example.com/z"
        );
        assert_eq!(
            base.join("//c.example.com/y").unwrap().to_string(),
            "http://c.example.com/y"
        );
        assert_eq!(
            base.join("/abs/path").unwrap().to_string(),
            "http://a.example.com:8080/abs/path"
        );
        assert_eq!(
            base.join("other.tar").unwrap().to_string(),
            "http://a.example.com:8080/dir/other.tar"
        );
        assert_eq!(
            base.join("../up.tar").unwrap().to_string(),
            "http://a.example.com:8080/up.tar"
        );
    }

    #[test]
    fn join_keeps_urls_inside_the_query_relative() {
        let base = Url::parse("http://mirror.example.com/dl/godot.tar").unwrap();
        let next = base
            .join("/cdn/godot.tar?origin=https://mirror.example.com/x")
            .unwrap();
        assert_eq!(next.host, "mirror.example.com");
        assert_eq!(next.path, "/cdn/godot.tar?origin=https://mirror.example.com/x");

        let next = base.join("mirror.tar?via=http://other.example.com").unwrap();
        assert_eq!(next.host, "mirror.example.com");
        assert_eq!(next.path, "/dl/mirror.tar?via=http://other.example.com");
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("https://b.example.com/z"));
        assert!(has_scheme("HTTP://b.example.com/z"));
        assert!(has_scheme("svn+ssh://host/repo"));
        assert!(!has_scheme("/cdn/a.tar?u=https://x"));
        assert!(!has_scheme("a.tar?u=https://x"));
        assert!(!has_scheme("//cdn.example.com/a"));
        assert!(!has_scheme("1abc://x"));
        assert!(!has_scheme("plain.tar"));
    }

    #[test]
    fn request_paths_are_percent_encoded() {
        let u = Url::parse("http://mirror.example.com/base/my tool.tar").unwrap();
        assert_eq!(u.path, "/base/my%20tool.tar");
        assert_eq!(u.to_string(), "http://mirror.example.com/base/my%20tool.tar");

        let u = Url::parse("http://mirror.example.com/base/\u{fc}n\u{ef}.tar").unwrap();
        assert_eq!(u.path, "/base/%C3%BCn%C3%AF.tar");

        let u = Url::parse("http://mirror.example.com/a%20b.tar?q=x y").unwrap();
        assert_eq!(u.path, "/a%20b.tar?q=x%20y");

        let base = Url::parse("http://mirror.example.com/dl/").unwrap();
        assert_eq!(base.join("new tool.tar").unwrap().path, "/dl/new%20tool.tar");
    }

    #[test]
    fn normalize_dots_keeps_query() {
        assert_eq!(normalize_dots("/a/./b/../c?q=../x"), "/a/c?q=../x");
        assert_eq!(normalize_dots("/a/b/.."), "/a/");
    }
}
