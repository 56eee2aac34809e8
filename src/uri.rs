//! HTTP RequestUris
use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::Url;

use error::Error;

/// The Request-URI of a Request's StartLine.
///
/// From Section 5.3, Request Target:
/// > Once an inbound connection is obtained, the client sends an HTTP
/// > request message (Section 3) with a request-target derived from the
/// > target URI.  There are four distinct formats for the request-target,
/// > depending on both the method being requested and whether the request
/// > is to a proxy.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestUri {
    /// The most common request target, an absolute path and optional query.
    ///
    /// For example, the line `GET /where?q=now HTTP/1.1` would parse the
    /// URI as `AbsolutePath("/where?q=now".to_string())`.
    AbsolutePath(String),

    /// An absolute URI. Used in conjunction with proxies.
    ///
    /// > When making a request to a proxy, other than a CONNECT or server-wide
    /// > OPTIONS request (as detailed below), a client MUST send the target
    /// > URI in absolute-form as the request-target.
    AbsoluteUri(Url),

    /// The authority form is only for use with `CONNECT` requests.
    ///
    /// An example StartLine with an `Authority` would be
    /// `CONNECT www.example.com:80 HTTP/1.1`.
    Authority(String),

    /// The star is used to target the entire server, instead of a specific resource.
    ///
    /// This is only used for a server-wide `OPTIONS` request.
    Star,
}

impl FromStr for RequestUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<RequestUri, Error> {
        match s.as_bytes() {
            [] => Err(Error::StartLine),
            [b'*'] => Ok(RequestUri::Star),
            [b'/', ..] => Ok(RequestUri::AbsolutePath(s.to_owned())),
            _ if s.contains("://") => Ok(RequestUri::AbsoluteUri(Url::parse(s)?)),
            _ => Ok(RequestUri::Authority(s.to_owned())),
        }
    }
}

impl fmt::Display for RequestUri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RequestUri::AbsolutePath(ref path) => f.write_str(path),
            RequestUri::AbsoluteUri(ref url) => write!(f, "{}", url),
            RequestUri::Authority(ref path) => f.write_str(path),
            RequestUri::Star => f.write_str("*"),
        }
    }
}

/// The request target broken into its URL pieces.
///
/// Only the path is percent-decoded; the query is handed to applications as
/// it arrived.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl RequestUri {
    /// Splits this target into scheme, authority, decoded path, raw query
    /// and fragment.
    pub fn split(&self) -> Target {
        let mut target = Target::default();
        match *self {
            RequestUri::Star => target.path.push('*'),
            RequestUri::AbsolutePath(ref s) => {
                let (rest, fragment) = cleave(s, '#');
                let (path, query) = cleave(rest, '?');
                target.path = decode(path);
                target.query = query.to_owned();
                target.fragment = fragment.to_owned();
            }
            RequestUri::Authority(ref s) => {
                let (host, port) = cleave(s, ':');
                target.host = host.to_owned();
                target.port = port.parse().ok();
            }
            RequestUri::AbsoluteUri(ref url) => {
                target.scheme = url.scheme().to_owned();
                target.host = url.host_str().unwrap_or("").to_owned();
                target.port = url.port();
                target.path = decode(url.path());
                target.query = url.query().unwrap_or("").to_owned();
                target.fragment = url.fragment().unwrap_or("").to_owned();
            }
        }
        target
    }
}

fn cleave(s: &str, sep: char) -> (&str, &str) {
    match s.find(sep) {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::RequestUri;
    use super::RequestUri::{AbsolutePath, Authority, Star};

    #[test]
    fn test_parse_forms() {
        assert_eq!("*".parse::<RequestUri>().unwrap(), Star);
        assert_eq!("/hi".parse::<RequestUri>().unwrap(),
                   AbsolutePath("/hi".to_owned()));
        assert_eq!("example.com:443".parse::<RequestUri>().unwrap(),
                   Authority("example.com:443".to_owned()));
        assert!(matches!("http://example.com/a".parse::<RequestUri>().unwrap(),
                         RequestUri::AbsoluteUri(..)));
        assert!("".parse::<RequestUri>().is_err());
    }

    #[test]
    fn test_split_absolute_path() {
        let uri: RequestUri = "/a%20b/c?q=1&r=%202#frag".parse().unwrap();
        let target = uri.split();
        assert_eq!(target.path, "/a b/c");
        // the query is left percent-encoded
        assert_eq!(target.query, "q=1&r=%202");
        assert_eq!(target.fragment, "frag");
        assert_eq!(target.host, "");
    }

    #[test]
    fn test_split_absolute_uri() {
        let uri: RequestUri = "https://example.com:8443/p%2Fq?x=y".parse().unwrap();
        let target = uri.split();
        assert_eq!(target.scheme, "https");
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, Some(8443));
        assert_eq!(target.path, "/p/q");
        assert_eq!(target.query, "x=y");
    }

    #[test]
    fn test_split_authority() {
        let uri: RequestUri = "example.com:80".parse().unwrap();
        let target = uri.split();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, Some(80));
        assert_eq!(target.path, "");
    }

    #[test]
    fn test_split_star() {
        let target = Star.split();
        assert_eq!(target.path, "*");
    }
}
