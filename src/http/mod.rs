//! Pieces pertaining to the HTTP message protocol.
use std::collections::HashMap;

use idna;
use time;

use header::Headers;
use method::Method;
use version::HttpVersion;

pub use self::buffer::Buffer;
pub use self::h1::{Encoder, ParseStep, Parser};

pub mod buffer;
pub mod h1;

pub const CRLF: &[u8] = b"\r\n";

/// An incoming request, produced incrementally by the [`Parser`].
///
/// Field validity follows the phase flags: once `headed` is set the start
/// line and headers are populated; once `ended` is set the body is complete
/// and `length` equals its size.
#[derive(Debug)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// The raw request target from the start line.
    pub url: String,
    /// Protocol version from the start line.
    pub version: HttpVersion,

    /// Percent-decoded path portion of the target.
    pub path: String,
    /// Scheme from an absolute-form target, otherwise empty.
    pub scheme: String,
    /// Host from an absolute- or authority-form target, otherwise empty.
    pub host: String,
    /// Port from an absolute- or authority-form target.
    pub port: Option<u16>,
    /// Query string, left percent-encoded.
    pub query: String,
    /// Fragment portion of the target.
    pub fragment: String,

    /// Request headers, in arrival order.
    pub headers: Headers,

    /// True when the body uses chunked transfer coding.
    pub chunked: bool,
    /// Body length. Unset while a chunked body is still arriving; after
    /// `ended` it always holds the body size.
    pub length: Option<u64>,
    /// Charset recorded from a Content-Type parameter.
    pub encoding: Option<String>,
    /// True when the Content-Type media type is `application/json`.
    pub jsoned: bool,

    /// True once the start line and headers have parsed.
    pub headed: bool,
    /// True once the body has parsed.
    pub bodied: bool,
    /// True once the whole message has parsed.
    pub ended: bool,
    /// True when the connection should be kept open after the response.
    pub persisted: bool,

    /// Chunk extension parameters accumulated from a chunked body.
    pub parms: HashMap<String, String>,
    /// Trailing headers after the last chunk of a chunked body.
    pub trails: Headers,
    /// The message body.
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Request {
        Request {
            method: Method::Get,
            url: String::new(),
            version: HttpVersion::Http11,
            path: String::new(),
            scheme: String::new(),
            host: String::new(),
            port: None,
            query: String::new(),
            fragment: String::new(),
            headers: Headers::new(),
            chunked: false,
            length: None,
            encoding: None,
            jsoned: false,
            headed: false,
            bodied: false,
            ended: false,
            persisted: false,
            parms: HashMap::new(),
            trails: Headers::new(),
            body: Vec::new(),
        }
    }
}

/// The current date, RFC 1123 formatted in UTC, for `Date` headers.
pub fn http_date() -> String {
    time::now_utc().rfc822().to_string()
}

/// Packs one header line onto `out`.
///
/// Header bytes are ASCII on the wire; a non-ASCII value (a Host naming an
/// internationalized domain) falls back to its IDNA encoding.
pub fn pack_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    if value.is_ascii() {
        out.extend_from_slice(value.as_bytes());
    } else {
        match idna::domain_to_ascii(value) {
            Ok(encoded) => out.extend_from_slice(encoded.as_bytes()),
            Err(_) => out.extend_from_slice(value.as_bytes()),
        }
    }
    out.extend_from_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::{http_date, pack_header};

    #[test]
    fn test_http_date_shape() {
        let date = http_date();
        // e.g. "Sat, 01 Aug 2026 12:00:00 GMT"
        assert!(date.ends_with("GMT"), "unexpected date: {}", date);
        assert_eq!(date.as_bytes()[3], b',');
    }

    #[test]
    fn test_pack_header() {
        let mut out = Vec::new();
        pack_header(&mut out, "Content-Type", "text/plain");
        assert_eq!(out, b"Content-Type: text/plain\r\n");
    }

    #[test]
    fn test_pack_header_idna_fallback() {
        let mut out = Vec::new();
        pack_header(&mut out, "Host", "bücher.example");
        assert_eq!(out, b"Host: xn--bcher-kva.example\r\n");
    }
}
