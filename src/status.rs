//! HTTP status codes and reason phrases.
use std::borrow::Cow;
use std::fmt;

/// The raw status code and reason-phrase.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawStatus(pub u16, pub Cow<'static, str>);

impl RawStatus {
    /// A status with a caller-provided reason phrase.
    pub fn owned(code: u16, reason: String) -> RawStatus {
        RawStatus(code, Cow::Owned(reason))
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn reason(&self) -> &str {
        &self.1
    }
}

impl fmt::Display for RawStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.0, self.1)
    }
}

impl From<u16> for RawStatus {
    fn from(code: u16) -> RawStatus {
        RawStatus(code, Cow::Borrowed(canonical_reason(code).unwrap_or("Unknown")))
    }
}

impl From<(u16, &'static str)> for RawStatus {
    fn from((code, reason): (u16, &'static str)) -> RawStatus {
        RawStatus(code, Cow::Borrowed(reason))
    }
}

/// Accepts the WSGI-style `"<code> <reason>"` form. An unparseable code
/// degrades to 500 rather than failing the declaration.
impl<'a> From<&'a str> for RawStatus {
    fn from(s: &'a str) -> RawStatus {
        let mut parts = s.trim().splitn(2, ' ');
        let code = parts.next().and_then(|c| c.parse().ok()).unwrap_or(500u16);
        match parts.next() {
            Some(reason) if !reason.trim().is_empty() => {
                RawStatus::owned(code, reason.trim().to_owned())
            }
            _ => RawStatus::from(code),
        }
    }
}

/// The canonical reason phrase for a status code, if one is registered.
pub fn canonical_reason(code: u16) -> Option<&'static str> {
    Some(match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::{canonical_reason, RawStatus};

    #[test]
    fn test_canonical_reason() {
        assert_eq!(canonical_reason(200), Some("OK"));
        assert_eq!(canonical_reason(411), Some("Length Required"));
        assert_eq!(canonical_reason(299), None);
    }

    #[test]
    fn test_from_code() {
        let status = RawStatus::from(404);
        assert_eq!(status.code(), 404);
        assert_eq!(status.reason(), "Not Found");
    }

    #[test]
    fn test_from_str() {
        let status = RawStatus::from("200 OK");
        assert_eq!(status.code(), 200);
        assert_eq!(status.reason(), "OK");

        let status = RawStatus::from("299 Custom Phrase");
        assert_eq!(status.code(), 299);
        assert_eq!(status.reason(), "Custom Phrase");

        // reason omitted falls back to the canonical table
        let status = RawStatus::from("404");
        assert_eq!(status.reason(), "Not Found");

        // nonsense degrades to a server error
        let status = RawStatus::from("teapot");
        assert_eq!(status.code(), 500);
    }

    #[test]
    fn test_display() {
        assert_eq!(RawStatus::from(200).to_string(), "200 OK");
    }
}
