//! Error and Result module.
use std::error::Error as StdError;
use std::fmt;
use std::io;

use url;

use header::Headers;
use status::RawStatus;

#[cfg(feature = "ssl")]
use openssl::error::ErrorStack;

/// Result type often returned from methods that can fail with `servio::Error`.
pub type Result<T> = ::std::result::Result<T, Error>;

/// The parse phase a connection was in when the peer closed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting on the request start line.
    StartLine,
    /// Waiting on a header line.
    Header,
    /// Waiting on a body chunk or trailer.
    Chunk,
    /// Waiting on fixed-length body bytes.
    Body,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Phase::StartLine => "start line",
            Phase::Header => "header",
            Phase::Chunk => "body chunk",
            Phase::Body => "body",
        })
    }
}

/// A set of errors that can occur while serving HTTP.
#[derive(Debug)]
pub enum Error {
    /// An invalid `Method`, such as `GE,T`.
    Method,
    /// An invalid request start line.
    StartLine,
    /// An unsupported HTTP version.
    Version,
    /// An invalid header line.
    Header,
    /// An invalid chunk size line.
    Chunk,
    /// A request body without a determinate length: neither chunked nor a
    /// usable `Content-Length`.
    Length,
    /// The peer closed the connection before the message completed.
    Premature(Phase),
    /// The head section grew past the maximum buffered size.
    TooLarge,
    /// An invalid `RequestUri`.
    Uri(url::ParseError),
    /// The application misused the response declaration protocol.
    Declare(&'static str),
    /// An application failure outside the structured error protocol.
    App(Box<dyn StdError>),
    /// An `io::Error` from the underlying transport.
    Io(io::Error),
    /// An error from the TLS layer.
    #[cfg(feature = "ssl")]
    Ssl(ErrorStack),
}

impl Error {
    /// The status code a peer should see for this error, when any bytes may
    /// still be sent at all.
    pub fn status(&self) -> Option<u16> {
        match *self {
            Error::Method |
            Error::StartLine |
            Error::Version |
            Error::Header |
            Error::Chunk |
            Error::TooLarge |
            Error::Uri(..) => Some(400),
            Error::Length => Some(411),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Method => f.write_str("invalid Method specified"),
            Error::StartLine => f.write_str("invalid request start line"),
            Error::Version => f.write_str("invalid HTTP version specified"),
            Error::Header => f.write_str("invalid Header provided"),
            Error::Chunk => f.write_str("invalid chunk size line"),
            Error::Length => f.write_str("invalid body, content-length not provided"),
            Error::Premature(ref phase) => {
                write!(f, "connection closed unexpectedly while parsing request {}", phase)
            }
            Error::TooLarge => f.write_str("message head too large"),
            Error::Uri(ref e) => fmt::Display::fmt(e, f),
            Error::Declare(msg) => write!(f, "response declaration misuse: {}", msg),
            Error::App(ref e) => write!(f, "application error: {}", e),
            Error::Io(ref e) => fmt::Display::fmt(e, f),
            #[cfg(feature = "ssl")]
            Error::Ssl(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::Uri(ref e) => Some(e),
            Error::App(ref e) => Some(&**e),
            Error::Io(ref e) => Some(e),
            #[cfg(feature = "ssl")]
            Error::Ssl(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::Uri(err)
    }
}

#[cfg(feature = "ssl")]
impl From<ErrorStack> for Error {
    fn from(err: ErrorStack) -> Error {
        Error::Ssl(err)
    }
}

/// A structured error an application raises to replace the response it can
/// no longer produce.
///
/// When the head has not been flushed yet, the server answers with this
/// error's status, headers and body instead of the declared response. Once
/// the head is on the wire it is too late to change minds, and the error is
/// only logged.
#[derive(Debug)]
pub struct HttpError {
    /// Status code for the replacement response.
    pub status: u16,
    /// Reason phrase; the canonical phrase is used when empty.
    pub reason: String,
    /// Replacement headers.
    pub headers: Headers,
    /// Replacement body.
    pub body: Vec<u8>,
}

impl HttpError {
    pub fn new(status: u16, reason: &str) -> HttpError {
        HttpError {
            status: status,
            reason: reason.to_owned(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(status: u16, reason: &str, body: &[u8]) -> HttpError {
        HttpError {
            status: status,
            reason: reason.to_owned(),
            headers: Headers::new(),
            body: body.to_vec(),
        }
    }

    /// The status line subject for this error.
    pub fn raw_status(&self) -> RawStatus {
        if self.reason.is_empty() {
            RawStatus::from(self.status)
        } else {
            RawStatus::owned(self.status, self.reason.clone())
        }
    }

    /// The bytes to send as the replacement body.
    pub fn render(&self) -> Vec<u8> {
        if self.body.is_empty() {
            format!("{} {}", self.status, self.reason).into_bytes()
        } else {
            self.body.clone()
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

impl StdError for HttpError {}

#[cfg(test)]
mod tests {
    use super::{Error, HttpError, Phase};

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::StartLine.to_string(), "start line");
        assert_eq!(Phase::Header.to_string(), "header");
        assert_eq!(Phase::Chunk.to_string(), "body chunk");
        assert_eq!(Phase::Body.to_string(), "body");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::StartLine.status(), Some(400));
        assert_eq!(Error::Chunk.status(), Some(400));
        assert_eq!(Error::Length.status(), Some(411));
        assert_eq!(Error::Premature(Phase::Body).status(), None);
    }

    #[test]
    fn test_http_error_render() {
        let err = HttpError::new(404, "Not Found");
        assert_eq!(err.render(), b"404 Not Found");

        let err = HttpError::with_body(404, "Not Found", b"nope");
        assert_eq!(err.render(), b"nope");
    }
}
