//! Server responses.
//!
//! A response is declared before it is written: the application calls
//! [`Reply::declare`] with a status and ordered headers, then emits body
//! fragments. Nothing reaches the wire until the first non-empty fragment,
//! and the writer reads the declaration *at that moment* - so an
//! application that yields empty fragments while it works may still change
//! its status and headers up to the first real write.
use std::cell::RefCell;
use std::rc::Rc;

use error::{Error, HttpError};
use header::{self, Headers};
use http::{self, Buffer, Encoder};
use status::RawStatus;

/// The `Server` header value when the application does not set one.
pub const SERVER: &str = concat!("servio/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
struct Declared {
    status: RawStatus,
    headers: Headers,
    started: bool,
    headed: bool,
    length: Option<u64>,
    evented: bool,
    pushed: Vec<Vec<u8>>,
}

/// The declaration handle shared between the application and the writer.
///
/// Clones share one underlying record: the application keeps one, the
/// writer keeps another, and the writer consults the record when it
/// finally commits the head.
#[derive(Clone, Debug)]
pub struct Reply {
    inner: Rc<RefCell<Declared>>,
}

impl Reply {
    fn new() -> Reply {
        Reply {
            inner: Rc::new(RefCell::new(Declared {
                status: RawStatus::from(200),
                headers: Headers::new(),
                started: false,
                headed: false,
                length: None,
                evented: false,
                pushed: Vec::new(),
            })),
        }
    }

    /// Declares status and headers. May be called once per response cycle;
    /// use [`Reply::redeclare`] for the error path that replaces a
    /// declaration.
    pub fn declare<S: Into<RawStatus>>(&self,
                                       status: S,
                                       headers: Vec<(String, String)>)
                                       -> ::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.started {
            return Err(Error::Declare("response already declared"));
        }
        apply(&mut inner, status.into(), Headers::from_pairs(headers));
        inner.started = true;
        Ok(())
    }

    /// Replaces an earlier declaration. Allowed only while the head is
    /// still unflushed: once committed, a response cannot change its mind.
    pub fn redeclare<S: Into<RawStatus>>(&self,
                                         status: S,
                                         headers: Vec<(String, String)>)
                                         -> ::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.headed {
            return Err(Error::Declare("headers already sent"));
        }
        apply(&mut inner, status.into(), Headers::from_pairs(headers));
        inner.started = true;
        Ok(())
    }

    /// Updates a single header before the head flushes.
    pub fn set_header(&self, name: &str, value: &str) -> ::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.headed {
            return Err(Error::Declare("headers already sent"));
        }
        inner.headers.set(name, value);
        if header::eq(name, "content-length") {
            inner.length = value.trim().parse().ok();
        }
        Ok(())
    }

    /// Updates the status before the head flushes.
    pub fn set_status<S: Into<RawStatus>>(&self, status: S) -> ::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.headed {
            return Err(Error::Declare("headers already sent"));
        }
        inner.status = status.into();
        Ok(())
    }

    /// Push-style emission: queues body bytes for the dispatcher to drain
    /// ahead of any yielded fragments. This is the "write callable" a
    /// declaration hands back.
    pub fn push(&self, data: &[u8]) -> ::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.started {
            return Err(Error::Declare("write before declaration"));
        }
        inner.pushed.push(data.to_vec());
        Ok(())
    }

    pub fn started(&self) -> bool {
        self.inner.borrow().started
    }

    pub fn headed(&self) -> bool {
        self.inner.borrow().headed
    }

    /// The declared `Content-Length`, when one was given.
    pub fn length(&self) -> Option<u64> {
        self.inner.borrow().length
    }

    /// True when the declared `Content-Type` is `text/event-stream`.
    pub fn evented(&self) -> bool {
        self.inner.borrow().evented
    }

    pub fn status(&self) -> RawStatus {
        self.inner.borrow().status.clone()
    }

    pub(crate) fn take_pushed(&self) -> Vec<Vec<u8>> {
        ::std::mem::replace(&mut self.inner.borrow_mut().pushed, Vec::new())
    }
}

fn apply(inner: &mut Declared, status: RawStatus, headers: Headers) {
    inner.status = status;
    inner.length = headers
        .get("content-length")
        .and_then(|v| v.trim().parse().ok());
    inner.evented = headers
        .get("content-type")
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false);
    inner.headers = headers;
}

/// Streams a declared response onto a connection's outbound buffer.
pub struct Responder {
    reply: Reply,
    chunkable: bool,
    chunked: bool,
    ended: bool,
    encoder: Encoder,
    emitted: u64,
}

impl Responder {
    /// `chunkable` grants permission to use chunked framing; whether it is
    /// actually used is decided when the head flushes.
    pub fn new(chunkable: bool) -> Responder {
        Responder {
            reply: Reply::new(),
            chunkable: chunkable,
            chunked: false,
            ended: false,
            encoder: Encoder::Through,
            emitted: 0,
        }
    }

    /// Another handle on the declaration, for the application.
    pub fn reply(&self) -> Reply {
        self.reply.clone()
    }

    pub fn started(&self) -> bool {
        self.reply.started()
    }

    pub fn headed(&self) -> bool {
        self.reply.headed()
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn chunked(&self) -> bool {
        self.chunked
    }

    pub fn evented(&self) -> bool {
        self.reply.evented()
    }

    /// Total body bytes emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// True once a declared content-length has been fully emitted.
    pub fn satisfied(&self) -> bool {
        match self.reply.length() {
            Some(length) => self.emitted >= length,
            None => false,
        }
    }

    /// Appends one body fragment, committing the head first if this is the
    /// first write. A declared content-length truncates overlong writes.
    pub fn write(&mut self, tx: &mut Buffer, msg: &[u8]) -> ::Result<()> {
        if !self.reply.started() {
            return Err(Error::Declare("write before declaration"));
        }
        if !self.reply.headed() {
            self.flush_head(tx);
        }
        let n = self.encoder.encode(tx, msg);
        self.emitted += n as u64;
        Ok(())
    }

    /// Ends the body. The head is committed even if nothing was written -
    /// an empty response is a valid response - and chunked framing gets its
    /// terminating zero chunk.
    pub fn end(&mut self, tx: &mut Buffer) -> ::Result<()> {
        if self.ended {
            return Ok(());
        }
        if !self.reply.started() {
            return Err(Error::Declare("ended before declaration"));
        }
        if !self.reply.headed() {
            self.flush_head(tx);
        }
        self.encoder.end(tx);
        self.ended = true;
        Ok(())
    }

    /// Replaces the declaration with a structured application error and
    /// emits it. Only possible while the head is unflushed.
    pub fn declare_error(&mut self, tx: &mut Buffer, err: &HttpError) -> ::Result<()> {
        if self.reply.headed() {
            return Err(Error::Declare("headers already sent"));
        }
        let body = err.render();
        let mut headers = err.headers.clone();
        if !headers.has("content-type") {
            headers.set("Content-Type", "text/plain");
        }
        headers.set("Content-Length", &body.len().to_string());
        {
            let mut inner = self.reply.inner.borrow_mut();
            apply(&mut inner, err.raw_status(), headers);
            inner.started = true;
        }
        self.write(tx, &body)?;
        self.end(tx)
    }

    /// Builds and commits the status line and headers, engaging chunked
    /// framing when permitted and no content-length was declared.
    fn flush_head(&mut self, tx: &mut Buffer) {
        let mut head = Vec::with_capacity(256);
        {
            let mut inner = self.reply.inner.borrow_mut();

            head.extend_from_slice(format!("HTTP/1.1 {}\r\n", inner.status).as_bytes());

            if !inner.headers.has("server") {
                let server = SERVER.to_owned();
                inner.headers.append("Server", &server);
            }
            if !inner.headers.has("date") {
                let date = http::http_date();
                inner.headers.append("Date", &date);
            }
            if self.chunkable && inner.length.is_none() &&
               !inner.headers.has("transfer-encoding") {
                self.chunked = true;
                inner.headers.append("Transfer-Encoding", "chunked");
            }

            for (name, value) in inner.headers.iter() {
                http::pack_header(&mut head, name, value);
            }
            head.extend_from_slice(http::CRLF);

            inner.headed = true;
            self.encoder = if self.chunked {
                Encoder::Chunked
            } else {
                match inner.length {
                    Some(length) => Encoder::Length(length),
                    None => Encoder::Through,
                }
            };
        }
        trace!("response head committed, {} bytes", head.len());
        tx.extend(&head);
    }
}

/// Renders a complete one-shot reply, for protocol-level failures the
/// application never sees (bad request, length required).
pub fn bare_response(status: RawStatus, body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(128 + body.len());
    msg.extend_from_slice(format!("HTTP/1.1 {}\r\n", status).as_bytes());
    http::pack_header(&mut msg, "Server", SERVER);
    http::pack_header(&mut msg, "Date", &http::http_date());
    http::pack_header(&mut msg, "Content-Type", "text/plain");
    http::pack_header(&mut msg, "Content-Length", &body.len().to_string());
    http::pack_header(&mut msg, "Connection", "close");
    msg.extend_from_slice(http::CRLF);
    msg.extend_from_slice(body);
    msg
}

#[cfg(test)]
mod tests {
    use error::HttpError;
    use http::Buffer;
    use status::RawStatus;

    use super::{bare_response, Responder};

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|&(n, v)| (n.to_owned(), v.to_owned())).collect()
    }

    fn lines(buf: &Buffer) -> Vec<String> {
        String::from_utf8_lossy(buf.bytes())
            .split("\r\n")
            .map(|s| s.to_owned())
            .collect()
    }

    #[test]
    fn test_head_defaults_and_chunking() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(true);
        responder.reply()
            .declare(200, headers(&[("Content-Type", "text/plain")]))
            .unwrap();
        responder.write(&mut tx, b"hello").unwrap();
        responder.end(&mut tx).unwrap();

        let lines = lines(&tx);
        assert_eq!(lines[0], "HTTP/1.1 200 OK");
        assert_eq!(lines[1], "Content-Type: text/plain");
        assert!(lines[2].starts_with("Server: servio/"));
        assert!(lines[3].starts_with("Date: "));
        assert_eq!(lines[4], "Transfer-Encoding: chunked");
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], "5");
        assert_eq!(lines[7], "hello");
        assert_eq!(lines[8], "0");
        assert!(responder.ended());
    }

    #[test]
    fn test_declared_length_disables_chunking_and_truncates() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(true);
        responder.reply()
            .declare(200, headers(&[("Content-Length", "4")]))
            .unwrap();
        responder.write(&mut tx, b"toolong").unwrap();
        assert!(!responder.chunked());
        assert!(responder.satisfied());
        assert_eq!(responder.emitted(), 4);
        responder.end(&mut tx).unwrap();

        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.ends_with("\r\n\r\ntool"), "unexpected wire: {:?}", text);
        assert!(!text.contains("Transfer-Encoding"));
    }

    #[test]
    fn test_not_chunkable_without_length_is_through() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(false);
        responder.reply().declare(200, vec![]).unwrap();
        responder.write(&mut tx, b"raw").unwrap();
        responder.end(&mut tx).unwrap();
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.ends_with("\r\n\r\nraw"));
        assert!(!text.contains("Transfer-Encoding"));
    }

    #[test]
    fn test_double_declare_is_error() {
        let responder = Responder::new(true);
        let reply = responder.reply();
        reply.declare(200, vec![]).unwrap();
        assert!(reply.declare(200, vec![]).is_err());
        // but the error path may replace it before the head goes out
        assert!(reply.redeclare(500, vec![]).is_ok());
    }

    #[test]
    fn test_deferred_override_until_first_write() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(true);
        let reply = responder.reply();
        reply.declare(200, headers(&[("Content-Type", "text/plain")])).unwrap();

        // empty fragments have gone by; the app changes its mind
        reply.set_status(404).unwrap();
        reply.set_header("Content-Type", "text/html").unwrap();

        responder.write(&mut tx, b"<p>gone</p>").unwrap();
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Type: text/html"));

        // too late now
        assert!(reply.set_status(200).is_err());
    }

    #[test]
    fn test_write_before_declare_is_error() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(true);
        assert!(responder.write(&mut tx, b"x").is_err());
    }

    #[test]
    fn test_end_without_writes_is_valid_empty_response() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(true);
        responder.reply().declare(204, vec![]).unwrap();
        responder.end(&mut tx).unwrap();
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        // chunked framing closes with just the terminator
        assert!(text.ends_with("\r\n\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_declare_error_pre_head() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(true);
        responder.reply().declare(200, vec![]).unwrap();
        let err = HttpError::with_body(404, "Not Found", b"nope");
        responder.declare_error(&mut tx, &err).unwrap();

        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\nnope"));
        assert!(responder.ended());
    }

    #[test]
    fn test_declare_error_post_head_refused() {
        let mut tx = Buffer::new();
        let mut responder = Responder::new(true);
        responder.reply().declare(200, vec![]).unwrap();
        responder.write(&mut tx, b"body underway").unwrap();
        let err = HttpError::new(500, "Too Late");
        assert!(responder.declare_error(&mut tx, &err).is_err());
    }

    #[test]
    fn test_push_requires_declaration() {
        let responder = Responder::new(true);
        let reply = responder.reply();
        assert!(reply.push(b"early").is_err());
        reply.declare(200, vec![]).unwrap();
        reply.push(b"one").unwrap();
        reply.push(b"two").unwrap();
        let pushed = reply.take_pushed();
        assert_eq!(pushed, vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(reply.take_pushed().is_empty());
    }

    #[test]
    fn test_evented_flag() {
        let responder = Responder::new(true);
        responder.reply()
            .declare(200, headers(&[("Content-Type", "text/event-stream")]))
            .unwrap();
        assert!(responder.evented());
    }

    #[test]
    fn test_bare_response() {
        let msg = bare_response(RawStatus::from(411), b"length required");
        let text = String::from_utf8_lossy(&msg).into_owned();
        assert!(text.starts_with("HTTP/1.1 411 Length Required\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Content-Length: 15\r\n"));
        assert!(text.ends_with("\r\n\r\nlength required"));
    }
}
