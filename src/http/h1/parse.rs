//! A resumable HTTP/1.x request parser.
//!
//! The parser is an explicit state machine over a connection's inbound
//! [`Buffer`]. Each call to [`Parser::step`] makes as much progress as the
//! buffered bytes allow, trims what it consumed, and returns
//! `ParseStep::NeedMore` when it runs dry - so the serve loop can move on
//! and call again once more bytes arrive. Input line endings may be CRLF or
//! bare LF.
use std::mem;

use mime::{self, Mime};

use error::{Error, Phase};
use http::{Buffer, Request};
use uri::RequestUri;
use version::HttpVersion;

/// Largest head section (start line plus headers) the parser will buffer
/// before rejecting the request.
const MAX_HEAD_SIZE: usize = 8192 + 4096 * 100;

/// Outcome of one parser step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseStep {
    /// More bytes are needed before further progress.
    NeedMore,
    /// A complete request is ready to [`Parser::take`].
    Complete,
}

#[derive(Clone, Copy, Debug)]
enum State {
    StartLine,
    Headers,
    Body,
    ChunkSize,
    ChunkData(usize),
    Trailers,
    Done,
}

/// Resumable request parser.
#[derive(Debug)]
pub struct Parser {
    state: State,
    request: Request,
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            state: State::StartLine,
            request: Request::default(),
        }
    }

    /// The request being built. Flags on it (`headed`, `ended`) tell how
    /// far along it is.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// True while a request is partway through parsing.
    pub fn mid_request(&self) -> bool {
        match self.state {
            State::StartLine | State::Done => false,
            _ => true,
        }
    }

    /// Takes the completed request. The parser stays parked until
    /// [`Parser::reset`] re-arms it.
    pub fn take(&mut self) -> Request {
        debug_assert!(self.request.ended, "take() before request ended");
        mem::replace(&mut self.request, Request::default())
    }

    /// Re-arms for the next request on a persistent connection.
    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.request = Request::default();
    }

    /// Advances the state machine over the buffered bytes.
    ///
    /// `cutoff` is the owning connection's cutoff flag: when the peer is
    /// gone and the machine still needs bytes, the result is
    /// `Error::Premature` naming the phase that starved.
    pub fn step(&mut self, rx: &mut Buffer, cutoff: bool) -> ::Result<ParseStep> {
        loop {
            match self.state {
                State::StartLine => {
                    let line = match self.head_line(rx, cutoff)? {
                        Some(line) => line,
                        None => return Ok(ParseStep::NeedMore),
                    };
                    self.parse_start_line(&line)?;
                    self.state = State::Headers;
                }
                State::Headers => {
                    let line = match self.head_line(rx, cutoff)? {
                        Some(line) => line,
                        None => return Ok(ParseStep::NeedMore),
                    };
                    if line.is_empty() {
                        self.finish_head()?;
                    } else {
                        parse_header_line(&mut self.request.headers, &line)?;
                    }
                }
                State::Body => {
                    // finish_head guarantees a concrete length here
                    let length = self.request.length.unwrap_or(0) as usize;
                    if rx.len() < length {
                        self.starved(cutoff)?;
                        return Ok(ParseStep::NeedMore);
                    }
                    self.request.body = rx.take(length);
                    self.finish();
                }
                State::ChunkSize => {
                    let line = match take_line(rx) {
                        Some(line) => line,
                        None => {
                            self.starved(cutoff)?;
                            return Ok(ParseStep::NeedMore);
                        }
                    };
                    let size = self.parse_chunk_size(&line)?;
                    trace!("chunk size={}", size);
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::ChunkData(size)
                    };
                }
                State::ChunkData(size) => {
                    // the chunk data must be followed by its own line ending
                    let eol = match rx.bytes().get(size) {
                        None => {
                            self.starved(cutoff)?;
                            return Ok(ParseStep::NeedMore);
                        }
                        Some(&b'\n') => 1,
                        Some(&b'\r') => match rx.bytes().get(size + 1) {
                            None => {
                                self.starved(cutoff)?;
                                return Ok(ParseStep::NeedMore);
                            }
                            Some(&b'\n') => 2,
                            Some(_) => return Err(Error::Chunk),
                        },
                        Some(_) => return Err(Error::Chunk),
                    };
                    let data = rx.take(size);
                    rx.consume(eol);
                    self.request.body.extend_from_slice(&data);
                    self.state = State::ChunkSize;
                }
                State::Trailers => {
                    let line = match take_line(rx) {
                        Some(line) => line,
                        None => {
                            self.starved(cutoff)?;
                            return Ok(ParseStep::NeedMore);
                        }
                    };
                    if line.is_empty() {
                        self.finish();
                    } else {
                        parse_header_line(&mut self.request.trails, &line)?;
                    }
                }
                State::Done => return Ok(ParseStep::Complete),
            }
        }
    }

    /// Pulls one head-section line, enforcing the head size cap.
    fn head_line(&mut self, rx: &mut Buffer, cutoff: bool) -> ::Result<Option<String>> {
        match take_line(rx) {
            Some(line) => Ok(Some(line)),
            None => {
                if rx.len() > MAX_HEAD_SIZE {
                    return Err(Error::TooLarge);
                }
                self.starved(cutoff)?;
                Ok(None)
            }
        }
    }

    /// Errors out when the peer is gone but more bytes were needed.
    fn starved(&self, cutoff: bool) -> ::Result<()> {
        if cutoff {
            Err(Error::Premature(self.phase()))
        } else {
            Ok(())
        }
    }

    fn phase(&self) -> Phase {
        match self.state {
            State::StartLine => Phase::StartLine,
            State::Headers => Phase::Header,
            State::ChunkSize | State::ChunkData(..) | State::Trailers => Phase::Chunk,
            State::Body | State::Done => Phase::Body,
        }
    }

    fn parse_start_line(&mut self, line: &str) -> ::Result<()> {
        let mut words = line.split_whitespace();
        let (method, target, version) =
            match (words.next(), words.next(), words.next(), words.next()) {
                (Some(m), Some(t), Some(v), None) => (m, t, v),
                _ => return Err(Error::StartLine),
            };

        self.request.method = method.parse()?;

        if !version.starts_with("HTTP/1.") {
            return Err(Error::Version);
        }
        // HTTP/1.x with x >= 1 is spoken as 1.1
        self.request.version = if version == "HTTP/1.0" {
            HttpVersion::Http10
        } else {
            HttpVersion::Http11
        };

        self.request.url = target.to_owned();
        let uri: RequestUri = target.parse()?;
        let split = uri.split();
        self.request.path = split.path;
        self.request.scheme = split.scheme;
        self.request.host = split.host;
        self.request.port = split.port;
        self.request.query = split.query;
        self.request.fragment = split.fragment;

        debug!("request line: {} {} {}", self.request.method, self.request.url,
               self.request.version);
        Ok(())
    }

    /// Applies the header-derived framing rules once the blank line arrives.
    fn finish_head(&mut self) -> ::Result<()> {
        {
            let req = &mut self.request;

            let chunked = req.headers
                .get("transfer-encoding")
                .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false);
            req.chunked = chunked;

            // RFC 7230 section 3.3.3: Content-Length is void when chunked.
            // Negative and malformed lengths reduce to unset here, which the
            // body phase rejects.
            req.length = if chunked {
                None
            } else {
                match req.headers.get("content-length") {
                    Some(v) => match v.trim().parse::<i64>() {
                        Ok(n) if n >= 0 => Some(n as u64),
                        Ok(_) | Err(_) => None,
                    },
                    None => Some(0),
                }
            };

            if let Some(ctype) = req.headers.get("content-type") {
                if let Ok(m) = ctype.parse::<Mime>() {
                    if let Some(charset) = m.get_param(mime::CHARSET) {
                        req.encoding = Some(charset.as_str().to_owned());
                    }
                    req.jsoned = m.essence_str() == "application/json";
                }
            }

            req.headed = true;
        }
        self.check_persisted();

        self.state = if self.request.chunked {
            State::ChunkSize
        } else if self.request.length.is_some() {
            State::Body
        } else {
            return Err(Error::Length);
        };
        Ok(())
    }

    /// Derives whether the connection should stay open after the response.
    fn check_persisted(&mut self) {
        let req = &mut self.request;
        req.persisted = match req.version {
            HttpVersion::Http11 => {
                if req.headers.value_contains("connection", "close") {
                    false
                } else {
                    // a persistent connection needs determinate framing
                    req.chunked || req.length.is_some()
                }
            }
            HttpVersion::Http10 => {
                req.headers.value_contains("connection", "keep-alive")
            }
        };
    }

    fn parse_chunk_size(&mut self, line: &str) -> ::Result<usize> {
        let mut parts = line.split(';');
        let size_tok = parts.next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_tok, 16).map_err(|_| Error::Chunk)?;
        for ext in parts {
            let (name, value) = match ext.find('=') {
                Some(idx) => (ext[..idx].trim(), ext[idx + 1..].trim()),
                None => (ext.trim(), ""),
            };
            if !name.is_empty() {
                self.request.parms.insert(name.to_owned(), value.to_owned());
            }
        }
        Ok(size)
    }

    fn finish(&mut self) {
        let req = &mut self.request;
        req.length = Some(req.body.len() as u64);
        req.bodied = true;
        req.ended = true;
        self.state = State::Done;
        trace!("request complete, body {} bytes", req.body.len());
    }
}

/// Removes one line from the head of the buffer, accepting CRLF or LF.
fn take_line(rx: &mut Buffer) -> Option<String> {
    let idx = rx.bytes().iter().position(|&b| b == b'\n')?;
    let mut line = rx.take(idx + 1);
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Parses one header (or trailer) line into `headers`. A line starting with
/// whitespace folds onto the previous field.
fn parse_header_line(headers: &mut ::header::Headers, line: &str) -> ::Result<()> {
    if line.starts_with(' ') || line.starts_with('\t') {
        if headers.extend_last(line.trim()) {
            return Ok(());
        }
        return Err(Error::Header);
    }
    let idx = line.find(':').ok_or(Error::Header)?;
    let name = &line[..idx];
    if name.is_empty() || name.contains(' ') || name.contains('\t') {
        return Err(Error::Header);
    }
    headers.append(name, line[idx + 1..].trim());
    Ok(())
}
