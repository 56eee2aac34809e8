//! HTTP Server
//!
//! # Server
//!
//! A `Server` binds a non-blocking listener, parses HTTP requests, and
//! hands them to an [`App`]. It never blocks and owns no threads: all
//! progress happens inside [`Server::service`], which an external scheduler
//! calls once per tick, advancing the shared `Clock` in between.
//!
//! Per tick, in order: new connections are accepted (and TLS handshakes
//! advanced), dead and idle connections are reaped, every connection gets
//! one receive pass, request parsers advance, outstanding responses are
//! pumped one fragment each, and every connection gets one send pass.
//!
//! # Handling requests
//!
//! An application is a callable taking a CGI-style [`Environ`] and a
//! [`Reply`] declaration handle, returning a lazily-pumped [`Body`]:
//!
//! ```no_run
//! use servio::{Clock, Environ, Reply, Server};
//!
//! fn app(env: Environ, reply: Reply) -> std::vec::IntoIter<Vec<u8>> {
//!     reply.declare(200, vec![("Content-Type".into(), "text/plain".into())])
//!         .unwrap();
//!     let who = env.get("QUERY_STRING").unwrap_or("world").to_owned();
//!     vec![format!("hello {}", who).into_bytes()].into_iter()
//! }
//!
//! let clock = Clock::new();
//! let mut server = Server::http("", 8080, clock.clone(), app).unwrap();
//! loop {
//!     server.service();
//!     clock.advance(std::time::Duration::from_millis(5));
//! }
//! ```
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use std::vec;

use clock::Clock;
use error::HttpError;
use http::{ParseStep, Parser};
use net::{HttpListener, Listener, Transport};
use status::RawStatus;
use version::HttpVersion;

pub use self::conn::{Connection, Recv};
pub use self::dispatch::Environ;
pub use self::response::{Reply, Responder};

use self::dispatch::{build_environ, Dispatcher};
use self::response::bare_response;

#[cfg(feature = "ssl")]
use net::{HttpsListener, TlsConfig};

pub mod conn;
pub mod dispatch;
pub mod response;

/// Default idle timeout for fresh connections.
const TIMEOUT: Duration = Duration::from_secs(5);
/// Default per-read buffer and socket buffer sizing.
const BUFSIZE: usize = 8096;

/// The scheme a server speaks, as reported to applications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match *self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// One step of a response body.
pub enum Step {
    /// A body fragment. An empty fragment yields control to the loop
    /// without writing anything.
    Chunk(Vec<u8>),
    /// The body is complete.
    End,
    /// Replace the response with a structured HTTP error (only effective
    /// before the head is on the wire).
    Error(HttpError),
    /// The application failed; the connection will be closed.
    Fail(Box<dyn StdError>),
}

/// A lazily-pumped response body: the explicit-iterator shape of a
/// generator, advanced one step per tick.
pub trait Body {
    fn next(&mut self) -> Step;
}

/// Literal bodies: a vector of fragments, yielded in order.
impl Body for vec::IntoIter<Vec<u8>> {
    fn next(&mut self) -> Step {
        match Iterator::next(self) {
            Some(chunk) => Step::Chunk(chunk),
            None => Step::End,
        }
    }
}

/// An application: receives the request environment and a declaration
/// handle, returns the response body.
pub trait App {
    type Body: Body;
    fn call(&mut self, environ: Environ, reply: Reply) -> Self::Body;
}

impl<F, B> App for F
    where F: FnMut(Environ, Reply) -> B,
          B: Body
{
    type Body = B;

    fn call(&mut self, environ: Environ, reply: Reply) -> B {
        self(environ, reply)
    }
}

/// Connection identity: the peer address plus a per-accept sequence
/// number, so a peer address reused out of TIME_WAIT cannot collide with
/// the connection it replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnId {
    pub peer: SocketAddr,
    pub seq: u64,
}

struct Channel<T: Transport, B> {
    conn: Connection<T>,
    parser: Parser,
    exchange: Option<Dispatcher<B>>,
    closing: bool,
}

/// A cooperative HTTP/1.x server over any [`Listener`].
pub struct Server<A: App, L: Listener = HttpListener> {
    name: String,
    scheme: Scheme,
    app: A,
    listener: L,
    clock: Clock,
    timeout: Duration,
    bufsize: usize,
    seq: u64,
    channels: BTreeMap<ConnId, Channel<L::Stream, A::Body>>,
}

impl<A: App> Server<A, HttpListener> {
    /// Binds a plain-HTTP server. An empty host listens on every
    /// interface.
    pub fn http(host: &str, port: u16, clock: Clock, app: A)
                -> ::Result<Server<A, HttpListener>> {
        let listener = HttpListener::bind(host, port, BUFSIZE)?;
        Ok(Server::new("servio.server", Scheme::Http, listener, clock, app))
    }
}

#[cfg(feature = "ssl")]
impl<A: App> Server<A, HttpsListener> {
    /// Binds an HTTPS server whose TLS handshakes are driven inside the
    /// serve loop.
    pub fn https(host: &str, port: u16, clock: Clock, app: A, config: &TlsConfig)
                 -> ::Result<Server<A, HttpsListener>> {
        let listener = HttpsListener::bind(host, port, BUFSIZE, config)?;
        Ok(Server::new("servio.server", Scheme::Https, listener, clock, app))
    }
}

impl<A: App, L: Listener> Server<A, L> {
    /// Wraps an already-bound listener.
    pub fn new(name: &str, scheme: Scheme, listener: L, clock: Clock, app: A)
               -> Server<A, L> {
        Server {
            name: name.to_owned(),
            scheme: scheme,
            app: app,
            listener: listener,
            clock: clock,
            timeout: TIMEOUT,
            bufsize: BUFSIZE,
            seq: 0,
            channels: BTreeMap::new(),
        }
    }

    /// Sets the idle timeout applied to newly accepted connections.
    /// Zero disables idle reaping.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Open connections right now.
    pub fn connections(&self) -> usize {
        self.channels.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.channels.keys().cloned().collect()
    }

    /// True when no request is partway through parsing, no inbound bytes
    /// are waiting, and no response is outstanding.
    pub fn idle(&self) -> bool {
        self.channels.values().all(|ch| {
            ch.exchange.is_none() && !ch.parser.mid_request() &&
            ch.conn.inbound().is_empty()
        })
    }

    /// Queues raw bytes onto one connection's outbound buffer. Returns
    /// false when the connection is gone.
    pub fn transmit(&mut self, id: ConnId, data: &[u8]) -> bool {
        match self.channels.get_mut(&id) {
            Some(ch) => {
                ch.conn.transmit(data);
                true
            }
            None => false,
        }
    }

    /// One tick of the serve loop.
    pub fn service(&mut self) {
        self.service_connects();
        self.service_receives();
        self.service_requests();
        self.service_responses();
        self.service_sends();
    }

    /// Closes the listener and every connection, each with one final
    /// best-effort flush.
    pub fn close(&mut self) {
        self.listener.close();
        for id in self.connection_ids() {
            self.close_channel(id);
        }
    }

    /// Step 1: adopt newly-ready connections, then reap the dead - cutoff
    /// peers, expired idle timers, and drained connections that finished a
    /// non-persistent response.
    fn service_connects(&mut self) {
        for (stream, peer) in self.listener.service_connects() {
            let local = stream.local_addr()
                .unwrap_or_else(|_| self.listener.local_addr());
            let conn = Connection::new(stream, local, peer, self.clock.clone(),
                                       self.timeout, self.bufsize);
            let id = ConnId { peer: peer, seq: self.seq };
            self.seq += 1;
            debug!("connection {} open (#{})", peer, id.seq);
            self.channels.insert(id, Channel {
                conn: conn,
                parser: Parser::new(),
                exchange: None,
                closing: false,
            });
        }

        let dead: Vec<ConnId> = self.channels
            .iter()
            .filter(|&(_, ch)| {
                ch.conn.is_cutoff() || ch.conn.expired() ||
                (ch.closing && ch.conn.outbound().is_empty())
            })
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            self.close_channel(id);
        }
    }

    /// Step 3: one receive pass per connection.
    fn service_receives(&mut self) {
        let mut dead = Vec::new();
        for (&id, ch) in self.channels.iter_mut() {
            if let Err(e) = ch.conn.service_receives() {
                error!("closing incoming socket on {}: {}", id.peer, e);
                dead.push(id);
            }
        }
        for id in dead {
            self.close_channel(id);
        }
    }

    /// Step 4: advance the parser of every connection with no outstanding
    /// response; completed requests get an environment and a dispatcher.
    /// Requests on a persistent connection stay strictly sequential - the
    /// parser does not run while a response is outstanding.
    fn service_requests(&mut self) {
        for id in self.connection_ids() {
            let result = match self.channels.get_mut(&id) {
                Some(ch) => {
                    if ch.exchange.is_some() || ch.closing {
                        continue;
                    }
                    let cutoff = ch.conn.is_cutoff();
                    let step = ch.parser.step(ch.conn.inbound_mut(), cutoff);
                    match step {
                        Ok(ParseStep::NeedMore) => {
                            // keep-alive heads disable idle reaping as soon
                            // as they parse, before the body finishes
                            if ch.parser.request().headed &&
                               ch.parser.request().persisted {
                                ch.conn.set_timeout(Duration::from_secs(0));
                            }
                            Ok(())
                        }
                        Ok(ParseStep::Complete) => {
                            let request = ch.parser.take();
                            if request.persisted {
                                ch.conn.set_timeout(Duration::from_secs(0));
                            }
                            info!("request {} {} {} from {}", request.method,
                                  request.url, request.version, id.peer);
                            let chunkable = request.version >= HttpVersion::Http11;
                            let environ = build_environ(&self.name,
                                                        self.scheme,
                                                        self.listener.external_addr(),
                                                        ch.conn.peer_addr(),
                                                        &request);
                            ch.exchange = Some(Dispatcher::new(environ,
                                                               chunkable,
                                                               request.persisted));
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                None => continue,
            };

            if let Err(e) = result {
                match e.status() {
                    Some(code) => {
                        // parse failures that can still be answered: 400s
                        // and 411, one-shot then drain and close
                        error!("bad request from {}: {}", id.peer, e);
                        if let Some(ch) = self.channels.get_mut(&id) {
                            let msg = bare_response(RawStatus::from(code),
                                                    e.to_string().as_bytes());
                            ch.conn.transmit(&msg);
                            ch.closing = true;
                        }
                    }
                    None => {
                        error!("closing connection {}: {}", id.peer, e);
                        self.close_channel(id);
                    }
                }
            }
        }
    }

    /// Step 5: pump every outstanding response one fragment. When one
    /// ends: persistent connections re-arm their parser, the rest drain
    /// and close.
    fn service_responses(&mut self) {
        enum Outcome {
            Busy,
            Finished(bool),
            Failed,
        }

        for id in self.connection_ids() {
            let outcome = match self.channels.get_mut(&id) {
                Some(ch) => {
                    let app = &mut self.app;
                    match ch.exchange {
                        Some(ref mut exchange) => {
                            match exchange.service(app, ch.conn.outbound_mut()) {
                                Ok(()) => {
                                    if exchange.ended() {
                                        Outcome::Finished(exchange.persisted())
                                    } else {
                                        Outcome::Busy
                                    }
                                }
                                Err(e) => {
                                    error!("unexpected server error on {}: {}",
                                           id.peer, e);
                                    Outcome::Failed
                                }
                            }
                        }
                        None => continue,
                    }
                }
                None => continue,
            };

            match outcome {
                Outcome::Busy => {}
                Outcome::Failed => self.close_channel(id),
                Outcome::Finished(persisted) => {
                    let drained = match self.channels.get_mut(&id) {
                        Some(ch) => {
                            ch.exchange = None;
                            if persisted {
                                ch.parser.reset();
                                continue;
                            }
                            ch.closing = true;
                            ch.conn.outbound().is_empty()
                        }
                        None => continue,
                    };
                    // already drained: no reason to wait a tick
                    if drained {
                        self.close_channel(id);
                    }
                }
            }
        }
    }

    /// Step 6: one send pass per connection.
    fn service_sends(&mut self) {
        let mut dead = Vec::new();
        for (&id, ch) in self.channels.iter_mut() {
            if let Err(e) = ch.conn.service_sends() {
                error!("closing outgoing socket on {}: {}", id.peer, e);
                dead.push(id);
            }
        }
        for id in dead {
            self.close_channel(id);
        }
    }

    /// Removes one connection: terminates a half-written chunked response,
    /// flushes what it can, shuts the socket down.
    fn close_channel(&mut self, id: ConnId) {
        if let Some(mut ch) = self.channels.remove(&id) {
            if let Some(ref mut exchange) = ch.exchange {
                exchange.close(ch.conn.outbound_mut());
            }
            let _ = ch.conn.service_sends();
            ch.conn.close();
            debug!("connection {} closed (#{})", id.peer, id.seq);
        }
    }
}
