//! # servio
//!
//! A cooperative, non-blocking HTTP/1.x server library.
//!
//! There is no event loop and no thread pool in here. The server owns a
//! non-blocking listen socket and a table of non-blocking connections, and
//! all progress happens inside [`Server::service`], which an external
//! scheduler calls once per tick. Anything that would block - an accept, a
//! read, a write, a TLS handshake step, an incomplete request head - simply
//! makes no progress this tick and is retried on the next one.
//!
//! Time is virtual: the scheduler advances a [`Clock`] and idle timers are
//! measured against it, so tests (and simulations) can run the server as
//! fast or as slow as they like.
//!
//! # Handling requests
//!
//! An application is anything implementing [`App`]: it receives a CGI-style
//! [`Environ`] and a [`Reply`] handle, declares a status and headers, and
//! returns a [`Body`] that is pumped one fragment per tick. Yielding an
//! empty fragment returns control to the loop without writing anything,
//! which lets an application interleave its own work with the server's.
//!
//! ```no_run
//! use std::time::Duration;
//! use servio::{Clock, Environ, Reply, Server};
//!
//! fn hello(_env: Environ, reply: Reply) -> std::vec::IntoIter<Vec<u8>> {
//!     reply.declare(200, vec![("Content-Type".into(), "text/plain".into())])
//!         .unwrap();
//!     vec![b"hello".to_vec()].into_iter()
//! }
//!
//! let clock = Clock::new();
//! let mut server = Server::http("127.0.0.1", 0, clock.clone(), hello).unwrap();
//! loop {
//!     server.service();
//!     clock.advance(Duration::from_millis(10));
//! }
//! ```
#[macro_use]
extern crate log;

extern crate idna;
extern crate mime;
extern crate percent_encoding;
extern crate socket2;
extern crate time;
extern crate unicase;
extern crate url;

#[cfg(feature = "ssl")]
extern crate openssl;

pub use error::{Error, HttpError, Phase, Result};
pub use clock::{Clock, Timer};
pub use header::Headers;
pub use method::Method;
pub use status::RawStatus;
pub use uri::RequestUri;
pub use version::HttpVersion;

pub use http::Request;
pub use net::{HttpListener, HttpStream, Listener, Transport};
pub use server::{App, Body, Scheme, Server, Step};
pub use server::dispatch::Environ;
pub use server::response::Reply;

#[cfg(feature = "ssl")]
pub use net::{Certify, HttpsListener, HttpsStream, TlsConfig};

pub mod clock;
pub mod error;
pub mod header;
pub mod http;
pub mod method;
pub mod net;
pub mod server;
pub mod status;
pub mod uri;
pub mod version;

#[cfg(test)]
mod mock;
