//! Transports and listeners.
//!
//! Everything here is non-blocking. A listener drains its OS accept queue
//! each tick; a transport's reads and writes return `WouldBlock` instead of
//! waiting. Nothing registers interest anywhere - the serve loop simply
//! retries next tick.
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use error::Error;

#[cfg(feature = "ssl")]
pub use self::ssl::{Certify, HttpsListener, HttpsStream, TlsConfig};

/// A non-blocking byte-duplex endpoint: a plain or TLS-wrapped socket.
pub trait Transport: Read + Write {
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
}

/// Whether an I/O error kind means the transport is unusable.
///
/// This is the reset/unreachable/down/timed-out class: the connection gets
/// its cutoff flag and is reaped once its outbound buffer has drained or
/// proven undeliverable.
pub fn fatal(kind: io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    match kind {
        ConnectionReset | ConnectionAborted | ConnectionRefused | NotConnected |
        BrokenPipe | TimedOut | UnexpectedEof | NetworkDown | NetworkUnreachable |
        HostUnreachable => true,
        _ => false,
    }
}

/// A non-blocking listening endpoint producing ready-to-serve streams.
pub trait Listener {
    type Stream: Transport;

    /// Drains the OS accept queue into the pending set, until the OS
    /// reports "would block".
    fn service_accepts(&mut self);

    /// Converts pending connections into ready streams. The TLS variant
    /// also advances every staged handshake one non-blocking step,
    /// promoting completed ones and discarding aborted ones.
    fn service_connects(&mut self) -> Vec<(Self::Stream, SocketAddr)>;

    /// The resolved local address of the listen socket.
    fn local_addr(&self) -> SocketAddr;

    /// The normalized external `(host, port)` for this listener, as handed
    /// to applications and TLS.
    fn external_addr(&self) -> (&str, u16);

    fn close(&mut self);
}

/// A plain TCP listener.
#[derive(Debug)]
pub struct HttpListener {
    inner: Option<TcpListener>,
    addr: SocketAddr,
    external: (String, u16),
    host: String,
    port: u16,
    bufsize: usize,
    axes: VecDeque<(TcpStream, SocketAddr)>,
}

impl HttpListener {
    /// Binds a non-blocking listen socket. An empty host means every
    /// interface. Bind failures are fatal - there is no listener to serve
    /// without.
    pub fn bind(host: &str, port: u16, bufsize: usize) -> ::Result<HttpListener> {
        let listener = open(host, port, bufsize)?;
        let addr = listener.local_addr()?;
        info!("listening on {}", addr);
        Ok(HttpListener {
            inner: Some(listener),
            addr: addr,
            external: (normalize_host(host), addr.port()),
            host: host.to_owned(),
            port: port,
            bufsize: bufsize,
            axes: VecDeque::new(),
        })
    }

    /// Idempotently closes and re-binds the listen socket.
    pub fn reopen(&mut self) -> ::Result<()> {
        self.close();
        let listener = open(&self.host, self.port, self.bufsize)?;
        self.addr = listener.local_addr()?;
        self.external.1 = self.addr.port();
        self.inner = Some(listener);
        Ok(())
    }

    /// The actual `(send, receive)` socket buffer sizes the OS granted.
    pub fn actual_buf_sizes(&self) -> io::Result<(usize, usize)> {
        match self.inner {
            Some(ref listener) => {
                let sock = SockRef::from(listener);
                Ok((sock.send_buffer_size()?, sock.recv_buffer_size()?))
            }
            None => Ok((0, 0)),
        }
    }

    fn accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let listener = match self.inner {
            Some(ref listener) => listener,
            None => return Ok(None),
        };
        match listener.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Pops every queued accept that passes address validation, re-marked
    /// non-blocking. Failures are logged and the socket is skipped.
    fn take_validated(&mut self) -> Vec<(TcpStream, SocketAddr)> {
        let listen_port = self.addr.port();
        let mut ready = Vec::new();
        while let Some((stream, peer)) = self.axes.pop_front() {
            if let Err(e) = validate(&stream, peer, listen_port) {
                error!("rejecting accepted socket from {}: {}", peer, e);
                continue;
            }
            // accept does not reliably inherit non-blocking mode
            if let Err(e) = stream.set_nonblocking(true) {
                error!("cannot mark accepted socket from {} non-blocking: {}", peer, e);
                continue;
            }
            ready.push((stream, peer));
        }
        ready
    }
}

impl Listener for HttpListener {
    type Stream = HttpStream;

    fn service_accepts(&mut self) {
        loop {
            match self.accept() {
                Ok(Some((stream, peer))) => {
                    trace!("accepted connection from {}", peer);
                    self.axes.push_back((stream, peer));
                }
                Ok(None) => break,
                Err(e) => {
                    error!("accept error on {}: {}", self.addr, e);
                    break;
                }
            }
        }
    }

    fn service_connects(&mut self) -> Vec<(HttpStream, SocketAddr)> {
        self.service_accepts();
        self.take_validated()
            .into_iter()
            .map(|(stream, peer)| (HttpStream(stream), peer))
            .collect()
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn external_addr(&self) -> (&str, u16) {
        (&self.external.0, self.external.1)
    }

    fn close(&mut self) {
        self.inner.take();
        self.axes.clear();
    }
}

/// A plain TCP stream.
#[derive(Debug)]
pub struct HttpStream(pub TcpStream);

impl Read for HttpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for HttpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Transport for HttpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.0.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.0.shutdown(how)
    }
}

fn open(host: &str, port: u16, bufsize: usize) -> ::Result<TcpListener> {
    let bind_host = if host.is_empty() { "0.0.0.0" } else { host };
    let addr = (bind_host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::AddrNotAvailable,
                                     "listen host resolves to no address"))
        })?;

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // reuse local addresses still in TIME_WAIT
    socket.set_reuse_address(true)?;

    // Linux reports back twice the size that was set
    let reported = if cfg!(target_os = "linux") { bufsize * 2 } else { bufsize };
    if socket.send_buffer_size()? < reported {
        socket.set_send_buffer_size(bufsize)?;
    }
    if socket.recv_buffer_size()? < reported {
        socket.set_recv_buffer_size(bufsize)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(5)?;
    Ok(socket.into())
}

/// Any-interface hosts become a concrete loopback name, usable as the
/// external-facing address for TLS and the application environment.
fn normalize_host(host: &str) -> String {
    match host {
        "" | "0.0.0.0" => "127.0.0.1".to_owned(),
        "::" | "0:0:0:0:0:0:0:0" => "::1".to_owned(),
        other => other.to_owned(),
    }
}

/// Defends against an accept queue handing back a socket that does not
/// match its advertised addresses.
fn validate(stream: &TcpStream, peer: SocketAddr, listen_port: u16) -> io::Result<()> {
    let observed = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if observed != peer || local.port() != listen_port {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("addresses malformed for peer: {} != {} or port {} != {}",
                    peer, observed, listen_port, local.port()),
        ));
    }
    Ok(())
}

#[cfg(feature = "ssl")]
mod ssl {
    use std::io::{self, Read, Write};
    use std::mem;
    use std::net::{Shutdown, SocketAddr, TcpStream};
    use std::path::PathBuf;

    use openssl::ssl::{HandshakeError, MidHandshakeSslStream, Ssl, SslContext,
                       SslContextBuilder, SslFiletype, SslMethod, SslOptions,
                       SslStream, SslVerifyMode, SslVersion};

    use super::{HttpListener, Listener, Transport};

    /// Client certificate requirements.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Certify {
        None,
        Optional,
        Required,
    }

    /// TLS listener options: a prebuilt context, or the pieces to build a
    /// hardened one.
    #[derive(Default)]
    pub struct TlsConfig {
        /// Use this context as-is instead of building one.
        pub context: Option<SslContext>,
        /// Minimum protocol version for a built context.
        pub version: Option<SslVersion>,
        /// Client certificate requirement; `Required` when unset.
        pub certify: Option<Certify>,
        /// Server private key (PEM).
        pub key_path: Option<PathBuf>,
        /// Server certificate chain (PEM).
        pub cert_path: Option<PathBuf>,
        /// CA bundle used to verify client certificates.
        pub ca_file_path: Option<PathBuf>,
    }

    /// Builds the server-side TLS context.
    ///
    /// Unless a prebuilt context is supplied: SSLv2/v3 off, compression off
    /// (CRIME), server cipher preference, single-use DH/ECDH keys for
    /// forward secrecy, a restricted cipher list, and client verification
    /// required by default.
    pub fn server_context(config: &TlsConfig) -> ::Result<SslContext> {
        if let Some(ref context) = config.context {
            return Ok(context.clone());
        }

        let mut builder = SslContextBuilder::new(SslMethod::tls_server())?;
        builder.set_options(SslOptions::NO_SSLV2 | SslOptions::NO_SSLV3 |
                            SslOptions::NO_COMPRESSION |
                            SslOptions::CIPHER_SERVER_PREFERENCE |
                            SslOptions::SINGLE_DH_USE | SslOptions::SINGLE_ECDH_USE);
        if let Some(version) = config.version {
            builder.set_min_proto_version(Some(version))?;
        }

        let certify = config.certify.unwrap_or(Certify::Required);
        builder.set_verify(match certify {
            Certify::None => SslVerifyMode::NONE,
            Certify::Optional => SslVerifyMode::PEER,
            Certify::Required => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        });

        builder.set_cipher_list("HIGH:!aNULL:!eNULL:!EXPORT:!DES:!RC4:!MD5:!PSK:!SRP")?;

        if let Some(ref ca) = config.ca_file_path {
            builder.set_ca_file(ca)?;
        } else if certify != Certify::None {
            builder.set_default_verify_paths()?;
        }
        if let Some(ref cert) = config.cert_path {
            builder.set_certificate_chain_file(cert)?;
        }
        if let Some(ref key) = config.key_path {
            builder.set_private_key_file(key, SslFiletype::PEM)?;
        }

        Ok(builder.build())
    }

    /// A TCP listener whose accepted sockets are TLS-wrapped, with the
    /// handshakes driven cooperatively.
    pub struct HttpsListener {
        tcp: HttpListener,
        context: SslContext,
        staging: Vec<(SocketAddr, MidHandshakeSslStream<TcpStream>)>,
    }

    impl HttpsListener {
        pub fn bind(host: &str, port: u16, bufsize: usize, config: &TlsConfig)
                    -> ::Result<HttpsListener> {
            let context = server_context(config)?;
            Ok(HttpsListener {
                tcp: HttpListener::bind(host, port, bufsize)?,
                context: context,
                staging: Vec::new(),
            })
        }

        /// Wraps a fresh accept and takes the first handshake step. A
        /// finished handshake is promoted immediately; an in-progress one
        /// is staged; a failed one is dropped so the client can start over.
        fn begin(&mut self, stream: TcpStream, peer: SocketAddr)
                 -> Option<(HttpsStream, SocketAddr)> {
            let ssl = match Ssl::new(&self.context) {
                Ok(ssl) => ssl,
                Err(e) => {
                    error!("cannot prepare tls session for {}: {}", peer, e);
                    return None;
                }
            };
            match ssl.accept(stream) {
                Ok(stream) => Some((HttpsStream(stream), peer)),
                Err(HandshakeError::WouldBlock(mid)) => {
                    self.staging.push((peer, mid));
                    None
                }
                Err(e) => {
                    error!("tls handshake aborted with {}: {}", peer, e);
                    None
                }
            }
        }
    }

    impl Listener for HttpsListener {
        type Stream = HttpsStream;

        fn service_accepts(&mut self) {
            self.tcp.service_accepts();
        }

        fn service_connects(&mut self) -> Vec<(HttpsStream, SocketAddr)> {
            self.tcp.service_accepts();
            let mut ready = Vec::new();

            for (stream, peer) in self.tcp.take_validated() {
                if let Some(pair) = self.begin(stream, peer) {
                    ready.push(pair);
                }
            }

            // one handshake step for everything already staged
            for (peer, mid) in mem::replace(&mut self.staging, Vec::new()) {
                match mid.handshake() {
                    Ok(stream) => {
                        trace!("tls handshake complete with {}", peer);
                        ready.push((HttpsStream(stream), peer));
                    }
                    Err(HandshakeError::WouldBlock(mid)) => {
                        self.staging.push((peer, mid));
                    }
                    Err(e) => {
                        error!("tls handshake aborted with {}: {}", peer, e);
                    }
                }
            }
            ready
        }

        fn local_addr(&self) -> SocketAddr {
            self.tcp.local_addr()
        }

        fn external_addr(&self) -> (&str, u16) {
            self.tcp.external_addr()
        }

        fn close(&mut self) {
            self.staging.clear();
            self.tcp.close();
        }
    }

    /// A TLS-wrapped TCP stream. Post-handshake reads and writes go
    /// through the TLS layer, which surfaces want-read/want-write as
    /// `WouldBlock` and an encrypted-side EOF as a fatal error kind.
    pub struct HttpsStream(pub SslStream<TcpStream>);

    impl Read for HttpsStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for HttpsStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl Transport for HttpsStream {
        fn peer_addr(&self) -> io::Result<SocketAddr> {
            self.0.get_ref().peer_addr()
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.0.get_ref().local_addr()
        }

        fn shutdown(&self, how: Shutdown) -> io::Result<()> {
            self.0.get_ref().shutdown(how)
        }
    }
}
