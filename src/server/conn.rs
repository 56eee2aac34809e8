//! The server side of one accepted connection.
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use clock::{Clock, Timer};
use http::Buffer;
use net::{self, Transport};

/// Outcome of one non-blocking receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recv {
    /// Nothing available; try again next tick.
    Pending,
    /// The peer closed or the transport failed; cutoff is now set.
    Closed,
    /// This many bytes were appended to the inbound buffer.
    Data(usize),
}

/// A non-blocking byte-duplex endpoint with buffered I/O and an idle timer.
///
/// The inbound buffer collects bytes from the OS for the parser to consume;
/// the outbound buffer collects response bytes for the OS to drain. Once
/// `cutoff` is set it never clears - the serve loop reaps the connection
/// after the outbound side has had its chance to flush.
pub struct Connection<T: Transport> {
    transport: T,
    peer: SocketAddr,
    local: SocketAddr,
    rx: Buffer,
    tx: Buffer,
    cutoff: bool,
    refreshable: bool,
    timeout: Duration,
    timer: Timer,
    bufsize: usize,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T,
               local: SocketAddr,
               peer: SocketAddr,
               clock: Clock,
               timeout: Duration,
               bufsize: usize)
               -> Connection<T> {
        Connection {
            transport: transport,
            peer: peer,
            local: local,
            rx: Buffer::new(),
            tx: Buffer::new(),
            cutoff: false,
            refreshable: true,
            timeout: timeout,
            timer: Timer::new(clock, timeout),
            bufsize: bufsize,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn is_cutoff(&self) -> bool {
        self.cutoff
    }

    /// The inbound buffer, for the parser to consume in place.
    pub fn inbound_mut(&mut self) -> &mut Buffer {
        &mut self.rx
    }

    pub fn inbound(&self) -> &Buffer {
        &self.rx
    }

    /// The outbound buffer, for the response writer to append to.
    pub fn outbound_mut(&mut self) -> &mut Buffer {
        &mut self.tx
    }

    pub fn outbound(&self) -> &Buffer {
        &self.tx
    }

    /// Discards any unconsumed inbound bytes.
    pub fn clear_inbound(&mut self) {
        self.rx.clear();
    }

    /// Queues bytes for transmission.
    pub fn transmit(&mut self, data: &[u8]) {
        self.tx.extend(data);
    }

    /// Changes the idle timeout and re-arms the timer. Zero disables idle
    /// reaping, which is how persistent connections stay up.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.timer.restart_with(timeout);
    }

    /// True when the idle timeout is enabled and has elapsed.
    pub fn expired(&self) -> bool {
        self.timeout > Duration::from_secs(0) && self.timer.expired()
    }

    /// One non-blocking receive. Data lands in the inbound buffer and
    /// refreshes the idle timer; the fatal error class sets cutoff.
    /// Unexpected errors propagate for the caller to log and reap.
    pub fn receive(&mut self) -> io::Result<Recv> {
        if self.cutoff {
            return Ok(Recv::Closed);
        }
        match self.rx.read_from(&mut self.transport, self.bufsize) {
            Ok(0) => {
                trace!("peer {} closed", self.peer);
                self.cutoff = true;
                Ok(Recv::Closed)
            }
            Ok(n) => {
                trace!("received {} bytes from {}", n, self.peer);
                if self.refreshable {
                    self.timer.restart();
                }
                Ok(Recv::Data(n))
            }
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(Recv::Pending),
                kind if net::fatal(kind) => {
                    trace!("receive fault from {}: {}", self.peer, e);
                    self.cutoff = true;
                    Ok(Recv::Closed)
                }
                _ => Err(e),
            },
        }
    }

    /// One non-blocking send of caller-supplied bytes. Returns how many
    /// were accepted; zero means would-block (or cutoff on a fatal fault).
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let result = self.transport.write(data);
        let n = sieve(&mut self.cutoff, result)?;
        if n > 0 {
            trace!("sent {} bytes to {}", n, self.peer);
            if self.refreshable {
                self.timer.restart();
            }
        }
        Ok(n)
    }

    /// Receives until pending, closed, or cutoff.
    pub fn service_receives(&mut self) -> io::Result<()> {
        while !self.cutoff {
            match self.receive()? {
                Recv::Data(..) => continue,
                Recv::Pending | Recv::Closed => break,
            }
        }
        Ok(())
    }

    /// Drains the outbound buffer with at most one OS write, so a single
    /// chatty connection cannot starve the rest of a tick.
    pub fn service_sends(&mut self) -> io::Result<()> {
        if self.tx.is_empty() || self.cutoff {
            return Ok(());
        }
        let result = self.transport.write(self.tx.bytes());
        let n = sieve(&mut self.cutoff, result)?;
        if n > 0 {
            trace!("sent {} bytes to {}", n, self.peer);
            self.tx.consume(n);
            if self.refreshable {
                self.timer.restart();
            }
        }
        Ok(())
    }

    /// Asks the OS to half- or full-close. Idempotent; errors ignored.
    pub fn shutdown(&mut self, how: Shutdown) {
        let _ = self.transport.shutdown(how);
    }

    pub fn shutdown_send(&mut self) {
        self.shutdown(Shutdown::Write);
    }

    pub fn shutdown_receive(&mut self) {
        self.shutdown(Shutdown::Read);
    }

    /// Shuts both directions down. The handle itself is released when the
    /// connection is dropped.
    pub fn close(&mut self) {
        self.shutdown(Shutdown::Both);
    }
}

/// Maps would-block to zero progress and the fatal class to cutoff;
/// anything else propagates.
fn sieve(cutoff: &mut bool, result: io::Result<usize>) -> io::Result<usize> {
    match result {
        Ok(n) => Ok(n),
        Err(e) => match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(0),
            kind if net::fatal(kind) => {
                *cutoff = true;
                Ok(0)
            }
            _ => Err(e),
        },
    }
}
