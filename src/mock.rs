use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;

use net::Transport;

/// What the next read on a `MockStream` should do.
#[derive(Debug)]
enum Script {
    Data(Vec<u8>),
    Block,
    Eof,
    Error(io::ErrorKind),
}

/// A scripted transport: reads follow a queue of outcomes, writes land in
/// a shared sink (up to an optional would-block budget) so tests can watch
/// the wire after the stream has been moved into a server.
pub struct MockStream {
    reads: VecDeque<Script>,
    eof: bool,
    write: Rc<RefCell<Vec<u8>>>,
    write_budget: Option<usize>,
}

impl MockStream {
    pub fn new() -> MockStream {
        MockStream {
            reads: VecDeque::new(),
            eof: false,
            write: Rc::new(RefCell::new(Vec::new())),
            write_budget: None,
        }
    }

    pub fn with_input(input: &[u8]) -> MockStream {
        let mut mock = MockStream::new();
        if !input.is_empty() {
            mock.push_data(input);
        }
        mock
    }

    pub fn push_data(&mut self, data: &[u8]) {
        self.reads.push_back(Script::Data(data.to_vec()));
    }

    pub fn push_block(&mut self) {
        self.reads.push_back(Script::Block);
    }

    pub fn push_eof(&mut self) {
        self.reads.push_back(Script::Eof);
    }

    pub fn push_error(&mut self, kind: io::ErrorKind) {
        self.reads.push_back(Script::Error(kind));
    }

    /// A handle on everything written to this stream.
    pub fn sink(&self) -> Rc<RefCell<Vec<u8>>> {
        self.write.clone()
    }

    /// The bytes written so far.
    pub fn written(&self) -> Vec<u8> {
        self.write.borrow().clone()
    }

    /// Accept only `n` more written bytes before writes would block.
    pub fn block_writes_after(&mut self, n: usize) {
        self.write_budget = Some(n);
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        match self.reads.pop_front() {
            Some(Script::Data(mut data)) => {
                if data.len() > buf.len() {
                    let rest = data.split_off(buf.len());
                    self.reads.push_front(Script::Data(rest));
                }
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Some(Script::Block) | None => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "wouldblock"))
            }
            Some(Script::Eof) => {
                self.eof = true;
                Ok(0)
            }
            Some(Script::Error(kind)) => Err(io::Error::new(kind, "scripted error")),
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = match self.write_budget {
            Some(0) => return Err(io::Error::new(io::ErrorKind::WouldBlock, "wouldblock")),
            Some(budget) => {
                let n = ::std::cmp::min(budget, data.len());
                self.write_budget = Some(budget - n);
                n
            }
            None => data.len(),
        };
        self.write.borrow_mut().extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(mock_peer())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(mock_local())
    }

    fn shutdown(&self, _how: Shutdown) -> io::Result<()> {
        Ok(())
    }
}

pub fn mock_peer() -> SocketAddr {
    "127.0.0.1:4321".parse().unwrap()
}

pub fn mock_local() -> SocketAddr {
    "127.0.0.1:80".parse().unwrap()
}
