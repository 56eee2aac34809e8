//! Body framing for outgoing responses.
use std::cmp;

use http::{Buffer, CRLF};

/// Encoders to handle different Transfer-Encodings.
///
/// An encoder appends framed body bytes onto a connection's outbound
/// buffer; the head has already been written by the time one is engaged.
#[derive(Debug, PartialEq)]
pub enum Encoder {
    /// A pass-through encoder: identity framing with no declared length.
    /// Only usable when the connection closes to delimit the body.
    Through,
    /// An encoder for when Transfer-Encoding is `chunked`.
    Chunked,
    /// An encoder for when Content-Length is set.
    ///
    /// Enforces that the body is not longer than the Content-Length header,
    /// by truncating writes that would run past the remaining budget.
    Length(u64),
}

impl Encoder {
    /// Appends one body fragment, framed. Returns how many of the caller's
    /// bytes were accepted (a `Length` encoder may truncate).
    pub fn encode(&mut self, tx: &mut Buffer, msg: &[u8]) -> usize {
        match *self {
            Encoder::Through => {
                tx.extend(msg);
                msg.len()
            }
            Encoder::Chunked => {
                trace!("chunked write, size = {:?}", msg.len());
                tx.extend(format!("{:X}", msg.len()).as_bytes());
                tx.extend(CRLF);
                tx.extend(msg);
                tx.extend(CRLF);
                msg.len()
            }
            Encoder::Length(ref mut remaining) => {
                let take = cmp::min(*remaining, msg.len() as u64) as usize;
                tx.extend(&msg[..take]);
                *remaining -= take as u64;
                take
            }
        }
    }

    /// Appends the end-of-body marker: the zero-sized last chunk for
    /// chunked framing, nothing otherwise.
    pub fn end(&mut self, tx: &mut Buffer) {
        if let Encoder::Chunked = *self {
            tx.extend(b"0\r\n\r\n");
        }
    }

    /// True when a sized body has spent its whole budget.
    pub fn is_eof(&self) -> bool {
        match *self {
            Encoder::Length(0) => true,
            _ => false,
        }
    }
}
