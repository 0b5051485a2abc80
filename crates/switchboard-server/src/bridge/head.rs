//! Request-head sniffing for the accept loop.
//!
//! Reads just enough of a fresh connection to see the request line and
//! headers. Every byte read is kept in the caller's buffer so it can be
//! replayed to whichever side ends up owning the connection.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Header slots offered to the parser; heads with more are left to hyper.
const MAX_HEADERS: usize = 64;

/// The parts of a request head the router cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method.
    pub method: String,
    /// Request target with any query string removed.
    pub path: String,
    /// Value of the `Upgrade` header.
    pub upgrade: Option<String>,
    /// Length of the head including the blank line.
    pub head_len: usize,
}

impl RequestHead {
    /// Whether this is a protocol-upgrade request (non-empty `Upgrade`
    /// header).
    pub fn is_upgrade(&self) -> bool {
        self.upgrade.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Result of sniffing a connection.
#[derive(Debug, PartialEq, Eq)]
pub enum HeadRead {
    /// A complete, well-formed head.
    Complete(RequestHead),
    /// Bytes arrived but no usable head: oversized, malformed or cut short.
    Unparsed,
    /// The peer closed before sending anything.
    Closed,
}

enum Parsed {
    Complete(RequestHead),
    Partial,
    Invalid,
}

/// Read from `io` into `buf` until a full request head is buffered, the
/// buffer reaches `max_head_bytes`, or the peer stops sending.
pub async fn read_head<R>(io: &mut R, buf: &mut BytesMut, max_head_bytes: usize) -> io::Result<HeadRead>
where
    R: AsyncRead + Unpin,
{
    loop {
        if !buf.is_empty() {
            match parse(buf) {
                Parsed::Complete(head) => return Ok(HeadRead::Complete(head)),
                Parsed::Invalid => return Ok(HeadRead::Unparsed),
                Parsed::Partial => {}
            }
        }
        if buf.len() >= max_head_bytes {
            return Ok(HeadRead::Unparsed);
        }
        buf.reserve(4096);
        if io.read_buf(buf).await? == 0 {
            return Ok(if buf.is_empty() {
                HeadRead::Closed
            } else {
                HeadRead::Unparsed
            });
        }
    }
}

/// Parse a complete head. Trailing bytes after the blank line are ignored.
pub fn parse_head(bytes: &[u8]) -> Option<RequestHead> {
    match parse(bytes) {
        Parsed::Complete(head) => Some(head),
        Parsed::Partial | Parsed::Invalid => None,
    }
}

fn parse(bytes: &[u8]) -> Parsed {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let head_len = match request.parse(bytes) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Parsed::Partial,
        Err(_) => return Parsed::Invalid,
    };
    let (Some(method), Some(target)) = (request.method, request.path) else {
        return Parsed::Invalid;
    };

    let upgrade = request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("upgrade"))
        .map(|h| String::from_utf8_lossy(h.value).trim().to_owned());
    let path = target.split_once('?').map_or(target, |(path, _)| path);
    Parsed::Complete(RequestHead {
        method: method.to_owned(),
        path: path.to_owned(),
        upgrade,
        head_len,
    })
}
