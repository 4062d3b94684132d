// Splits control channel bytes into reply blocks
use log::{trace, warn};

use crate::core_network::{Transport, TransportError};
use crate::core_reply::error::ReplyError;
use crate::core_reply::reply::Reply;

/// A read returns at most this many blocks. Anything after them stays
/// buffered for the next readable event.
pub const MAX_REPLIES_PER_READ: usize = 2;

pub struct ResponseReader {
    buf: Vec<u8>,
    capacity: usize,
}

impl ResponseReader {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Drops partial data, used when a control connection is (re)opened.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Reads what the transport has and decodes up to two complete blocks,
    /// in arrival order. An empty vector means more bytes are needed.
    pub fn read(&mut self, transport: &mut dyn Transport) -> Result<Vec<Reply>, ReplyError> {
        let space = self.capacity.saturating_sub(self.buf.len());
        if space > 0 {
            let mut chunk = vec![0u8; space];
            match transport.read(&mut chunk) {
                Ok(0) | Err(TransportError::Closed) => return Err(ReplyError::ConnectionClosed),
                Ok(n) => {
                    trace!("Read {} bytes from the control channel", n);
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(TransportError::WouldBlock) => {}
                Err(e) => return Err(ReplyError::ReadFailed(e)),
            }
        }

        self.decode()
    }

    /// Same as `read`, with bytes that were already received.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Reply>, ReplyError> {
        if self.buf.len() + bytes.len() > self.capacity {
            return Err(ReplyError::BufferFull);
        }
        self.buf.extend_from_slice(bytes);
        self.decode()
    }

    fn decode(&mut self) -> Result<Vec<Reply>, ReplyError> {
        let mut replies = Vec::with_capacity(MAX_REPLIES_PER_READ);
        let mut consumed = 0;

        while replies.len() < MAX_REPLIES_PER_READ {
            match scan_block(&self.buf[consumed..])? {
                Some((reply, used)) => {
                    consumed += used;
                    replies.push(reply);
                }
                None => break,
            }
        }
        self.buf.drain(..consumed);

        if replies.len() == MAX_REPLIES_PER_READ && matches!(scan_block(&self.buf), Ok(Some(_))) {
            warn!(
                "More than {} replies in one read, {} bytes left buffered",
                MAX_REPLIES_PER_READ,
                self.buf.len()
            );
        }

        if replies.is_empty() && self.buf.len() >= self.capacity {
            return Err(ReplyError::BufferFull);
        }

        Ok(replies)
    }
}

fn parse_code(line: &[u8]) -> Result<u16, ReplyError> {
    if line.len() < 3 || !line[..3].iter().all(u8::is_ascii_digit) {
        return Err(ReplyError::InvalidLineFormat);
    }
    let code = line[..3]
        .iter()
        .fold(0u16, |acc, digit| acc * 10 + (digit - b'0') as u16);
    if !(100..=999).contains(&code) {
        return Err(ReplyError::InvalidReplyCode(code));
    }
    Ok(code)
}

// The opening code then a space
fn is_final_line(line: &[u8], opening: &[u8]) -> bool {
    line.len() >= 4 && line[..3] == opening[..3] && line[3] == b' '
}

fn line_text(line: &[u8]) -> String {
    let text = line.get(4..).unwrap_or_default();
    String::from_utf8_lossy(text).trim().to_string()
}

/// Finds the first complete block in `buf`. Returns the decoded reply and
/// the number of bytes it spans, or `None` when the block is not complete.
fn scan_block(buf: &[u8]) -> Result<Option<(Reply, usize)>, ReplyError> {
    let mut pos = 0;
    let mut opening: &[u8] = &[];

    while let Some(len) = buf[pos..].iter().position(|&b| b == b'\n') {
        let mut line = &buf[pos..pos + len];
        if let [head @ .., b'\r'] = line {
            line = head;
        }
        let next = pos + len + 1;

        if pos == 0 {
            if line.len() < 4 {
                return Err(ReplyError::InvalidLineFormat);
            }
            if line[3] == b' ' {
                let code = parse_code(line)?;
                return Ok(Some((
                    Reply {
                        code,
                        text: line_text(line),
                        multi_line: false,
                    },
                    next,
                )));
            }
            // Opening line of a multi-line block, its code must be sane too
            parse_code(line)?;
            opening = line;
        } else if is_final_line(line, opening) {
            let code = parse_code(line)?;
            return Ok(Some((
                Reply {
                    code,
                    text: line_text(line),
                    multi_line: true,
                },
                next,
            )));
        }

        pos = next;
    }

    Ok(None)
}
