//! Streaming STOMP 1.2 codec.
//!
//! [`StompCodec`] implements [`tokio_util::codec`]'s `Decoder`/`Encoder` over
//! a `BytesMut`, yielding one [`Transmission`] per complete wire unit and
//! leaving partial input buffered. Bare EOLs between frames are heartbeats.
//!
//! The decoder enforces the frame grammar strictly: a frame that declares
//! `content-length` must be followed by exactly that many body bytes and a
//! NUL; without it the body runs to the first NUL. Any violation fails with
//! [`CodecError::MalformedFrame`] and poisons the decoder; a stream that
//! framed one unit wrong is not trusted to frame the rest right.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::CodecError;
use crate::frame::{Command, Frame, Transmission};
use crate::headers::{escape, unescape, HeaderList};
use crate::{MAX_BODY_LEN, MAX_COMMAND_LEN, MAX_HEADER_LINES, MAX_HEADER_LINE_LEN};

#[derive(Debug)]
enum DecodeState {
    /// Waiting for a complete command + header block.
    Head,
    /// Head parsed and consumed; waiting for the body and its NUL terminator.
    Body {
        command: Command,
        headers: HeaderList,
        declared: Option<usize>,
    },
}

/// STOMP 1.2 frame codec.
#[derive(Debug)]
pub struct StompCodec {
    state: DecodeState,
    poisoned: bool,
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl StompCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
            poisoned: false,
        }
    }

    fn try_decode(&mut self, src: &mut BytesMut) -> Result<Option<Transmission>, CodecError> {
        if let DecodeState::Head = self.state {
            if src.is_empty() {
                return Ok(None);
            }

            // Bare EOLs between frames are heartbeats.
            match src[0] {
                b'\n' => {
                    src.advance(1);
                    return Ok(Some(Transmission::Heartbeat));
                }
                b'\r' if src.len() >= 2 && src[1] == b'\n' => {
                    src.advance(2);
                    return Ok(Some(Transmission::Heartbeat));
                }
                b'\r' => return Ok(None), // lone CR, need the LF
                _ => {}
            }

            match parse_head(src)? {
                None => return Ok(None),
                Some((command, headers, consumed)) => {
                    let declared = match headers.get("content-length") {
                        None => None,
                        Some(raw) => {
                            let n: usize = raw.parse().map_err(|_| {
                                CodecError::malformed(format!("invalid content-length: {raw}"))
                            })?;
                            if n > MAX_BODY_LEN {
                                return Err(CodecError::malformed("content-length too large"));
                            }
                            Some(n)
                        }
                    };
                    src.advance(consumed);
                    self.state = DecodeState::Body {
                        command,
                        headers,
                        declared,
                    };
                }
            }
        }

        let (body, terminated) = match &self.state {
            DecodeState::Head => unreachable!("head handled above"),
            DecodeState::Body { declared, .. } => match declared {
                Some(n) => {
                    let n = *n;
                    if src.len() < n + 1 {
                        src.reserve(n + 1 - src.len());
                        return Ok(None);
                    }
                    if src[n] != 0 {
                        return Err(CodecError::malformed(
                            "declared content-length does not match the body",
                        ));
                    }
                    (n, true)
                }
                None => {
                    let scan_end = src.len().min(MAX_BODY_LEN + 1);
                    match src[..scan_end].iter().position(|&b| b == 0) {
                        Some(end) => (end, true),
                        None if src.len() > MAX_BODY_LEN => {
                            return Err(CodecError::malformed("body too large"))
                        }
                        None => (0, false),
                    }
                }
            },
        };
        if !terminated {
            return Ok(None);
        }

        let frame_body = src.split_to(body).to_vec();
        src.advance(1); // the frame-terminating NUL
        let state = std::mem::replace(&mut self.state, DecodeState::Head);
        match state {
            DecodeState::Body {
                command, headers, ..
            } => {
                trace!(%command, body_bytes = frame_body.len(), "decoded frame");
                Ok(Some(Transmission::Frame(Frame {
                    command,
                    headers,
                    body: frame_body,
                })))
            }
            DecodeState::Head => unreachable!(),
        }
    }
}

/// Parse the command line and the header block.
///
/// Returns `Ok(None)` while the head is still incomplete, and the number of
/// bytes consumed (including the blank line) once it is.
fn parse_head(src: &BytesMut) -> Result<Option<(Command, HeaderList, usize)>, CodecError> {
    let line_end = match src.iter().position(|&b| b == b'\n') {
        Some(i) => i,
        None if src.len() > MAX_COMMAND_LEN + 1 => {
            return Err(CodecError::malformed("command line too long"))
        }
        None => return Ok(None),
    };

    let command_line = strip_cr(&src[..line_end]);
    if command_line.is_empty() {
        return Err(CodecError::malformed("empty command line"));
    }
    if command_line.len() > MAX_COMMAND_LEN {
        return Err(CodecError::malformed("command line too long"));
    }
    let token = std::str::from_utf8(command_line)
        .map_err(|_| CodecError::malformed("command is not valid UTF-8"))?;
    let command = Command::from_wire(token)
        .ok_or_else(|| CodecError::malformed(format!("unknown command: {token}")))?;

    let mut headers = HeaderList::new();
    let mut cursor = line_end + 1;
    loop {
        let rel_end = match src[cursor..].iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None if src.len() - cursor > MAX_HEADER_LINE_LEN => {
                return Err(CodecError::malformed("header line too long"))
            }
            None => return Ok(None),
        };
        let line = strip_cr(&src[cursor..cursor + rel_end]);
        cursor += rel_end + 1;

        if line.is_empty() {
            // Blank line: end of the header block.
            return Ok(Some((command, headers, cursor)));
        }
        if headers.len() == MAX_HEADER_LINES {
            return Err(CodecError::malformed("too many header lines"));
        }
        if line.len() > MAX_HEADER_LINE_LEN {
            return Err(CodecError::malformed("header line too long"));
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| CodecError::malformed("header line without ':'"))?;
        if colon == 0 {
            return Err(CodecError::malformed("empty header key"));
        }
        let key = std::str::from_utf8(&line[..colon])
            .map_err(|_| CodecError::malformed("header key is not valid UTF-8"))?;
        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| CodecError::malformed("header value is not valid UTF-8"))?;

        if command.uses_header_escapes() {
            headers.push(unescape(key)?, unescape(value)?);
        } else {
            headers.push(key, value);
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

impl Decoder for StompCodec {
    type Item = Transmission;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Transmission>, CodecError> {
        if self.poisoned {
            return Err(CodecError::Poisoned);
        }
        match self.try_decode(src) {
            Ok(item) => Ok(item),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }
}

impl Encoder<Transmission> for StompCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Transmission, dst: &mut BytesMut) -> Result<(), CodecError> {
        match item {
            Transmission::Heartbeat => {
                dst.put_u8(b'\n');
                Ok(())
            }
            Transmission::Frame(frame) => Encoder::<Frame>::encode(self, frame, dst),
        }
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.reserve(frame.body.len() + 64);
        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        let escapes = frame.command.uses_header_escapes();
        for (key, value) in frame.headers.iter() {
            if escapes {
                dst.put_slice(escape(key).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(key.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}
