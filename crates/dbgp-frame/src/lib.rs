//! DBGp frame codec.
//!
//! DBGp responses are sent over the wire as `<decimal-length>\0<xml-bytes>\0`:
//! a NUL-terminated ASCII decimal byte count, followed by exactly that many
//! bytes of UTF-8 XML, followed by a terminating NUL. [`FrameDecoder`] is an
//! incremental, restartable parser over that format: feed it arbitrarily
//! chopped byte chunks (as they arrive off a socket) and it yields complete
//! frames (or per-frame errors) as soon as they're available, carrying
//! partial state across calls.
//!
//! Outbound DBGp commands use a simpler convention (a single NUL-terminated
//! line, no length prefix — see [`encode_command`]); [`encode_frame`] is
//! provided mainly for tests and for feeding a mock engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;

/// Errors a [`FrameDecoder`] can report for a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The length prefix was not a well-formed ASCII decimal integer, or the
    /// byte following the body was not the expected terminating NUL. This is
    /// a framing-level desync: the decoder cannot recover and stops
    /// producing further frames.
    MalformedFrame(String),
    /// The length prefix was well-formed and the body was read in full, but
    /// the body bytes are not well-formed XML. Framing is unaffected; the
    /// decoder resumes at the next frame.
    ParseError(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::MalformedFrame(msg) => write!(f, "malformed DBGp frame: {msg}"),
            FrameError::ParseError(msg) => write!(f, "malformed XML body: {msg}"),
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug)]
enum State {
    ReadingLength { digits: Vec<u8> },
    ReadingBody { len: usize, body: Vec<u8> },
    AwaitingTerminator { body: Vec<u8> },
    Desynced,
}

/// Incremental decoder for the DBGp `<len>\0<xml>\0` frame format.
///
/// Feed bytes via [`push`](FrameDecoder::push) as they arrive; it returns
/// every frame (or frame-level error) completed by that call, in order.
/// Partial frames are buffered internally and completed by a later call,
/// however the input happens to be chopped up — including splits inside the
/// length prefix, inside the body, or exactly on the inter-frame NUL.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder ready to read the start of a new frame.
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::ReadingLength { digits: Vec::new() } }
    }

    /// Feed a chunk of bytes, returning every frame completed by it.
    ///
    /// Once a [`FrameError::MalformedFrame`] is produced the decoder is
    /// desynced and every subsequent call returns that same error again
    /// without consuming input; the caller should treat this as fatal to
    /// the connection (per the DBGp connection's error taxonomy) rather
    /// than retrying.
    pub fn push(&mut self, input: &[u8]) -> Vec<Result<Vec<u8>, FrameError>> {
        let mut out = Vec::new();
        for &byte in input {
            if matches!(self.state, State::Desynced) {
                break;
            }
            self.push_byte(byte, &mut out);
        }
        out
    }

    fn push_byte(&mut self, byte: u8, out: &mut Vec<Result<Vec<u8>, FrameError>>) {
        match &mut self.state {
            State::ReadingLength { digits } => {
                if byte == 0 {
                    match parse_length(digits) {
                        Ok(0) => {
                            // Zero-length body: the next byte is already the terminator.
                            self.state = State::AwaitingTerminator { body: Vec::new() };
                        }
                        Ok(len) => {
                            self.state = State::ReadingBody { len, body: Vec::with_capacity(len) };
                        }
                        Err(e) => {
                            out.push(Err(FrameError::MalformedFrame(e)));
                            self.state = State::Desynced;
                        }
                    }
                } else {
                    digits.push(byte);
                }
            }
            State::ReadingBody { len, body } => {
                body.push(byte);
                if body.len() == *len {
                    let body = std::mem::take(body);
                    self.state = State::AwaitingTerminator { body };
                }
            }
            State::AwaitingTerminator { body } => {
                if byte == 0 {
                    let body = std::mem::take(body);
                    out.push(finish_frame(body));
                    self.state = State::ReadingLength { digits: Vec::new() };
                } else {
                    out.push(Err(FrameError::MalformedFrame(format!(
                        "expected trailing NUL after body, found byte {byte:#04x}"
                    ))));
                    self.state = State::Desynced;
                }
            }
            State::Desynced => unreachable!("checked by caller"),
        }
    }

    /// True if the decoder is mid-frame (has buffered bytes of an incomplete frame).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !matches!(self.state, State::ReadingLength { digits } if digits.is_empty())
    }
}

fn parse_length(digits: &[u8]) -> Result<usize, String> {
    if digits.is_empty() {
        return Err("empty length prefix".to_string());
    }
    let s = std::str::from_utf8(digits).map_err(|e| format!("length prefix not UTF-8: {e}"))?;
    s.parse::<usize>().map_err(|e| format!("length prefix {s:?} is not a decimal integer: {e}"))
}

fn finish_frame(body: Vec<u8>) -> Result<Vec<u8>, FrameError> {
    let text = std::str::from_utf8(&body)
        .map_err(|e| FrameError::ParseError(format!("body is not UTF-8: {e}")))?;
    let mut reader = quick_xml::Reader::from_str(text);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => buf.clear(),
            Err(e) => return Err(FrameError::ParseError(format!("invalid XML: {e}"))),
        }
    }
    Ok(body)
}

/// Encode a complete DBGp response frame: `<len>\0<xml>\0`.
///
/// Primarily useful for tests and for a mock engine that needs to produce
/// frames a [`FrameDecoder`] can consume.
#[must_use]
pub fn encode_frame(xml: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(xml.len() + 24);
    out.extend_from_slice(xml.len().to_string().as_bytes());
    out.push(0);
    out.extend_from_slice(xml);
    out.push(0);
    out
}

/// Encode an outbound DBGp command line: the command text followed by a
/// single terminating NUL. Unlike engine replies, commands carry no length
/// prefix (they are a single line the engine reads up to the NUL).
#[must_use]
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + 1);
    out.extend_from_slice(command.as_bytes());
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<Result<Vec<u8>, FrameError>> {
        let mut decoder = FrameDecoder::new();
        decoder.push(input)
    }

    #[test]
    fn single_frame_in_one_chunk() {
        let frame = encode_frame(b"<response/>");
        let results = decode_all(&frame);
        assert_eq!(results, vec![Ok(b"<response/>".to_vec())]);
    }

    #[test]
    fn two_concatenated_frames_in_one_chunk() {
        let mut stream = encode_frame(b"<init/>");
        stream.extend(encode_frame(b"<response/>"));
        let results = decode_all(&stream);
        assert_eq!(results, vec![Ok(b"<init/>".to_vec()), Ok(b"<response/>".to_vec())]);
    }

    #[test]
    fn split_inside_length_prefix() {
        let frame = encode_frame(b"<response status=\"break\"/>");
        let mut decoder = FrameDecoder::new();
        let (a, b) = frame.split_at(1); // splits between the two length digits
        let mut out = decoder.push(a);
        out.extend(decoder.push(b));
        assert_eq!(out, vec![Ok(b"<response status=\"break\"/>".to_vec())]);
    }

    #[test]
    fn split_inside_body() {
        let frame = encode_frame(b"<response status=\"break\"/>");
        let mid = frame.len() / 2;
        let mut decoder = FrameDecoder::new();
        let (a, b) = frame.split_at(mid);
        let mut out = decoder.push(a);
        out.extend(decoder.push(b));
        assert_eq!(out, vec![Ok(b"<response status=\"break\"/>".to_vec())]);
    }

    #[test]
    fn split_on_interframe_nul() {
        let mut stream = encode_frame(b"<a/>");
        stream.extend(encode_frame(b"<b/>"));
        let split_at = encode_frame(b"<a/>").len();
        let mut decoder = FrameDecoder::new();
        let (a, b) = stream.split_at(split_at);
        let mut out = decoder.push(a);
        out.extend(decoder.push(b));
        assert_eq!(out, vec![Ok(b"<a/>".to_vec()), Ok(b"<b/>".to_vec())]);
    }

    #[test]
    fn byte_at_a_time_matches_whole_chunk() {
        let mut stream = encode_frame(b"<one/>");
        stream.extend(encode_frame(b"<two/>"));
        stream.extend(encode_frame(b"<three/>"));

        let whole = decode_all(&stream);

        let mut decoder = FrameDecoder::new();
        let mut byte_by_byte = Vec::new();
        for &b in &stream {
            byte_by_byte.extend(decoder.push(&[b]));
        }

        assert_eq!(whole, byte_by_byte);
    }

    #[test]
    fn malformed_length_prefix() {
        let mut stream = b"12x\0<a/>\0".to_vec();
        let results = decode_all(&mut stream);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(FrameError::MalformedFrame(_))));
    }

    #[test]
    fn malformed_xml_body_does_not_desync_following_frames() {
        let mut stream = encode_frame(b"<not well formed");
        stream.extend(encode_frame(b"<response/>"));
        let results = decode_all(&stream);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FrameError::ParseError(_))));
        assert_eq!(results[1], Ok(b"<response/>".to_vec()));
    }

    #[test]
    fn zero_length_body() {
        let frame = encode_frame(b"");
        let results = decode_all(&frame);
        // An empty body is not well-formed XML on its own, but framing
        // still succeeds in isolating it.
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn encode_command_has_no_length_prefix() {
        let cmd = encode_command("status -i 1");
        assert_eq!(cmd, b"status -i 1\0");
    }
}
