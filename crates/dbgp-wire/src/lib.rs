//! The DBGp command/reply envelope.
//!
//! This crate sits directly above [`dbgp_frame`]: it knows how to turn a
//! typed command invocation into the `<name> -i <tx> [-<flag> <value>]*
//! [-- <base64(data)>]` command line DBGp expects, and how to pull a
//! transaction id and engine `<error>` out of a reply's XML root. It also
//! defines [`DbgpError`], the error taxonomy every DBGp-facing crate in this
//! workspace returns.

#![warn(missing_docs)]

use std::fmt;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// A DBGp transaction id: unique per connection, echoed by the engine on
/// the matching reply.
pub type TransactionId = u64;

/// The error taxonomy shared by every crate that speaks DBGp.
#[derive(Debug, thiserror::Error)]
pub enum DbgpError {
    /// Socket/transport-level failure. Fatal to the connection; other
    /// connections are unaffected.
    #[error("transport error: {0}")]
    TransportError(String),
    /// The frame's length prefix was not a well-formed ASCII integer.
    #[error("malformed DBGp frame: {0}")]
    MalformedFrame(String),
    /// The frame body was not well-formed XML.
    #[error("malformed XML body: {0}")]
    ParseError(String),
    /// The engine's reply carried an `<error>` element.
    #[error("engine error {code} on `{command}`: {message}")]
    EngineError {
        /// The DBGp error code from the `<error code="…">` attribute.
        code: u32,
        /// The human-readable `<message>` text.
        message: String,
        /// The command that produced this reply.
        command: String,
    },
    /// The connection's socket closed with this awaiter still pending.
    #[error("connection closed")]
    ConnectionClosed,
    /// A breakpoint's `hit_condition` string did not parse.
    #[error("invalid hit_condition: {0}")]
    InvalidHitCondition(String),
    /// A DAP request referenced a stale frame/variable/source id.
    #[error("unknown reference: {0}")]
    UnknownReference(String),
}

impl From<dbgp_frame::FrameError> for DbgpError {
    fn from(e: dbgp_frame::FrameError) -> Self {
        match e {
            dbgp_frame::FrameError::MalformedFrame(msg) => DbgpError::MalformedFrame(msg),
            dbgp_frame::FrameError::ParseError(msg) => DbgpError::ParseError(msg),
        }
    }
}

/// Builds a single DBGp command line: `<name> -i <tx> [-<flag> <value>]*
/// [-- <base64(data)>]`.
pub struct CommandBuilder {
    name: &'static str,
    transaction_id: TransactionId,
    flags: Vec<(char, String)>,
    data: Option<Vec<u8>>,
}

impl CommandBuilder {
    /// Start building a command with the given name and transaction id.
    #[must_use]
    pub fn new(name: &'static str, transaction_id: TransactionId) -> Self {
        Self { name, transaction_id, flags: Vec::new(), data: None }
    }

    /// Append a `-<key> <value>` flag.
    #[must_use]
    pub fn flag(mut self, key: char, value: impl fmt::Display) -> Self {
        self.flags.push((key, value.to_string()));
        self
    }

    /// Append a `-<key> <value>` flag only if `value` is `Some`.
    #[must_use]
    pub fn maybe_flag(self, key: char, value: Option<impl fmt::Display>) -> Self {
        match value {
            Some(v) => self.flag(key, v),
            None => self,
        }
    }

    /// Attach a base64-encoded data segment (an expression, a condition, …),
    /// appended as ` -- <base64>` after the flags.
    #[must_use]
    pub fn data(mut self, data: impl AsRef<[u8]>) -> Self {
        self.data = Some(data.as_ref().to_vec());
        self
    }

    /// Render the command line (without the framing NUL terminator).
    #[must_use]
    pub fn build(self) -> String {
        use base64::Engine as _;

        let mut line = format!("{} -i {}", self.name, self.transaction_id);
        for (key, value) in &self.flags {
            line.push_str(&format!(" -{key} {value}"));
        }
        if let Some(data) = &self.data {
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            line.push_str(" -- ");
            line.push_str(&encoded);
        }
        line
    }

    /// Render the command as wire bytes, NUL-terminated, ready to write to
    /// the connection's socket.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        dbgp_frame::encode_command(&self.build())
    }
}

/// A parsed DBGp reply: the root element's name and attributes, plus the
/// original XML bytes for any downstream typed view (stack frames,
/// properties, …) to parse further.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The local name of the root element (`response`, `init`, `notify`, `stream`, …).
    pub root_name: String,
    /// Attributes on the root element, in document order.
    pub attributes: Vec<(String, String)>,
    /// The full XML document, unchanged.
    pub xml: Vec<u8>,
}

impl Reply {
    /// Look up an attribute on the root element by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// The `transaction_id` attribute, parsed as an integer, if present
    /// (absent on the one-shot `init` frame).
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.attribute("transaction_id").and_then(|s| s.parse().ok())
    }
}

/// Parse a reply's root element and, if present, its nested `<error>`
/// child into [`DbgpError::EngineError`].
///
/// `command` is recorded on any resulting `EngineError` for diagnostics; it
/// should be the command name that produced this reply.
pub fn parse_reply(xml: &[u8], command: &str) -> Result<Reply, DbgpError> {
    let text = std::str::from_utf8(xml)
        .map_err(|e| DbgpError::ParseError(format!("body is not UTF-8: {e}")))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut root_name = None;
    let mut attributes = Vec::new();
    let mut error_code = None;
    let mut message = None;
    let mut in_error = false;
    let mut in_message = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| {
            DbgpError::ParseError(format!("invalid XML: {e}"))
        })? {
            Event::Eof => break,
            Event::Start(tag) | Event::Empty(tag) => {
                let local = local_name(&tag);
                if root_name.is_none() {
                    root_name = Some(local.clone());
                    for attr in tag.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        let value = attr
                            .decode_and_unescape_value(reader.decoder())
                            .map(|v| v.into_owned())
                            .unwrap_or_default();
                        attributes.push((key, value));
                    }
                } else if local == "error" {
                    in_error = true;
                    for attr in tag.attributes().flatten() {
                        if attr.key.as_ref() == b"code" {
                            let value = attr
                                .decode_and_unescape_value(reader.decoder())
                                .unwrap_or_default();
                            error_code = value.parse::<u32>().ok();
                        }
                    }
                } else if in_error && local == "message" {
                    in_message = true;
                }
            }
            Event::Text(text) => {
                if in_message {
                    let decoded = text
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::new());
                    message.get_or_insert_with(String::new).push_str(&decoded);
                }
            }
            Event::End(tag) => {
                let local = local_name(&tag);
                if local == "message" {
                    in_message = false;
                } else if local == "error" {
                    in_error = false;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    let root_name = root_name.ok_or_else(|| DbgpError::ParseError("no root element".to_string()))?;

    if let Some(code) = error_code {
        return Err(DbgpError::EngineError {
            code,
            message: message.unwrap_or_default(),
            command: command.to_string(),
        });
    }

    Ok(Reply { root_name, attributes, xml: xml.to_vec() })
}

fn local_name(tag: &quick_xml::events::BytesStart<'_>) -> String {
    let name = tag.name();
    let full = String::from_utf8_lossy(name.as_ref());
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::{must, must_err};

    #[test]
    fn simple_command_no_flags() {
        let cmd = CommandBuilder::new("run", 3).build();
        assert_eq!(cmd, "run -i 3");
    }

    #[test]
    fn command_with_flags_and_data() {
        let cmd = CommandBuilder::new("breakpoint_set", 7)
            .flag('t', "conditional")
            .flag('f', "file:///a.php")
            .flag('n', 10)
            .data(b"$x > 1")
            .build();
        assert!(cmd.starts_with("breakpoint_set -i 7 -t conditional -f file:///a.php -n 10 -- "));
        let encoded = must(cmd.rsplit(' ').next().ok_or("missing data segment"));
        use base64::Engine as _;
        let decoded = must(base64::engine::general_purpose::STANDARD.decode(encoded));
        assert_eq!(decoded, b"$x > 1");
    }

    #[test]
    fn maybe_flag_omits_none() {
        let cmd = CommandBuilder::new("breakpoint_set", 1)
            .flag('t', "line")
            .maybe_flag('h', None::<u32>)
            .build();
        assert_eq!(cmd, "breakpoint_set -i 1 -t line");
    }

    #[test]
    fn into_bytes_is_nul_terminated() {
        let bytes = CommandBuilder::new("status", 2).into_bytes();
        assert_eq!(bytes, b"status -i 2\0");
    }

    #[test]
    fn parse_plain_response() {
        let xml = br#"<response xmlns="urn:debugger_protocol_v1" command="status" transaction_id="4" status="break" reason="ok"/>"#;
        let reply = must(parse_reply(xml, "status"));
        assert_eq!(reply.root_name, "response");
        assert_eq!(reply.transaction_id(), Some(4));
        assert_eq!(reply.attribute("status"), Some("break"));
    }

    #[test]
    fn parse_error_reply() {
        let xml = br#"<response xmlns="urn:debugger_protocol_v1" command="breakpoint_set" transaction_id="9"><error code="5"><message>no such file</message></error></response>"#;
        let err = must_err(parse_reply(xml, "breakpoint_set"));
        assert!(matches!(
            &err,
            DbgpError::EngineError { code, message, command }
                if *code == 5 && message == "no such file" && command == "breakpoint_set"
        ));
    }

    #[test]
    fn parse_init_frame_has_no_transaction_id() {
        let xml = br#"<init xmlns="urn:debugger_protocol_v1" fileuri="file:///a.php" language="PHP"/>"#;
        let reply = must(parse_reply(xml, "init"));
        assert_eq!(reply.root_name, "init");
        assert_eq!(reply.transaction_id(), None);
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        let xml = b"<response not closed";
        let err = must_err(parse_reply(xml, "status"));
        assert!(matches!(err, DbgpError::ParseError(_)));
    }
}
