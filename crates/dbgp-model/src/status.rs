//! `status` reply and break-state decoding.

use dbgp_wire::{DbgpError, parse_reply};

use crate::xml::parse_nodes;

/// The engine's reported run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The engine has connected but not yet started running the script.
    Starting,
    /// Actively executing, between breaks.
    Running,
    /// Stopped at a breakpoint or after a step; debugger commands accepted.
    Break,
    /// Tearing down after a `stop` command.
    Stopping,
    /// Execution finished; the connection is about to close.
    Stopped,
}

impl Status {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "starting" => Some(Status::Starting),
            "running" => Some(Status::Running),
            "break" => Some(Status::Break),
            "stopping" => Some(Status::Stopping),
            "stopped" => Some(Status::Stopped),
            _ => None,
        }
    }
}

/// A decoded `status` reply, including the break-state detail the engine
/// nests as a `<message>` child when `status="break"`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReply {
    pub status: Status,
    /// The `reason` attribute (`ok`, `error`, `aborted`, `exception`).
    pub reason: String,
    /// The file the engine is currently stopped in, when available.
    pub file_uri: Option<String>,
    /// The 1-based line within `file_uri`, when available.
    pub line: Option<u32>,
    /// The uncaught-exception class name, when the break was caused by one.
    pub exception: Option<String>,
}

/// Parse a `status` reply.
pub fn parse_status(xml: &[u8]) -> Result<StatusReply, DbgpError> {
    let reply = parse_reply(xml, "status")?;
    let status = reply
        .attribute("status")
        .and_then(Status::parse)
        .ok_or_else(|| DbgpError::ParseError("status reply missing a recognized status attribute".into()))?;
    let reason = reply.attribute("reason").unwrap_or("ok").to_string();

    let message = parse_nodes(xml, "message")?.into_iter().next();
    let file_uri = message.as_ref().and_then(|m| m.attr("filename")).map(str::to_string);
    let line = message.as_ref().and_then(|m| m.attr("lineno")).and_then(|s| s.parse().ok());
    let exception = message.as_ref().and_then(|m| m.attr("exception")).map(str::to_string);

    Ok(StatusReply { status, reason, file_uri, line, exception })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    #[test]
    fn running_status_has_no_break_detail() {
        let xml = br#"<response command="status" transaction_id="1" status="running" reason="ok"/>"#;
        let status = must(parse_status(xml));
        assert_eq!(status.status, Status::Running);
        assert!(status.file_uri.is_none());
    }

    #[test]
    fn break_status_carries_message_detail() {
        let xml = br#"<response command="status" transaction_id="2" status="break" reason="ok">
            <message filename="file:///a.pl" lineno="12"/>
        </response>"#;
        let status = must(parse_status(xml));
        assert_eq!(status.status, Status::Break);
        assert_eq!(status.file_uri.as_deref(), Some("file:///a.pl"));
        assert_eq!(status.line, Some(12));
    }

    #[test]
    fn break_status_with_uncaught_exception() {
        let xml = br#"<response command="status" transaction_id="3" status="break" reason="exception">
            <message filename="file:///a.pl" lineno="3" exception="Some::Error"/>
        </response>"#;
        let status = must(parse_status(xml));
        assert_eq!(status.exception.as_deref(), Some("Some::Error"));
        assert_eq!(status.reason, "exception");
    }

    #[test]
    fn unrecognized_status_value_is_a_parse_error() {
        let xml = br#"<response command="status" transaction_id="1" status="sideways"/>"#;
        assert!(parse_status(xml).is_err());
    }
}
