//! `stack_get` reply decoding.

use dbgp_wire::DbgpError;

use crate::xml::parse_nodes;

/// The kind of code a stack frame represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// A normal file-backed call frame.
    File,
    /// An `eval()`'d string has no file on disk; the engine still reports
    /// a synthetic `file_uri` and line for it.
    Eval,
}

/// One frame of the engine's call stack, as reported verbatim — no
/// adapter-assigned DAP frame id and no connection association; those are
/// layered on by whatever owns the session.
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    /// 0 is the innermost (currently executing) frame.
    pub level: u32,
    /// The function/method name, or `{main}` for the top-level frame.
    pub name: String,
    /// The file URI the engine reports this frame as executing in.
    pub file_uri: String,
    /// The 1-based line number within `file_uri`.
    pub line: u32,
    /// Whether this is a file-backed frame or an `eval()`'d string.
    pub frame_type: FrameType,
}

/// Parse a `stack_get` reply's `<stack>` elements, in the order the
/// engine reports them (innermost first).
pub fn parse_stack_get(xml: &[u8]) -> Result<Vec<StackFrame>, DbgpError> {
    parse_nodes(xml, "stack")?
        .into_iter()
        .map(|node| {
            let level = node.attr("level").and_then(|s| s.parse().ok()).unwrap_or(0);
            let line = node.attr("lineno").and_then(|s| s.parse().ok()).unwrap_or(0);
            let frame_type = match node.attr("type") {
                Some("eval") => FrameType::Eval,
                _ => FrameType::File,
            };
            Ok(StackFrame {
                level,
                name: node.attr("where").unwrap_or("{main}").to_string(),
                file_uri: node.attr("filename").unwrap_or_default().to_string(),
                line,
                frame_type,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    #[test]
    fn parses_nested_frames_innermost_first() {
        let xml = br#"<response>
            <stack level="0" type="file" filename="file:///a.pl" lineno="10" where="foo"/>
            <stack level="1" type="file" filename="file:///a.pl" lineno="4" where="{main}"/>
        </response>"#;
        let frames = must(parse_stack_get(xml));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "foo");
        assert_eq!(frames[1].level, 1);
    }

    #[test]
    fn eval_frame_type_is_recognized() {
        let xml = br#"<response><stack level="0" type="eval" filename="file:///a.pl" lineno="1"/></response>"#;
        let frames = must(parse_stack_get(xml));
        assert_eq!(frames[0].frame_type, FrameType::Eval);
    }

    #[test]
    fn defaults_name_to_main_when_where_is_absent() {
        let xml = br#"<response><stack level="0" type="file" filename="file:///a.pl" lineno="1"/></response>"#;
        let frames = must(parse_stack_get(xml));
        assert_eq!(frames[0].name, "{main}");
    }
}
